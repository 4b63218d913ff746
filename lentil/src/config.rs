use crate::error::{JointError, Result};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::time::Duration;

pub const DEFAULT_K: usize = 15;
pub const DEFAULT_K_SELF: usize = 10;
pub const DEFAULT_K_SELF_WEIGHT: f32 = 0.1;
pub const DEFAULT_NCOMPS: usize = 30;
pub const DEFAULT_N_ODGENES: usize = 2000;
pub const DEFAULT_SEED: u64 = 42;
pub const DEFAULT_BLOCK_SIZE: usize = 100;

/// How a pair of samples is embedded before matching
#[derive(
    ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash,
)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ComparisonSpace {
    /// PCA of the pooled, per-sample centred expression
    Pca,
    /// common principal components
    #[default]
    Cpca,
    /// canonical correlation (cross-product SVD)
    Cca,
    /// raw expression of the shared genes
    Genes,
}

impl std::fmt::Display for ComparisonSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ComparisonSpace::Pca => "PCA",
            ComparisonSpace::Cpca => "CPCA",
            ComparisonSpace::Cca => "CCA",
            ComparisonSpace::Genes => "genes",
        };
        write!(f, "{}", name)
    }
}

#[derive(
    ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash,
)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// 1 - cosine similarity
    #[default]
    Angular,
    /// Euclidean
    L2,
}

#[derive(
    ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash,
)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MatchingMethod {
    /// keep pairs ranked among each other's k nearest
    #[default]
    Mnn,
    /// keep pairs ranked in either direction
    Nn,
}

impl MatchingMethod {
    pub fn name(&self) -> &'static str {
        match self {
            MatchingMethod::Mnn => "mNN",
            MatchingMethod::Nn => "NN",
        }
    }
}

/// How weights of the same edge coming from several sources combine
#[derive(
    ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash,
)]
#[clap(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EdgeMerge {
    #[default]
    Max,
    Sum,
}

/// Parameters that change the result of a pairwise alignment; these
/// and nothing else go into the cache key
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct AlignParams {
    pub k: usize,
    pub ncomps: usize,
    pub n_odgenes: usize,
    pub metric: Metric,
    pub seed: u64,
}

impl AlignParams {
    /// Hash that is stable across runs (FNV, not randomly keyed)
    pub fn stable_hash(&self) -> u64 {
        let mut hasher = fnv::FnvHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for AlignParams {
    fn default() -> Self {
        JointConfig::default().align_params()
    }
}

/// Joint graph construction settings
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct JointConfig {
    pub space: ComparisonSpace,
    /// neighbours searched across samples
    pub k: usize,
    /// neighbours within a sample
    pub k_self: usize,
    /// multiplier of within-sample edge weights
    pub k_self_weight: f32,
    pub ncomps: usize,
    pub n_odgenes: usize,
    pub matching: MatchingMethod,
    pub metric: Metric,
    /// 0 = leave weights alone, 1 = equal weight share per factor level
    pub alignment_strength: f32,
    pub edge_merge: EdgeMerge,
    /// exact neighbour search below this many cells
    pub approx_threshold: usize,
    pub block_size: usize,
    pub seed: u64,
    /// time limit of one pairwise alignment + matching
    pub pair_timeout_secs: Option<f64>,
}

impl Default for JointConfig {
    fn default() -> Self {
        Self {
            space: ComparisonSpace::default(),
            k: DEFAULT_K,
            k_self: DEFAULT_K_SELF,
            k_self_weight: DEFAULT_K_SELF_WEIGHT,
            ncomps: DEFAULT_NCOMPS,
            n_odgenes: DEFAULT_N_ODGENES,
            matching: MatchingMethod::default(),
            metric: Metric::default(),
            alignment_strength: 0.0,
            edge_merge: EdgeMerge::default(),
            approx_threshold: matrix_util::knn_match::DEFAULT_APPROX_THRESHOLD,
            block_size: DEFAULT_BLOCK_SIZE,
            seed: DEFAULT_SEED,
            pair_timeout_secs: None,
        }
    }
}

impl JointConfig {
    pub fn align_params(&self) -> AlignParams {
        AlignParams {
            k: self.k,
            ncomps: self.ncomps,
            n_odgenes: self.n_odgenes,
            metric: self.metric,
            seed: self.seed,
        }
    }

    pub fn pair_timeout(&self) -> Option<Duration> {
        self.pair_timeout_secs
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(JointError::input("k must be at least 1"));
        }
        if self.ncomps == 0 {
            return Err(JointError::input("ncomps must be at least 1"));
        }
        if self.n_odgenes == 0 {
            return Err(JointError::input("n_odgenes must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.alignment_strength) {
            return Err(JointError::input(format!(
                "alignment strength {} is outside [0, 1]",
                self.alignment_strength
            )));
        }
        if !(self.k_self_weight.is_finite() && self.k_self_weight > 0.0) {
            return Err(JointError::input("k_self_weight must be positive"));
        }
        Ok(())
    }

    /// Read a JSON file; missing fields take their defaults
    pub fn from_json_file(file: &str) -> anyhow::Result<Self> {
        let reader = matrix_util::common_io::open_buf_reader(file)?;
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Label propagation settings
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct PropagationConfig {
    /// keep seed cells at their one-hot distribution
    pub fixed_initial_labels: bool,
    pub max_iterations: usize,
    /// stop when no node changes by more than this much
    pub tolerance: f32,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            fixed_initial_labels: true,
            max_iterations: 50,
            tolerance: 1e-4,
        }
    }
}
