use crate::align::{self, PairAlignment};
use crate::cache::{PairCache, PairKey};
use crate::cancel::CancelToken;
use crate::config::{AlignParams, ComparisonSpace, JointConfig};
use crate::error::{JointError, Result};
use crate::graph::{assemble, intra_sample_edges, JointGraph, PairMatches};
use crate::mnn::{self, MatchArgs, MatchEdge};
use crate::rebalance::rebalance;
use crate::sample::{Sample, SampleRegistry};

use indicatif::ParallelProgressIterator;
use log::{info, warn};
use rayon::prelude::*;
use std::sync::Arc;

/// Outcome of one sample pair during graph construction
#[derive(Clone, Debug)]
pub struct PairReport {
    pub sample_a: Box<str>,
    pub sample_b: Box<str>,
    /// number of match edges, or why the pair was skipped
    pub outcome: std::result::Result<usize, String>,
}

#[derive(Clone, Debug, Default)]
pub struct BuildReport {
    pub pairs: Vec<PairReport>,
    /// cells with at least one edge to another sample
    pub matched_cells: usize,
    pub num_components: usize,
}

impl BuildReport {
    pub fn num_succeeded(&self) -> usize {
        self.pairs.iter().filter(|p| p.outcome.is_ok()).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &PairReport> {
        self.pairs.iter().filter(|p| p.outcome.is_err())
    }
}

/// Registered samples plus the alignments computed on them so far
///
/// Alignments persist across `build_graph` calls until
/// `invalidate_cache`; graphs are always built from scratch.
#[derive(Default)]
pub struct JointSession {
    registry: SampleRegistry,
    cache: PairCache,
}

impl JointSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sample: Sample) -> Result<usize> {
        self.registry.register(sample)
    }

    pub fn registry(&self) -> &SampleRegistry {
        &self.registry
    }

    pub fn cache(&self) -> &PairCache {
        &self.cache
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate();
    }

    /// Cached alignment of samples `a` and `b`, computed on a miss
    pub fn align_pair(
        &self,
        a: usize,
        b: usize,
        space: ComparisonSpace,
        params: &AlignParams,
        cancel: &CancelToken,
    ) -> Result<Arc<PairAlignment>> {
        let key = PairKey::new(
            &self.registry.sample(a).id,
            &self.registry.sample(b).id,
            space,
            params,
        );
        self.cache.get_or_compute(key, || {
            align::align_pair(&self.registry, a, b, space, params, cancel)
        })
    }

    pub fn match_pair(
        &self,
        alignment: &PairAlignment,
        args: &MatchArgs,
        cancel: &CancelToken,
    ) -> Result<Vec<MatchEdge>> {
        mnn::match_pair(&self.registry, alignment, args, cancel)
    }

    /// Align and match every pair of samples in parallel, then assemble
    /// the joint graph and rebalance it when `alignment_strength > 0`
    ///
    /// * `balance` - factor level of every cell; the sample of origin if
    ///   `None`
    ///
    /// A pair that cannot be aligned or matched, or runs past
    /// `pair_timeout_secs`, is logged and left out. The build fails if
    /// there are pairs and none of them succeeds.
    pub fn build_graph(
        &self,
        config: &JointConfig,
        balance: Option<&[usize]>,
        cancel: &CancelToken,
    ) -> Result<(JointGraph, BuildReport)> {
        config.validate()?;

        let nsamples = self.registry.len();
        if self.registry.num_cells() == 0 {
            return Err(JointError::GraphAssembly("no cells registered".into()));
        }

        let pairs: Vec<(usize, usize)> = (0..nsamples)
            .flat_map(|a| ((a + 1)..nsamples).map(move |b| (a, b)))
            .collect();

        info!(
            "{} samples, {} cells, {} pairs by {}",
            nsamples,
            self.registry.num_cells(),
            pairs.len(),
            config.space
        );

        let params = config.align_params();
        let match_args = MatchArgs::from(config);
        let npairs = pairs.len() as u64;

        let results: Vec<((usize, usize), Result<Vec<MatchEdge>>)> = pairs
            .into_par_iter()
            .progress_count(npairs)
            .map(|(a, b)| {
                let token = cancel.child_with_timeout(config.pair_timeout());
                let res = self
                    .align_pair(a, b, config.space, &params, &token)
                    .and_then(|al| self.match_pair(&al, &match_args, &token));
                ((a, b), res)
            })
            .collect();

        cancel.check("graph construction")?;

        let mut report = BuildReport::default();
        let mut matches = Vec::with_capacity(results.len());

        for ((a, b), res) in results {
            let (id_a, id_b) = (
                self.registry.sample(a).id.clone(),
                self.registry.sample(b).id.clone(),
            );
            match res {
                Ok(edges) => {
                    report.pairs.push(PairReport {
                        sample_a: id_a,
                        sample_b: id_b,
                        outcome: Ok(edges.len()),
                    });
                    matches.push(PairMatches {
                        sample_a: a,
                        sample_b: b,
                        edges,
                    });
                }
                Err(err) if err.is_pair_local() => {
                    warn!("skipping `{}` - `{}`: {}", id_a, id_b, err);
                    report.pairs.push(PairReport {
                        sample_a: id_a,
                        sample_b: id_b,
                        outcome: Err(err.to_string()),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        if !report.pairs.is_empty() && matches.is_empty() {
            return Err(JointError::GraphAssembly(format!(
                "none of the {} sample pairs could be aligned",
                report.pairs.len()
            )));
        }

        let intra = (0..nsamples)
            .into_par_iter()
            .map(|s| intra_sample_edges(&self.registry, s, config))
            .collect::<Result<Vec<_>>>()?;

        cancel.check("graph construction")?;

        let mut graph = assemble(&self.registry, &intra, &matches, config.edge_merge)?;

        if config.alignment_strength > 0.0 {
            let default_factor;
            let factor = match balance {
                Some(f) => f,
                None => {
                    default_factor = graph.node_samples();
                    &default_factor[..]
                }
            };
            graph = rebalance(&graph, factor, config.alignment_strength)?;
        }

        report.matched_cells = count_matched_cells(&self.registry, &matches);
        report.num_components = graph.num_components();

        info!(
            "{} of {} pairs aligned; {} of {} cells matched across samples; {} components",
            report.num_succeeded(),
            report.pairs.len(),
            report.matched_cells,
            graph.num_nodes(),
            report.num_components
        );

        Ok((graph, report))
    }
}

fn count_matched_cells(registry: &SampleRegistry, matches: &[PairMatches]) -> usize {
    let offsets = registry.offsets();
    let mut matched = vec![false; registry.num_cells()];
    for pm in matches {
        for e in &pm.edges {
            matched[offsets[pm.sample_a] + e.a] = true;
            matched[offsets[pm.sample_b] + e.b] = true;
        }
    }
    matched.into_iter().filter(|&m| m).count()
}
