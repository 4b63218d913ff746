//! Joint neighbour graphs across single-cell samples
//!
//! Samples are aligned pairwise (PCA, common PCA, CCA or raw genes),
//! matched by mutual nearest neighbours, and assembled with each
//! sample's own kNN edges into one weighted graph, which label
//! propagation, community detection and layout routines then use.

pub mod align;
pub mod cache;
pub mod cancel;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod graph;
pub mod input;
pub mod metacell;
pub mod mnn;
pub mod output;
pub mod propagate;
pub mod rebalance;
pub mod sample;
pub mod session;
pub mod simulate;

pub use cancel::CancelToken;
pub use config::{
    ComparisonSpace, EdgeMerge, JointConfig, MatchingMethod, Metric, PropagationConfig,
};
pub use error::{JointError, Result};
pub use graph::JointGraph;
pub use propagate::{propagate_labels, LabelDistribution};
pub use sample::{CellId, Sample, SampleRegistry};
pub use session::{BuildReport, JointSession};
