//! Cross-sample neighbour matching on a pair alignment

use crate::align::{Mat, PairAlignment};
use crate::cancel::CancelToken;
use crate::config::{JointConfig, MatchingMethod, Metric};
use crate::error::{JointError, Result};
use crate::sample::SampleRegistry;

use fnv::FnvHashMap as HashMap;
use indicatif::ParallelProgressIterator;
use log::debug;
use matrix_util::knn_graph::exp_kernel;
use matrix_util::knn_match::{MakeVecPoint, PointDict};
use matrix_util::traits::MatOps;
use matrix_util::utils::create_jobs;
use rayon::prelude::*;

/// A matched pair of cells: local index `a` in the first sample of the
/// alignment and `b` in the second
#[derive(Clone, Debug, PartialEq)]
pub struct MatchEdge {
    pub a: usize,
    pub b: usize,
    pub distance: f32,
    pub weight: f32,
}

#[derive(Clone, Debug)]
pub struct MatchArgs {
    pub k: usize,
    pub method: MatchingMethod,
    pub metric: Metric,
    pub approx_threshold: usize,
    pub seed: u64,
    pub block_size: usize,
}

impl From<&JointConfig> for MatchArgs {
    fn from(config: &JointConfig) -> Self {
        Self {
            k: config.k,
            method: config.matching,
            metric: config.metric,
            approx_threshold: config.approx_threshold,
            seed: config.seed,
            block_size: config.block_size,
        }
    }
}

/// Match the cells of an aligned pair
///
/// Every cell of A queries its `k` nearest cells of B and vice versa.
/// `Mnn` keeps the pairs found in both directions, `Nn` keeps either
/// direction with the smaller distance. Under `Angular` the coordinates
/// are L2-normalised and the reported distance is `1 - cos`.
///
/// Edges come out sorted by `(a, b)`; weights are `exp(-d / σ)` with σ
/// the median retained distance.
pub fn match_pair(
    registry: &SampleRegistry,
    alignment: &PairAlignment,
    args: &MatchArgs,
    cancel: &CancelToken,
) -> Result<Vec<MatchEdge>> {
    let id_a = registry.sample(alignment.sample_a).id.clone();
    let id_b = registry.sample(alignment.sample_b).id.clone();

    let (coords_a, coords_b) = match args.metric {
        Metric::Angular => (
            alignment.coords_a.normalize_rows(),
            alignment.coords_b.normalize_rows(),
        ),
        Metric::L2 => (alignment.coords_a.clone(), alignment.coords_b.clone()),
    };

    let dict_a = PointDict::from_rows(&coords_a, args.approx_threshold, args.seed);
    let dict_b = PointDict::from_rows(&coords_b, args.approx_threshold, args.seed);

    cancel.check("matching")?;

    // a -> b and b -> a, both keyed by (a, b)
    let forward = directed_search(&coords_a, &dict_b, args, cancel, false)?;
    let backward = directed_search(&coords_b, &dict_a, args, cancel, true)?;

    let mut kept: Vec<((usize, usize), f32)> = match args.method {
        MatchingMethod::Mnn => forward
            .iter()
            .filter_map(|(ab, &d)| backward.get(ab).map(|&d2| (*ab, d.min(d2))))
            .collect(),
        MatchingMethod::Nn => {
            let mut union = forward;
            for (ab, d) in backward {
                union
                    .entry(ab)
                    .and_modify(|x| *x = x.min(d))
                    .or_insert(d);
            }
            union.into_iter().collect()
        }
    };

    if kept.is_empty() {
        return Err(JointError::Matching {
            sample_a: id_a,
            sample_b: id_b,
            method: args.method.name(),
        });
    }

    kept.sort_by_key(|&(ab, _)| ab);

    let distances: Vec<f32> = kept
        .iter()
        .map(|&(_, d)| match args.metric {
            // |x - y|² = 2 (1 - cos) on the unit sphere
            Metric::Angular => 0.5 * d * d,
            Metric::L2 => d,
        })
        .collect();

    let weights = exp_kernel(&distances);

    debug!(
        "{} {} pairs between `{}` [{}] and `{}` [{}]",
        kept.len(),
        args.method.name(),
        id_a,
        coords_a.nrows(),
        id_b,
        coords_b.nrows()
    );

    Ok(kept
        .into_iter()
        .zip(distances)
        .zip(weights)
        .map(|((((a, b), _), distance), weight)| MatchEdge {
            a,
            b,
            distance,
            weight,
        })
        .collect())
}

/// Nearest neighbours of every row of `queries` in `dict`, keyed by
/// `(a, b)`; `swap` when the queries are the rows of B
fn directed_search(
    queries: &Mat,
    dict: &PointDict,
    args: &MatchArgs,
    cancel: &CancelToken,
    swap: bool,
) -> Result<HashMap<(usize, usize), f32>> {
    let jobs = create_jobs(queries.nrows(), args.block_size);
    let njobs = jobs.len() as u64;

    let blocks = jobs
        .into_par_iter()
        .progress_count(njobs)
        .map(|(lb, ub)| {
            cancel.check("neighbour search")?;
            let mut hits = Vec::with_capacity((ub - lb) * args.k);
            for i in lb..ub {
                let q = queries.row(i).to_vp();
                for (j, d) in dict.search(&q.data, args.k) {
                    hits.push(if swap { ((j, i), d) } else { ((i, j), d) });
                }
            }
            Ok(hits)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(blocks.into_iter().flatten().collect())
}
