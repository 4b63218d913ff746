use crate::error::{JointError, Result};
use crate::graph::JointGraph;

use fnv::FnvHashMap as HashMap;
use log::info;
use rayon::prelude::*;

/// Index the distinct values of a categorical factor, in sorted order
pub fn factor_levels<T: Ord + Clone + std::hash::Hash>(values: &[T]) -> (Vec<usize>, Vec<T>) {
    let mut levels: Vec<T> = values.to_vec();
    levels.sort();
    levels.dedup();
    let index: HashMap<&T, usize> = levels.iter().enumerate().map(|(l, v)| (v, l)).collect();
    let coded = values.iter().map(|v| index[v]).collect();
    (coded, levels)
}

/// Pull each node's outgoing weight shares per factor level towards
/// uniform
///
/// For node `i` with neighbour mass share `s_l` on level `l` among the
/// `L` levels present in its neighbourhood, the new share is
/// `(1 - strength) s_l + strength / L`. The weights of level `l` are
/// scaled by `new / old` share, so the node's total outgoing weight
/// stays the same and no edge appears or vanishes.
///
/// * `factor` - level of every node (e.g. its sample)
/// * `strength` - in `[0, 1]`; 0 returns an identical graph
pub fn rebalance(graph: &JointGraph, factor: &[usize], strength: f32) -> Result<JointGraph> {
    if !(0.0..=1.0).contains(&strength) {
        return Err(JointError::input(format!(
            "alignment strength {} is outside [0, 1]",
            strength
        )));
    }
    if factor.len() != graph.num_nodes() {
        return Err(JointError::input(format!(
            "balance factor has {} values for {} cells",
            factor.len(),
            graph.num_nodes()
        )));
    }
    if strength == 0.0 {
        return Ok(graph.clone());
    }

    let values: Vec<f32> = (0..graph.num_nodes())
        .into_par_iter()
        .flat_map_iter(|i| {
            rebalance_node(graph.neighbors(i), graph.out_weights(i), factor, strength)
        })
        .collect();

    info!(
        "rebalanced {} edges over {} factor levels, strength {}",
        graph.num_edges(),
        factor.iter().max().map_or(0, |m| m + 1),
        strength
    );

    graph.with_out_weights(values)
}

fn rebalance_node(nbrs: &[usize], weights: &[f32], factor: &[usize], strength: f32) -> Vec<f32> {
    let mut mass: HashMap<usize, f64> = HashMap::default();
    for (&j, &w) in nbrs.iter().zip(weights) {
        *mass.entry(factor[j]).or_default() += w as f64;
    }
    let total: f64 = mass.values().sum();
    if total <= 0.0 || mass.len() < 2 {
        return weights.to_vec();
    }

    let nlevels = mass.len() as f64;
    let alpha = strength as f64;

    nbrs.iter()
        .zip(weights)
        .map(|(&j, &w)| {
            let share = mass[&factor[j]] / total;
            let target = (1.0 - alpha) * share + alpha / nlevels;
            (w as f64 * target / share) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdgeMerge;
    use crate::graph::{assemble, PairMatches};
    use crate::mnn::MatchEdge;
    use crate::sample::{Sample, SampleRegistry};
    use approx::assert_abs_diff_eq;
    use matrix_util::traits::MatTriplets;
    use nalgebra_sparse::CscMatrix;

    /// Two samples of 4 cells: a dense within-sample ring and a couple of
    /// weak cross edges
    fn graph() -> JointGraph {
        let mut reg = SampleRegistry::new();
        for s in 0..2 {
            let triplets = (0..4).map(|j| (0, j, 1.0)).collect();
            let counts = CscMatrix::from_nonzero_triplets(1, 4, triplets).unwrap();
            let cells = (0..4).map(|j| format!("s{}_{}", s, j).into()).collect();
            reg.register(Sample::new(&format!("s{}", s), counts, vec!["g".into()], cells))
                .unwrap();
        }
        let ring = vec![(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0), (0, 3, 1.0)];
        let cross = PairMatches {
            sample_a: 0,
            sample_b: 1,
            edges: [(0, 0, 0.2), (1, 1, 0.1), (2, 1, 0.3)]
                .iter()
                .map(|&(a, b, weight)| MatchEdge {
                    a,
                    b,
                    distance: 0.0,
                    weight,
                })
                .collect(),
        };
        assemble(&reg, &[ring.clone(), ring], &[cross], EdgeMerge::Max).unwrap()
    }

    fn level_shares(g: &JointGraph, factor: &[usize], i: usize) -> Vec<f32> {
        let total = g.out_weight_total(i);
        let mut shares = vec![0.0; 2];
        for (&j, &w) in g.neighbors(i).iter().zip(g.out_weights(i)) {
            shares[factor[j]] += w / total;
        }
        shares
    }

    #[test]
    fn zero_strength_changes_nothing() -> Result<()> {
        let g = graph();
        let factor = g.node_samples();
        let h = rebalance(&g, &factor, 0.0)?;
        assert_eq!(g.adjacency().values(), h.adjacency().values());
        Ok(())
    }

    #[test]
    fn full_strength_gives_uniform_shares() -> Result<()> {
        let g = graph();
        let factor = g.node_samples();
        let h = rebalance(&g, &factor, 1.0)?;

        assert_eq!(g.num_edges(), h.num_edges());
        for i in 0..h.num_nodes() {
            assert_eq!(g.neighbors(i), h.neighbors(i));
            assert_abs_diff_eq!(g.out_weight_total(i), h.out_weight_total(i), epsilon = 1e-5);
            assert!(h.out_weights(i).iter().all(|&w| w > 0.0));

            let levels: Vec<usize> = g.neighbors(i).iter().map(|&j| factor[j]).collect();
            if levels.contains(&0) && levels.contains(&1) {
                for s in level_shares(&h, &factor, i) {
                    assert_abs_diff_eq!(s, 0.5, epsilon = 1e-5);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn partial_strength_interpolates() -> Result<()> {
        let g = graph();
        let factor = g.node_samples();
        let h = rebalance(&g, &factor, 0.5)?;
        // node 0: ring mass 2.0, cross mass 0.2
        let before = level_shares(&g, &factor, 0)[1];
        let after = level_shares(&h, &factor, 0)[1];
        assert_abs_diff_eq!(after, 0.5 * before + 0.25, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn invalid_arguments() {
        let g = graph();
        let factor = g.node_samples();
        assert!(matches!(rebalance(&g, &factor, 1.5), Err(JointError::Input(_))));
        assert!(matches!(rebalance(&g, &factor[1..], 0.5), Err(JointError::Input(_))));
    }

    #[test]
    fn levels_are_sorted() {
        let (coded, levels) = factor_levels(&["b", "a", "b", "c"]);
        assert_eq!(coded, vec![1, 0, 1, 2]);
        assert_eq!(levels, vec!["a", "b", "c"]);
    }
}
