use crate::knn_match::PointDict;
use crate::utils::{create_jobs, median};

use dashmap::DashMap;
use indicatif::ParallelProgressIterator;
use log::info;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rayon::prelude::*;

pub struct KnnGraph {
    /// Symmetric CSC adjacency matrix (n_nodes x n_nodes) of distances
    pub adjacency: CscMatrix<f32>,
    /// Sorted edge list (i < j), deduplicated
    pub edges: Vec<(usize, usize)>,
    /// Edge distances, parallel to `edges`
    pub distances: Vec<f32>,
    /// Number of nodes
    pub n_nodes: usize,
}

pub struct KnnGraphArgs {
    pub knn: usize,
    pub block_size: usize,
    /// If true, keep only reciprocal edges (i→j AND j→i).
    /// If false, keep union edges (i→j OR j→i), using min distance.
    pub reciprocal: bool,
    /// Switch to HNSW search at this many points
    pub approx_threshold: usize,
    pub seed: u64,
}

impl KnnGraph {
    /// Build a KNN graph from row vectors (points × features).
    ///
    /// A point cloud with fewer than two points gives a graph without
    /// edges.
    pub fn from_rows(data: &DMatrix<f32>, args: &KnnGraphArgs) -> anyhow::Result<KnnGraph> {
        let nn = data.nrows();
        let dict = PointDict::from_rows(data, args.approx_threshold, args.seed);
        Self::build_from_dict(&dict, nn, args)
    }

    fn build_from_dict(
        dict: &PointDict,
        nn: usize,
        args: &KnnGraphArgs,
    ) -> anyhow::Result<KnnGraph> {
        if nn < 2 || args.knn == 0 {
            return Ok(Self::empty(nn));
        }

        let jobs = create_jobs(nn, args.block_size);
        let njobs = jobs.len() as u64;

        /////////////////////////////////////////////////////////////////
        // step 1: searching nearest neighbours                        //
        /////////////////////////////////////////////////////////////////

        let triplets: DashMap<(usize, usize), f32> = DashMap::new();

        jobs.into_par_iter()
            .progress_count(njobs)
            .for_each(|(lb, ub)| {
                for i in lb..ub {
                    for (j, d_ij) in dict.search_others(i, args.knn) {
                        triplets.insert((i, j), d_ij);
                    }
                }
            });

        info!("{} triplets by kNN matching", triplets.len());

        ///////////////////////////////////////////////////
        // step 2: edge filtering (reciprocal or union) //
        ///////////////////////////////////////////////////

        let mut edges: Vec<((usize, usize), f32)> = if args.reciprocal {
            triplets
                .par_iter()
                .filter_map(|entry| {
                    let &(i, j) = entry.key();
                    if i < j && triplets.contains_key(&(j, i)) {
                        Some(((i, j), *entry.value()))
                    } else {
                        None
                    }
                })
                .collect()
        } else {
            triplets
                .par_iter()
                .filter_map(|entry| {
                    let &(i, j) = entry.key();
                    if i < j {
                        let d_ij = *entry.value();
                        let d_ji = triplets.get(&(j, i)).map(|e| *e).unwrap_or(d_ij);
                        Some(((i, j), d_ij.min(d_ji)))
                    } else if i > j && !triplets.contains_key(&(j, i)) {
                        Some(((j, i), *entry.value()))
                    } else {
                        None
                    }
                })
                .collect()
        };

        edges.par_sort_by_key(|&(ij, _)| ij);
        edges.dedup_by_key(|&mut (ij, _)| ij);

        info!(
            "{} edges after {} matching",
            edges.len(),
            if args.reciprocal {
                "reciprocal"
            } else {
                "union"
            }
        );

        ///////////////////////////////////////////////
        // step 3: construct sparse network backbone //
        ///////////////////////////////////////////////

        let mut coo = CooMatrix::new(nn, nn);
        for &((i, j), v) in edges.iter() {
            coo.push(i, j, v);
            coo.push(j, i, v);
        }

        let adjacency = CscMatrix::from(&coo);

        let (edge_pairs, distances): (Vec<_>, Vec<_>) = edges.into_iter().unzip();

        Ok(KnnGraph {
            adjacency,
            edges: edge_pairs,
            distances,
            n_nodes: nn,
        })
    }

    fn empty(nn: usize) -> KnnGraph {
        KnnGraph {
            adjacency: CscMatrix::from(&CooMatrix::<f32>::new(nn, nn)),
            edges: vec![],
            distances: vec![],
            n_nodes: nn,
        }
    }

    /// Get neighbors of a node from the CSC adjacency matrix
    pub fn neighbors(&self, node: usize) -> &[usize] {
        let offsets = self.adjacency.col_offsets();
        let start = offsets[node];
        let end = offsets[node + 1];
        &self.adjacency.row_indices()[start..end]
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn num_nodes(&self) -> usize {
        self.n_nodes
    }

    /// Convert distances to similarity weights using an exponential kernel:
    /// `w = exp(-d / σ)` where σ = median distance.
    ///
    /// Returns weights parallel to `self.edges`, all in (0, 1].
    pub fn exp_kernel_weights(&self) -> Vec<f32> {
        exp_kernel(&self.distances)
    }
}

/// `exp(-d / σ)` with σ the median of `distances` (1 if the median is
/// not positive)
pub fn exp_kernel(distances: &[f32]) -> Vec<f32> {
    if distances.is_empty() {
        return Vec::new();
    }
    let sigma = median(distances);
    let sigma = if sigma > 0.0 { sigma } else { 1.0 };
    distances.iter().map(|&d| (-d / sigma).exp()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two tight clusters of 5 points each in 2D, well separated
    fn two_cluster_matrix() -> DMatrix<f32> {
        DMatrix::from_row_slice(
            10,
            2,
            &[
                // Cluster A near origin
                0.0, 0.0, //
                0.1, 0.0, //
                0.0, 0.1, //
                0.1, 0.1, //
                0.05, 0.05, //
                // Cluster B far away
                10.0, 10.0, //
                10.1, 10.0, //
                10.0, 10.1, //
                10.1, 10.1, //
                10.05, 10.05, //
            ],
        )
    }

    fn args(knn: usize, reciprocal: bool) -> KnnGraphArgs {
        KnnGraphArgs {
            knn,
            block_size: 100,
            reciprocal,
            approx_threshold: 1000,
            seed: 42,
        }
    }

    #[test]
    fn test_from_rows_basic() {
        let graph = KnnGraph::from_rows(&two_cluster_matrix(), &args(4, true)).unwrap();

        assert_eq!(graph.num_nodes(), 10);
        assert!(graph.num_edges() > 0);
        assert_eq!(graph.edges.len(), graph.distances.len());

        for &(i, j) in &graph.edges {
            assert!(i < j, "Edge ({}, {}) not canonical", i, j);
        }
        for &d in &graph.distances {
            assert!(d >= 0.0);
        }
    }

    #[test]
    fn test_two_clusters_no_cross_edges() {
        let graph = KnnGraph::from_rows(&two_cluster_matrix(), &args(4, true)).unwrap();

        for &(i, j) in &graph.edges {
            let same_cluster = (i < 5 && j < 5) || (i >= 5 && j >= 5);
            assert!(same_cluster, "Cross-cluster edge ({}, {})", i, j);
        }
    }

    #[test]
    fn test_union_contains_reciprocal() {
        let data = two_cluster_matrix();
        let recip = KnnGraph::from_rows(&data, &args(2, true)).unwrap();
        let union = KnnGraph::from_rows(&data, &args(2, false)).unwrap();
        assert!(union.num_edges() >= recip.num_edges());
        for e in &recip.edges {
            assert!(union.edges.contains(e));
        }
    }

    #[test]
    fn test_neighbors_symmetric() {
        let graph = KnnGraph::from_rows(&two_cluster_matrix(), &args(3, false)).unwrap();

        for node in 0..graph.num_nodes() {
            for &neighbor in graph.neighbors(node) {
                assert!(graph.neighbors(neighbor).contains(&node));
            }
        }
    }

    #[test]
    fn test_tiny_inputs_have_no_edges() {
        let one = DMatrix::from_row_slice(1, 2, &[0.0, 0.0]);
        let graph = KnnGraph::from_rows(&one, &args(3, false)).unwrap();
        assert_eq!(graph.num_nodes(), 1);
        assert_eq!(graph.num_edges(), 0);
        assert!(graph.neighbors(0).is_empty());
    }

    #[test]
    fn test_exp_kernel_weights() {
        let graph = KnnGraph::from_rows(&two_cluster_matrix(), &args(4, true)).unwrap();

        let weights = graph.exp_kernel_weights();
        assert_eq!(weights.len(), graph.num_edges());

        for &w in &weights {
            assert!(w > 0.0 && w <= 1.0, "Weight {} out of (0, 1]", w);
        }
    }

    #[test]
    fn test_exp_kernel_zero_distances() {
        assert_eq!(exp_kernel(&[0.0, 0.0]), vec![1.0, 1.0]);
        assert!(exp_kernel(&[]).is_empty());
    }
}
