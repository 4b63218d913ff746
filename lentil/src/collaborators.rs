//! Contracts for routines that run on a joint graph but live elsewhere:
//! community detection and layout. Anything with the right shape plugs
//! in, closures included.

use crate::error::{JointError, Result};
use crate::graph::JointGraph;

use fnv::FnvHashMap as HashMap;
use matrix_util::utils::partition_by_membership;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Graph -> community of every node
pub trait CommunityDetector {
    fn detect(&self, graph: &JointGraph) -> Result<Vec<usize>>;
}

impl<F> CommunityDetector for F
where
    F: Fn(&JointGraph) -> Result<Vec<usize>>,
{
    fn detect(&self, graph: &JointGraph) -> Result<Vec<usize>> {
        self(graph)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct LayoutParams {
    pub dims: usize,
    pub iterations: usize,
    pub seed: u64,
}

impl Default for LayoutParams {
    fn default() -> Self {
        Self {
            dims: 2,
            iterations: 100,
            seed: 42,
        }
    }
}

/// Graph -> coordinates (nodes x dims)
pub trait GraphLayout {
    fn layout(&self, graph: &JointGraph, params: &LayoutParams) -> Result<DMatrix<f32>>;
}

impl<F> GraphLayout for F
where
    F: Fn(&JointGraph, &LayoutParams) -> Result<DMatrix<f32>>,
{
    fn layout(&self, graph: &JointGraph, params: &LayoutParams) -> Result<DMatrix<f32>> {
        self(graph, params)
    }
}

/// One community per connected component
pub struct ComponentPartition;

impl CommunityDetector for ComponentPartition {
    fn detect(&self, graph: &JointGraph) -> Result<Vec<usize>> {
        Ok(graph.connected_components())
    }
}

/// Run a detector and check that it labelled every node
pub fn detect_communities(
    detector: &dyn CommunityDetector,
    graph: &JointGraph,
) -> Result<Partition> {
    let labels = detector.detect(graph)?;
    if labels.len() != graph.num_nodes() {
        return Err(JointError::input(format!(
            "community detection returned {} labels for {} cells",
            labels.len(),
            graph.num_nodes()
        )));
    }
    Ok(Partition::new(labels))
}

/// Run a layout and check its shape
pub fn compute_layout(
    layout: &dyn GraphLayout,
    graph: &JointGraph,
    params: &LayoutParams,
) -> Result<DMatrix<f32>> {
    let coords = layout.layout(graph, params)?;
    if coords.nrows() != graph.num_nodes() || coords.ncols() != params.dims {
        return Err(JointError::input(format!(
            "layout returned [{} x {}], expected [{} x {}]",
            coords.nrows(),
            coords.ncols(),
            graph.num_nodes(),
            params.dims
        )));
    }
    Ok(coords)
}

/// Flat cluster assignment of the nodes of a graph
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    labels: Vec<usize>,
}

impl Partition {
    pub fn new(labels: Vec<usize>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn num_clusters(&self) -> usize {
        let mut distinct = self.labels.clone();
        distinct.sort_unstable();
        distinct.dedup();
        distinct.len()
    }

    /// cluster -> number of nodes
    pub fn sizes(&self) -> HashMap<usize, usize> {
        partition_by_membership(&self.labels)
            .into_iter()
            .map(|(k, members)| (k, members.len()))
            .collect()
    }

    /// cluster -> member nodes, in node order
    pub fn members(&self) -> HashMap<usize, Vec<usize>> {
        partition_by_membership(&self.labels)
    }

    /// `(cell name, cluster)` for every node
    pub fn named<'a>(&'a self, graph: &'a JointGraph) -> Vec<(&'a str, usize)> {
        graph
            .cell_names()
            .iter()
            .zip(self.labels.iter())
            .map(|(n, &k)| (n.as_ref(), k))
            .collect()
    }
}

/// One agglomeration step joining `left` and `right`
///
/// Ids below the number of leaves are leaves; id `n_leaves + k` is the
/// node created by the `k`-th merge.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f32,
}

/// Hierarchical clustering as an explicit merge tree
#[derive(Clone, Debug)]
pub struct MergeTree {
    n_leaves: usize,
    merges: Vec<Merge>,
    /// a leaf under each node id
    leaf_of: Vec<usize>,
}

impl MergeTree {
    pub fn new(n_leaves: usize, merges: Vec<Merge>) -> Result<Self> {
        if merges.len() >= n_leaves.max(1) {
            return Err(JointError::input(format!(
                "{} merges over {} leaves",
                merges.len(),
                n_leaves
            )));
        }

        let mut used = vec![false; n_leaves + merges.len()];
        let mut leaf_of: Vec<usize> = (0..n_leaves).collect();

        for (k, m) in merges.iter().enumerate() {
            let avail = n_leaves + k;
            for child in [m.left, m.right] {
                if child >= avail || std::mem::replace(&mut used[child], true) {
                    return Err(JointError::input(format!(
                        "merge {} uses node {} which is undefined or already merged",
                        k, child
                    )));
                }
            }
            if m.left == m.right || !m.height.is_finite() {
                return Err(JointError::input(format!("merge {} is malformed", k)));
            }
            leaf_of.push(leaf_of[m.left]);
        }

        Ok(Self {
            n_leaves,
            merges,
            leaf_of,
        })
    }

    pub fn num_leaves(&self) -> usize {
        self.n_leaves
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Flat partition into `n_clusters` (at least the number of roots):
    /// the lowest merges are kept, the highest undone
    pub fn cut(&self, n_clusters: usize) -> Partition {
        let napply = self
            .n_leaves
            .saturating_sub(n_clusters.max(1))
            .min(self.merges.len());
        let order = self.merges_by_height();
        self.partition(&order[..napply])
    }

    /// Flat partition keeping the merges at or below `height`
    pub fn cut_height(&self, height: f32) -> Partition {
        let order: Vec<usize> = self
            .merges_by_height()
            .into_iter()
            .filter(|&k| self.merges[k].height <= height)
            .collect();
        self.partition(&order)
    }

    fn merges_by_height(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.merges.len()).collect();
        order.sort_by(|&a, &b| {
            self.merges[a]
                .height
                .total_cmp(&self.merges[b].height)
                .then(a.cmp(&b))
        });
        order
    }

    /// Union the leaves under each applied merge; clusters are numbered
    /// by their first leaf
    fn partition(&self, applied: &[usize]) -> Partition {
        let mut parent: Vec<usize> = (0..self.n_leaves).collect();

        fn find(parent: &mut [usize], mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        for &k in applied {
            let m = &self.merges[k];
            let a = find(&mut parent, self.leaf_of[m.left]);
            let b = find(&mut parent, self.leaf_of[m.right]);
            if a != b {
                parent[a.max(b)] = a.min(b);
            }
        }

        let mut label_of_root: HashMap<usize, usize> = HashMap::default();
        let labels = (0..self.n_leaves)
            .map(|leaf| {
                let root = find(&mut parent, leaf);
                let next = label_of_root.len();
                *label_of_root.entry(root).or_insert(next)
            })
            .collect();
        Partition::new(labels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EdgeMerge;
    use crate::graph::assemble;
    use crate::sample::SampleRegistry;
    use crate::simulate::blank_sample;

    fn graph() -> JointGraph {
        let mut reg = SampleRegistry::new();
        reg.register(blank_sample("s", 5, "c").unwrap()).unwrap();
        assemble(&reg, &[vec![(0, 1, 1.0), (3, 4, 1.0)]], &[], EdgeMerge::Max).unwrap()
    }

    /// ((0 1) 2) and (3 4)
    fn tree() -> MergeTree {
        MergeTree::new(
            5,
            vec![
                Merge {
                    left: 3,
                    right: 4,
                    height: 0.5,
                },
                Merge {
                    left: 0,
                    right: 1,
                    height: 1.0,
                },
                Merge {
                    left: 6,
                    right: 2,
                    height: 2.0,
                },
                Merge {
                    left: 7,
                    right: 5,
                    height: 4.0,
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn closures_plug_in() -> Result<()> {
        let g = graph();
        let all_one = |g: &JointGraph| -> Result<Vec<usize>> { Ok(vec![1; g.num_nodes()]) };
        let part = detect_communities(&all_one, &g)?;
        assert_eq!(part.num_clusters(), 1);

        let line = |g: &JointGraph, p: &LayoutParams| -> Result<DMatrix<f32>> {
            Ok(DMatrix::from_fn(g.num_nodes(), p.dims, |i, _| i as f32))
        };
        let coords = compute_layout(&line, &g, &LayoutParams::default())?;
        assert_eq!(coords.shape(), (5, 2));
        Ok(())
    }

    #[test]
    fn misshapen_results_are_rejected() {
        let g = graph();
        let short = |_: &JointGraph| -> Result<Vec<usize>> { Ok(vec![0; 2]) };
        assert!(detect_communities(&short, &g).is_err());

        let wrong =
            |_: &JointGraph, _: &LayoutParams| -> Result<DMatrix<f32>> { Ok(DMatrix::zeros(5, 3)) };
        assert!(compute_layout(&wrong, &g, &LayoutParams::default()).is_err());
    }

    #[test]
    fn components_as_communities() -> Result<()> {
        let g = graph();
        let part = detect_communities(&ComponentPartition, &g)?;
        assert_eq!(part.labels(), &[0, 0, 1, 2, 2]);
        assert_eq!(part.sizes()[&2], 2);
        assert_eq!(part.members()[&1], vec![2]);
        assert_eq!(part.named(&g)[3], ("c3", 2));
        Ok(())
    }

    #[test]
    fn cut_by_count() {
        let t = tree();
        assert_eq!(t.cut(1).labels(), &[0, 0, 0, 0, 0]);
        assert_eq!(t.cut(2).labels(), &[0, 0, 0, 1, 1]);
        assert_eq!(t.cut(3).labels(), &[0, 0, 1, 2, 2]);
        assert_eq!(t.cut(5).labels(), &[0, 1, 2, 3, 4]);
        assert_eq!(t.cut(10).num_clusters(), 5);
    }

    #[test]
    fn cut_by_height() {
        let t = tree();
        assert_eq!(t.cut_height(0.1).num_clusters(), 5);
        assert_eq!(t.cut_height(1.0).labels(), &[0, 0, 1, 2, 2]);
        assert_eq!(t.cut_height(3.0).labels(), &[0, 0, 0, 1, 1]);
    }

    #[test]
    fn malformed_trees() {
        let twice = vec![
            Merge {
                left: 0,
                right: 1,
                height: 1.0,
            },
            Merge {
                left: 0,
                right: 2,
                height: 2.0,
            },
        ];
        assert!(MergeTree::new(3, twice).is_err());

        let forward = vec![Merge {
            left: 0,
            right: 4,
            height: 1.0,
        }];
        assert!(MergeTree::new(3, forward).is_err());
    }
}
