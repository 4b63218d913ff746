//! The joint graph of all registered cells and its assembly from
//! within-sample and between-sample edges

use crate::config::{EdgeMerge, JointConfig, Metric};
use crate::error::{JointError, Result};
use crate::mnn::MatchEdge;
use crate::sample::{CellId, SampleRegistry};

use fnv::FnvHashMap as HashMap;
use log::info;
use matrix_util::dmatrix_rsvd::RSVD;
use matrix_util::dmatrix_util::dense_transpose_rows;
use matrix_util::knn_graph::{KnnGraph, KnnGraphArgs};
use matrix_util::traits::MatOps;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Weighted graph over every registered cell
///
/// Nodes follow registration order. The neighbour structure is
/// undirected without self loops; weights are stored per direction, and
/// column `i` of the adjacency holds the outgoing edges of node `i`.
#[derive(Clone, Debug)]
pub struct JointGraph {
    cells: Vec<CellId>,
    names: Vec<Box<str>>,
    name_index: HashMap<Box<str>, usize>,
    adjacency: CscMatrix<f32>,
}

impl JointGraph {
    pub fn num_nodes(&self) -> usize {
        self.cells.len()
    }

    /// Number of undirected edges
    pub fn num_edges(&self) -> usize {
        self.adjacency.nnz() / 2
    }

    pub fn neighbors(&self, node: usize) -> &[usize] {
        let (lb, ub) = self.col_range(node);
        &self.adjacency.row_indices()[lb..ub]
    }

    /// Weights of the edges leaving `node`, parallel to `neighbors(node)`
    pub fn out_weights(&self, node: usize) -> &[f32] {
        let (lb, ub) = self.col_range(node);
        &self.adjacency.values()[lb..ub]
    }

    pub fn degree(&self, node: usize) -> usize {
        let (lb, ub) = self.col_range(node);
        ub - lb
    }

    pub fn out_weight_total(&self, node: usize) -> f32 {
        self.out_weights(node).iter().sum()
    }

    pub fn cell(&self, node: usize) -> CellId {
        self.cells[node]
    }

    /// Sample of origin of every node
    pub fn node_samples(&self) -> Vec<usize> {
        self.cells.iter().map(|c| c.sample).collect()
    }

    pub fn node_index(&self, cell_name: &str) -> Option<usize> {
        self.name_index.get(cell_name).copied()
    }

    pub fn cell_names(&self) -> &[Box<str>] {
        &self.names
    }

    /// Column `i` = outgoing weights of node `i`
    pub fn adjacency(&self) -> &CscMatrix<f32> {
        &self.adjacency
    }

    /// Undirected edges `(i, j, w)` with `i < j`, `w` the mean of the
    /// two directed weights
    pub fn edge_list(&self) -> Vec<(usize, usize, f32)> {
        let mut ret = Vec::with_capacity(self.num_edges());
        for i in 0..self.num_nodes() {
            for (&j, &w_ij) in self.neighbors(i).iter().zip(self.out_weights(i)) {
                if i < j {
                    let w_ji = self.weight(j, i).unwrap_or(w_ij);
                    ret.push((i, j, 0.5 * (w_ij + w_ji)));
                }
            }
        }
        ret
    }

    /// Weight of the directed edge `from -> to`
    pub fn weight(&self, from: usize, to: usize) -> Option<f32> {
        let nbrs = self.neighbors(from);
        nbrs.binary_search(&to)
            .ok()
            .map(|k| self.out_weights(from)[k])
    }

    /// Component label of every node, numbered in order of the first
    /// node of each component
    pub fn connected_components(&self) -> Vec<usize> {
        let nn = self.num_nodes();
        let mut label = vec![usize::MAX; nn];
        let mut ncomp = 0;
        let mut stack = Vec::new();
        for root in 0..nn {
            if label[root] != usize::MAX {
                continue;
            }
            label[root] = ncomp;
            stack.push(root);
            while let Some(i) = stack.pop() {
                for &j in self.neighbors(i) {
                    if label[j] == usize::MAX {
                        label[j] = ncomp;
                        stack.push(j);
                    }
                }
            }
            ncomp += 1;
        }
        label
    }

    pub fn num_components(&self) -> usize {
        self.connected_components()
            .into_iter()
            .max()
            .map_or(0, |m| m + 1)
    }

    /// Same nodes and edges with new outgoing weights, given in the
    /// storage order of `adjacency().values()`
    pub fn with_out_weights(&self, values: Vec<f32>) -> Result<Self> {
        let adjacency =
            CscMatrix::try_from_pattern_and_values(self.adjacency.pattern().clone(), values)
                .map_err(|e| JointError::GraphAssembly(e.to_string()))?;
        Ok(Self {
            cells: self.cells.clone(),
            names: self.names.clone(),
            name_index: self.name_index.clone(),
            adjacency,
        })
    }

    fn col_range(&self, node: usize) -> (usize, usize) {
        let offsets = self.adjacency.col_offsets();
        (offsets[node], offsets[node + 1])
    }
}

/// Matches of one sample pair
#[derive(Clone, Debug)]
pub struct PairMatches {
    pub sample_a: usize,
    pub sample_b: usize,
    pub edges: Vec<MatchEdge>,
}

/// Within-sample edges `(i, j, w)` in local indices with `i < j`
///
/// A `k_self` neighbour graph (union of directions) over the sample's
/// embedding, or over a PCA of its top over-dispersed genes when it has
/// none; kernel weights are scaled by `k_self_weight`.
pub fn intra_sample_edges(
    registry: &SampleRegistry,
    sample: usize,
    config: &JointConfig,
) -> Result<Vec<(usize, usize, f32)>> {
    let s = registry.sample(sample);
    let ncells = s.num_cells();
    if ncells < 2 || config.k_self == 0 {
        return Ok(vec![]);
    }

    let mut coords = match &s.embedding {
        Some(emb) => emb.clone(),
        None => self_pca(registry, sample, config)?,
    };

    if config.metric == Metric::Angular {
        coords.normalize_rows_inplace();
    }

    let knn = KnnGraph::from_rows(
        &coords,
        &KnnGraphArgs {
            knn: config.k_self,
            block_size: config.block_size,
            reciprocal: false,
            approx_threshold: config.approx_threshold,
            seed: config.seed,
        },
    )?;

    let weights = knn.exp_kernel_weights();
    Ok(knn
        .edges
        .iter()
        .zip(weights)
        .map(|(&(i, j), w)| (i, j, w * config.k_self_weight))
        .collect())
}

/// Cells x components of the centred top over-dispersed genes
fn self_pca(
    registry: &SampleRegistry,
    sample: usize,
    config: &JointConfig,
) -> Result<DMatrix<f32>> {
    let s = registry.sample(sample);
    let rows = registry.od_genes(sample, config.n_odgenes);
    let xx = dense_transpose_rows(&s.counts, rows).centre_columns();

    let rank = config.ncomps.min(xx.nrows()).min(xx.ncols());
    if rank == 0 || xx.norm_squared() <= 0.0 {
        return Ok(xx);
    }
    let (_, _, vv) = xx.rsvd_seeded(rank, config.seed)?;
    Ok(xx * vv)
}

/// Put all nodes and edges together
///
/// `intra[s]` holds sample `s`'s own edges in local indices. The same
/// undirected edge coming from several sources is combined by `merge`
/// after sorting the contributions, so the result does not depend on
/// the order of `matches`.
pub fn assemble(
    registry: &SampleRegistry,
    intra: &[Vec<(usize, usize, f32)>],
    matches: &[PairMatches],
    merge: EdgeMerge,
) -> Result<JointGraph> {
    let nn = registry.num_cells();
    if nn == 0 {
        return Err(JointError::GraphAssembly("no cells registered".into()));
    }
    if intra.len() != registry.len() {
        return Err(JointError::GraphAssembly(format!(
            "within-sample edges for {} samples, {} registered",
            intra.len(),
            registry.len()
        )));
    }

    let offsets = registry.offsets();
    let mut contributions: Vec<(usize, usize, f32)> = Vec::new();

    let mut push = |u: usize, v: usize, w: f32| {
        if u != v && w.is_finite() && w > 0.0 {
            contributions.push((u.min(v), u.max(v), w));
        }
    };

    for (s, edges) in intra.iter().enumerate() {
        for &(i, j, w) in edges {
            push(offsets[s] + i, offsets[s] + j, w);
        }
    }

    for pm in matches {
        for e in &pm.edges {
            push(offsets[pm.sample_a] + e.a, offsets[pm.sample_b] + e.b, e.weight);
        }
    }

    let ncontrib = contributions.len();
    let merged = merge_edges(contributions, merge);

    let mut coo = CooMatrix::new(nn, nn);
    for &(u, v, w) in &merged {
        coo.push(v, u, w);
        coo.push(u, v, w);
    }
    let adjacency = CscMatrix::from(&coo);

    let mut cells = Vec::with_capacity(nn);
    let mut names = Vec::with_capacity(nn);
    for (s, sample) in registry.samples().iter().enumerate() {
        for (local, name) in sample.cell_names.iter().enumerate() {
            cells.push(CellId { sample: s, local });
            names.push(name.clone());
        }
    }
    let name_index = names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.clone(), i))
        .collect();

    info!(
        "joint graph: {} nodes, {} edges from {} contributions",
        nn,
        merged.len(),
        ncontrib
    );

    Ok(JointGraph {
        cells,
        names,
        name_index,
        adjacency,
    })
}

/// Combine duplicate `(u, v)` contributions; the input order is
/// irrelevant since contributions are sorted first
fn merge_edges(
    mut contributions: Vec<(usize, usize, f32)>,
    merge: EdgeMerge,
) -> Vec<(usize, usize, f32)> {
    contributions.sort_by(|x, y| (x.0, x.1).cmp(&(y.0, y.1)).then(x.2.total_cmp(&y.2)));

    let mut merged: Vec<(usize, usize, f32)> = Vec::with_capacity(contributions.len());
    let mut acc = 0_f64;
    for &(u, v, w) in &contributions {
        let same = merged.last().is_some_and(|&(pu, pv, _)| (pu, pv) == (u, v));
        if same {
            if let Some(last) = merged.last_mut() {
                match merge {
                    EdgeMerge::Max => last.2 = last.2.max(w),
                    EdgeMerge::Sum => {
                        acc += w as f64;
                        last.2 = acc as f32;
                    }
                }
            }
        } else {
            acc = w as f64;
            merged.push((u, v, w));
        }
    }
    merged
}
