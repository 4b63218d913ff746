use crate::error::{JointError, Result};

use fnv::FnvHashMap as HashMap;
use log::info;
use matrix_util::traits::SparseStatOps;
use nalgebra::DMatrix;
use nalgebra_sparse::CscMatrix;
use std::sync::Arc;

/// One specimen's measurements
///
/// Any upstream pipeline can produce this: a nonnegative `gene x cell`
/// matrix with names, and optionally a per-cell embedding, a
/// clustering, and an over-dispersion ranking of genes.
#[derive(Clone, Debug)]
pub struct Sample {
    pub id: Box<str>,
    /// genes x cells
    pub counts: CscMatrix<f32>,
    pub gene_names: Vec<Box<str>>,
    pub cell_names: Vec<Box<str>>,
    /// cells x dimensions, used for within-sample neighbours
    pub embedding: Option<DMatrix<f32>>,
    pub clustering: Option<Vec<Box<str>>>,
    /// genes from most to least over-dispersed
    pub od_genes: Option<Vec<Box<str>>>,
}

impl Sample {
    pub fn new(
        id: &str,
        counts: CscMatrix<f32>,
        gene_names: Vec<Box<str>>,
        cell_names: Vec<Box<str>>,
    ) -> Self {
        Self {
            id: id.into(),
            counts,
            gene_names,
            cell_names,
            embedding: None,
            clustering: None,
            od_genes: None,
        }
    }

    pub fn with_embedding(mut self, embedding: DMatrix<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_clustering(mut self, clustering: Vec<Box<str>>) -> Self {
        self.clustering = Some(clustering);
        self
    }

    pub fn with_od_genes(mut self, od_genes: Vec<Box<str>>) -> Self {
        self.od_genes = Some(od_genes);
        self
    }

    pub fn num_cells(&self) -> usize {
        self.counts.ncols()
    }

    pub fn num_genes(&self) -> usize {
        self.counts.nrows()
    }
}

/// Global node id of a cell: sample index and column within the sample
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId {
    pub sample: usize,
    pub local: usize,
}

/// Registered samples, read-only once registered
#[derive(Default)]
pub struct SampleRegistry {
    samples: Vec<Arc<Sample>>,
    sample_index: HashMap<Box<str>, usize>,
    cell_index: HashMap<Box<str>, CellId>,
    gene_index: Vec<HashMap<Box<str>, usize>>,
    gene_ranking: Vec<Vec<usize>>,
    offsets: Vec<usize>,
    ncells: usize,
}

impl SampleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and add a sample; returns its index
    pub fn register(&mut self, sample: Sample) -> Result<usize> {
        if self.sample_index.contains_key(&sample.id) {
            return Err(JointError::input(format!(
                "sample `{}` is already registered",
                sample.id
            )));
        }

        let (ngenes, ncells) = (sample.num_genes(), sample.num_cells());

        if sample.gene_names.len() != ngenes {
            return Err(JointError::input(format!(
                "sample `{}`: {} gene names for {} matrix rows",
                sample.id,
                sample.gene_names.len(),
                ngenes
            )));
        }

        if sample.cell_names.len() != ncells {
            return Err(JointError::input(format!(
                "sample `{}`: {} cell names for {} matrix columns",
                sample.id,
                sample.cell_names.len(),
                ncells
            )));
        }

        if sample.counts.values().iter().any(|x| !x.is_finite() || *x < 0.0) {
            return Err(JointError::input(format!(
                "sample `{}` has negative or non-finite values",
                sample.id
            )));
        }

        if let Some(emb) = &sample.embedding {
            if emb.nrows() != ncells || emb.ncols() == 0 {
                return Err(JointError::input(format!(
                    "sample `{}`: embedding is [{} x {}] for {} cells",
                    sample.id,
                    emb.nrows(),
                    emb.ncols(),
                    ncells
                )));
            }
        }

        if let Some(clust) = &sample.clustering {
            if clust.len() != ncells {
                return Err(JointError::input(format!(
                    "sample `{}`: {} cluster labels for {} cells",
                    sample.id,
                    clust.len(),
                    ncells
                )));
            }
        }

        let mut genes = HashMap::<Box<str>, usize>::default();
        for (g, name) in sample.gene_names.iter().enumerate() {
            if genes.insert(name.clone(), g).is_some() {
                return Err(JointError::input(format!(
                    "sample `{}`: gene `{}` appears twice",
                    sample.id, name
                )));
            }
        }

        // every cell name must be new, within and across samples
        let sample_idx = self.samples.len();
        let mut new_cells = HashMap::<Box<str>, CellId>::default();
        for (local, name) in sample.cell_names.iter().enumerate() {
            let first = if new_cells.contains_key(name) {
                Some(sample.id.clone())
            } else {
                self.cell_index
                    .get(name)
                    .map(|c| self.samples[c.sample].id.clone())
            };
            if let Some(first) = first {
                return Err(JointError::DuplicateCellId {
                    cell: name.clone(),
                    first,
                    second: sample.id.clone(),
                });
            }
            new_cells.insert(
                name.clone(),
                CellId {
                    sample: sample_idx,
                    local,
                },
            );
        }

        let ranking = rank_genes(&sample, &genes);

        info!(
            "registered sample `{}`: {} genes x {} cells",
            sample.id, ngenes, ncells
        );

        self.cell_index.extend(new_cells);
        self.sample_index.insert(sample.id.clone(), sample_idx);
        self.gene_index.push(genes);
        self.gene_ranking.push(ranking);
        self.offsets.push(self.ncells);
        self.ncells += ncells;
        self.samples.push(Arc::new(sample));
        Ok(sample_idx)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_cells(&self) -> usize {
        self.ncells
    }

    pub fn sample(&self, idx: usize) -> &Arc<Sample> {
        &self.samples[idx]
    }

    pub fn samples(&self) -> &[Arc<Sample>] {
        &self.samples
    }

    pub fn sample_by_id(&self, id: &str) -> Option<usize> {
        self.sample_index.get(id).copied()
    }

    pub fn cell_id(&self, name: &str) -> Option<CellId> {
        self.cell_index.get(name).copied()
    }

    pub fn cell_name(&self, cell: CellId) -> &str {
        &self.samples[cell.sample].cell_names[cell.local]
    }

    /// Position of the cell in the node list of a joint graph
    pub fn node_index(&self, cell: CellId) -> usize {
        self.offsets[cell.sample] + cell.local
    }

    /// First node index of each sample
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn gene_position(&self, sample: usize, gene: &str) -> Option<usize> {
        self.gene_index[sample].get(gene).copied()
    }

    /// Row indices of the top `n` over-dispersed genes of a sample
    pub fn od_genes(&self, sample: usize, n: usize) -> &[usize] {
        let ranking = &self.gene_ranking[sample];
        &ranking[..n.min(ranking.len())]
    }
}

/// Provided over-dispersion order if there is one (unknown names are
/// dropped), else genes by decreasing variance across cells
fn rank_genes(sample: &Sample, genes: &HashMap<Box<str>, usize>) -> Vec<usize> {
    if let Some(od) = &sample.od_genes {
        let mut seen = vec![false; sample.num_genes()];
        return od
            .iter()
            .filter_map(|g| genes.get(g).copied())
            .filter(|&g| !std::mem::replace(&mut seen[g], true))
            .collect();
    }

    let (_, var) = sample.counts.row_mean_variance();
    let mut order: Vec<usize> = (0..var.len()).collect();
    order.sort_by(|&a, &b| var[b].total_cmp(&var[a]).then(a.cmp(&b)));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrix_util::traits::MatTriplets;

    fn names(prefix: &str, n: usize) -> Vec<Box<str>> {
        (0..n).map(|i| format!("{}{}", prefix, i).into()).collect()
    }

    fn toy(id: &str, cell_prefix: &str) -> Sample {
        // gene 1 varies most, gene 0 is constant
        let triplets = vec![
            (0_usize, 0_usize, 1.0_f32),
            (0, 1, 1.0),
            (0, 2, 1.0),
            (1, 0, 9.0),
            (2, 1, 1.0),
        ];
        let counts = CscMatrix::from_nonzero_triplets(3, 3, triplets).unwrap();
        Sample::new(id, counts, names("g", 3), names(cell_prefix, 3))
    }

    #[test]
    fn register_and_look_up() -> Result<()> {
        let mut reg = SampleRegistry::new();
        reg.register(toy("s1", "a"))?;
        let s2 = reg.register(toy("s2", "b"))?;

        assert_eq!(reg.len(), 2);
        assert_eq!(reg.num_cells(), 6);
        let c = reg.cell_id("b2").unwrap();
        assert_eq!(c, CellId { sample: s2, local: 2 });
        assert_eq!(reg.node_index(c), 5);
        assert_eq!(reg.cell_name(c), "b2");
        assert_eq!(reg.od_genes(0, 1), &[1]);
        assert_eq!(reg.gene_position(1, "g2"), Some(2));
        Ok(())
    }

    #[test]
    fn duplicate_cells_across_samples_are_rejected() {
        let mut reg = SampleRegistry::new();
        reg.register(toy("s1", "a")).unwrap();
        let err = reg.register(toy("s2", "a")).unwrap_err();
        assert!(matches!(err, JointError::DuplicateCellId { .. }));
        // failed registration leaves the registry untouched
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.num_cells(), 3);
    }

    #[test]
    fn duplicate_cells_within_sample_are_rejected() {
        let mut sample = toy("s1", "a");
        sample.cell_names[2] = "a0".into();
        let err = SampleRegistry::new().register(sample).unwrap_err();
        assert!(matches!(err, JointError::DuplicateCellId { .. }));
    }

    #[test]
    fn shape_mismatch_and_negative_values_are_rejected() {
        let mut sample = toy("s1", "a");
        sample.cell_names.pop();
        assert!(matches!(
            SampleRegistry::new().register(sample),
            Err(JointError::Input(_))
        ));

        let mut sample = toy("s1", "a");
        sample.counts.values_mut()[0] = -1.0;
        assert!(matches!(
            SampleRegistry::new().register(sample),
            Err(JointError::Input(_))
        ));

        let sample = toy("s1", "a").with_embedding(DMatrix::zeros(2, 2));
        assert!(SampleRegistry::new().register(sample).is_err());
    }

    #[test]
    fn provided_gene_ranking_wins() -> Result<()> {
        let sample = toy("s1", "a").with_od_genes(vec!["g2".into(), "nope".into(), "g0".into()]);
        let mut reg = SampleRegistry::new();
        reg.register(sample)?;
        assert_eq!(reg.od_genes(0, 10), &[2, 0]);
        Ok(())
    }
}
