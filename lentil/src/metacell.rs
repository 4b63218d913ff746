use crate::error::{JointError, Result};
use crate::rebalance::factor_levels;
use crate::sample::SampleRegistry;

use fnv::FnvHashMap as HashMap;
use log::info;
use nalgebra::DMatrix;
use std::collections::BTreeMap;

/// Counts of one cluster summed per sample
#[derive(Clone, Debug)]
pub struct PooledCounts {
    pub cluster: usize,
    pub samples: Vec<Box<str>>,
    /// sorted union of the gene names of all samples
    pub genes: Vec<Box<str>>,
    /// samples x genes
    pub counts: DMatrix<f32>,
    /// cells of each sample in the cluster
    pub ncells: Vec<usize>,
}

/// Sum the counts of the cells of each cluster within each sample
///
/// * `membership` - cluster of every cell, in registration order
///
/// Genes missing from a sample count as zero there.
pub fn pool_by_cluster(
    registry: &SampleRegistry,
    membership: &[usize],
) -> Result<Vec<PooledCounts>> {
    if membership.len() != registry.num_cells() {
        return Err(JointError::input(format!(
            "{} cluster labels for {} cells",
            membership.len(),
            registry.num_cells()
        )));
    }

    let mut genes: Vec<Box<str>> = registry
        .samples()
        .iter()
        .flat_map(|s| s.gene_names.iter().cloned())
        .collect();
    genes.sort();
    genes.dedup();
    let gene_col: HashMap<&str, usize> = genes
        .iter()
        .enumerate()
        .map(|(g, name)| (name.as_ref(), g))
        .collect();

    let nsamples = registry.len();
    let samples: Vec<Box<str>> = registry.samples().iter().map(|s| s.id.clone()).collect();

    let mut pooled: BTreeMap<usize, (DMatrix<f32>, Vec<usize>)> = BTreeMap::new();

    for (s, sample) in registry.samples().iter().enumerate() {
        let row_to_col: Vec<usize> = sample
            .gene_names
            .iter()
            .map(|g| gene_col[g.as_ref()])
            .collect();

        let offset = registry.offsets()[s];
        let col_offsets = sample.counts.col_offsets();
        let rows = sample.counts.row_indices();
        let values = sample.counts.values();

        for j in 0..sample.num_cells() {
            let k = membership[offset + j];
            let (mat, ncells) = pooled
                .entry(k)
                .or_insert_with(|| (DMatrix::zeros(nsamples, genes.len()), vec![0; nsamples]));
            ncells[s] += 1;
            for idx in col_offsets[j]..col_offsets[j + 1] {
                mat[(s, row_to_col[rows[idx]])] += values[idx];
            }
        }
    }

    info!(
        "pooled {} cells into {} clusters x {} samples x {} genes",
        membership.len(),
        pooled.len(),
        nsamples,
        genes.len()
    );

    Ok(pooled
        .into_iter()
        .map(|(cluster, (counts, ncells))| PooledCounts {
            cluster,
            samples: samples.clone(),
            genes: genes.clone(),
            counts,
            ncells,
        })
        .collect())
}

/// Cluster of every cell taken from the samples' own clusterings
///
/// Labels with the same name are the same cluster in every sample.
/// Returns the codes in registration order and the sorted cluster
/// names, or `None` unless every sample carries a clustering.
pub fn sample_clusterings(registry: &SampleRegistry) -> Option<(Vec<usize>, Vec<Box<str>>)> {
    if registry.is_empty() {
        return None;
    }
    let mut labels: Vec<Box<str>> = Vec::with_capacity(registry.num_cells());
    for sample in registry.samples() {
        labels.extend(sample.clustering.as_ref()?.iter().cloned());
    }
    Some(factor_levels(&labels))
}
