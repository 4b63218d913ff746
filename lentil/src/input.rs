use crate::rebalance::factor_levels;
use crate::sample::{Sample, SampleRegistry};

use log::info;
use matrix_util::common_io::{read_key_value_pairs, read_lines_of_words, ReadLinesOut};
use matrix_util::mtx_io::read_mtx_triplets;
use matrix_util::traits::MatTriplets;
use nalgebra::DMatrix;
use nalgebra_sparse::CscMatrix;
use std::path::Path;

/// Files of one sample
///
/// The matrix is `genes x cells` in MatrixMarket format; names files
/// have one name per line (first column).
#[derive(Clone, Debug)]
pub struct SampleFiles {
    pub id: Box<str>,
    pub mtx: Box<str>,
    pub genes: Box<str>,
    pub cells: Box<str>,
    /// cells x dimensions, whitespace separated
    pub embedding: Option<Box<str>>,
    /// genes, most over-dispersed first
    pub od_genes: Option<Box<str>>,
    /// one cluster label per cell, in cell order
    pub clustering: Option<Box<str>>,
}

impl SampleFiles {
    /// `{hdr}.mtx.gz`, `{hdr}.genes.gz`, `{hdr}.cells.gz`, and, if they
    /// exist, `{hdr}.embedding.gz`, `{hdr}.odgenes.gz` and
    /// `{hdr}.clusters.gz`; the sample is named after the last path
    /// component of `hdr`
    pub fn from_header(hdr: &str) -> Self {
        let id = Path::new(hdr)
            .file_name()
            .and_then(|x| x.to_str())
            .unwrap_or(hdr);
        let optional = |ext: &str| {
            let file = format!("{}.{}", hdr, ext);
            Path::new(&file).exists().then(|| file.into_boxed_str())
        };
        Self {
            id: id.into(),
            mtx: format!("{}.mtx.gz", hdr).into(),
            genes: format!("{}.genes.gz", hdr).into(),
            cells: format!("{}.cells.gz", hdr).into(),
            embedding: optional("embedding.gz"),
            od_genes: optional("odgenes.gz"),
            clustering: optional("clusters.gz"),
        }
    }
}

pub fn read_sample(files: &SampleFiles) -> anyhow::Result<Sample> {
    info!("reading sample `{}` from {}", files.id, files.mtx);

    let (triplets, shape) = read_mtx_triplets(&files.mtx)?;
    let counts = CscMatrix::from_nonzero_triplets(shape.nrow, shape.ncol, triplets)?;

    let mut sample = Sample::new(
        &files.id,
        counts,
        read_names(&files.genes)?,
        read_names(&files.cells)?,
    );

    if let Some(file) = &files.embedding {
        sample = sample.with_embedding(read_dense(file)?);
    }
    if let Some(file) = &files.od_genes {
        sample = sample.with_od_genes(read_names(file)?);
    }
    if let Some(file) = &files.clustering {
        sample = sample.with_clustering(read_names(file)?);
    }
    Ok(sample)
}

/// First word of every line
pub fn read_names(file: &str) -> anyhow::Result<Vec<Box<str>>> {
    let ReadLinesOut { lines, .. } = read_lines_of_words(file, -1)?;
    lines
        .into_iter()
        .enumerate()
        .map(|(i, words)| {
            words
                .into_iter()
                .next()
                .ok_or_else(|| anyhow::anyhow!("{}: line {} is empty", file, i + 1))
        })
        .collect()
}

/// Whitespace separated numbers, one row per line
pub fn read_dense(file: &str) -> anyhow::Result<DMatrix<f32>> {
    let ReadLinesOut { lines, .. } = read_lines_of_words(file, -1)?;
    let nrow = lines.len();
    let ncol = lines.first().map_or(0, |x| x.len());

    let mut data = Vec::with_capacity(nrow * ncol);
    for (i, words) in lines.iter().enumerate() {
        if words.len() != ncol {
            anyhow::bail!(
                "{}: line {} has {} columns, expected {}",
                file,
                i + 1,
                words.len(),
                ncol
            );
        }
        for w in words {
            data.push(w.parse::<f32>()?);
        }
    }
    Ok(DMatrix::from_row_slice(nrow, ncol, &data))
}

/// `(cell, label)` pairs
pub fn read_labels(file: &str) -> anyhow::Result<Vec<(Box<str>, Box<str>)>> {
    let labels = read_key_value_pairs(file)?;
    info!("{} labelled cells in {}", labels.len(), file);
    Ok(labels)
}

/// Level of every registered cell from a `(cell, level)` file, coded in
/// registration order; returns the codes and the sorted level names
pub fn read_cell_levels(
    file: &str,
    registry: &SampleRegistry,
) -> anyhow::Result<(Vec<usize>, Vec<Box<str>>)> {
    let mut levels: Vec<Option<Box<str>>> = vec![None; registry.num_cells()];
    for (cell, level) in read_key_value_pairs(file)? {
        // cells of samples not in this run are ignored
        if let Some(c) = registry.cell_id(&cell) {
            levels[registry.node_index(c)] = Some(level);
        }
    }

    let mut named = Vec::with_capacity(levels.len());
    for (i, level) in levels.into_iter().enumerate() {
        match level {
            Some(l) => named.push(l),
            None => anyhow::bail!("{}: no level for cell #{}", file, i),
        }
    }
    Ok(factor_levels(&named))
}
