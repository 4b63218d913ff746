use crate::sample::Sample;

use log::info;
use matrix_util::common_io::write_lines;
use matrix_util::mtx_io::write_mtx_triplets;
use matrix_util::traits::{MatTriplets, SampleOps};
use nalgebra::DMatrix;
use nalgebra_sparse::CscMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

pub struct SimArgs {
    pub ncells: usize,
    pub ngenes: usize,
    pub ncelltypes: usize,
    /// expression added to every gene of the second sample
    pub batch_offset: f32,
    /// standard deviation of the per-cell noise
    pub noise: f32,
    pub rseed: u64,
}

impl Default for SimArgs {
    fn default() -> Self {
        Self {
            ncells: 100,
            ngenes: 50,
            ncelltypes: 3,
            batch_offset: 2.0,
            noise: 0.3,
            rseed: 42,
        }
    }
}

/// A simulated sample with the true cell type of each cell
pub struct SimSample {
    pub sample: Sample,
    pub cell_types: Vec<Box<str>>,
}

/// Expression `cells x genes`: each cell type lifts its own block of
/// marker genes above a common baseline; cell `j` has type
/// `j % ncelltypes`
///
/// ```text
/// X(j, g) = max(0, 1 + 4 * [g in block(type(j))] + noise * N(0,1))
/// ```
pub fn simulate_expression(args: &SimArgs) -> anyhow::Result<(DMatrix<f32>, Vec<usize>)> {
    let ntypes = args.ncelltypes.max(1);
    let block = args.ngenes.div_ceil(ntypes).max(1);
    let types: Vec<usize> = (0..args.ncells).map(|j| j % ntypes).collect();

    let mut rng = StdRng::seed_from_u64(args.rseed);
    let normal = Normal::new(0_f32, args.noise.max(0.0))?;

    let xx = DMatrix::<f32>::from_fn(args.ncells, args.ngenes, |j, g| {
        let marker = if g / block == types[j] { 4.0 } else { 0.0 };
        (1.0 + marker + normal.sample(&mut rng)).max(0.0)
    });
    Ok((xx, types))
}

fn to_sample(id: &str, xx: &DMatrix<f32>, cell_prefix: &str) -> anyhow::Result<Sample> {
    let triplets: Vec<(usize, usize, f32)> = xx
        .iter()
        .enumerate()
        .filter(|&(_, &x)| x > 0.0)
        .map(|(k, &x)| (k % xx.nrows(), k / xx.nrows(), x))
        .map(|(cell, gene, x)| (gene, cell, x))
        .collect();

    let counts = CscMatrix::from_nonzero_triplets(xx.ncols(), xx.nrows(), triplets)?;

    let genes = (0..xx.ncols()).map(|g| format!("gene{}", g).into()).collect();
    let cells = (0..xx.nrows())
        .map(|j| format!("{}{}", cell_prefix, j).into())
        .collect();
    Ok(Sample::new(id, counts, genes, cells))
}

fn type_names(types: &[usize]) -> Vec<Box<str>> {
    types.iter().map(|t| format!("type{}", t).into()).collect()
}

/// `ncells` cells `{prefix}{j}` with one constant gene, for graphs
/// whose edges are given directly
pub fn blank_sample(id: &str, ncells: usize, prefix: &str) -> anyhow::Result<Sample> {
    let xx = DMatrix::<f32>::from_element(ncells, 1, 1.0);
    to_sample(id, &xx, prefix)
}

/// Two samples with the same cells; only the cell names differ
pub fn self_copy_pair(args: &SimArgs) -> anyhow::Result<(Sample, Sample)> {
    let (xx, _) = simulate_expression(args)?;
    Ok((to_sample("orig", &xx, "o_")?, to_sample("copy", &xx, "c_")?))
}

/// Two samples with identical profiles, the second shifted by
/// `batch_offset` on every gene
pub fn batch_offset_pair(args: &SimArgs) -> anyhow::Result<(SimSample, SimSample)> {
    let (xx, types) = simulate_expression(args)?;
    let yy = xx.add_scalar(args.batch_offset);

    Ok((
        SimSample {
            sample: to_sample("batch1", &xx, "b1_")?,
            cell_types: type_names(&types),
        },
        SimSample {
            sample: to_sample("batch2", &yy, "b2_")?,
            cell_types: type_names(&types),
        },
    ))
}

/// `nsamples` samples with independent noise, each shifted by a random
/// per-sample offset
pub fn simulate_batches(args: &SimArgs, nsamples: usize) -> anyhow::Result<Vec<SimSample>> {
    let offsets = DMatrix::<f32>::runif(nsamples, 1, args.rseed);
    (0..nsamples)
        .map(|s| {
            let sub = SimArgs {
                rseed: args.rseed.wrapping_add(1 + s as u64),
                ..*args
            };
            let (xx, types) = simulate_expression(&sub)?;
            let xx = xx.add_scalar(args.batch_offset * offsets[s]);
            Ok(SimSample {
                sample: to_sample(&format!("sample{}", s), &xx, &format!("s{}_", s))?,
                cell_types: type_names(&types),
            })
        })
        .collect()
}

/// Write each simulated sample as `{dir}/{id}.mtx.gz` with
/// `.genes.gz`, `.cells.gz` and `.types.gz` companions
pub fn write_simulated(samples: &[SimSample], dir: &str) -> anyhow::Result<()> {
    for sim in samples {
        let s = &sim.sample;
        let hdr = format!("{}/{}", dir, s.id);
        let (nrow, ncol, triplets) = s.counts.to_nonzero_triplets()?;
        write_mtx_triplets(&triplets, nrow, ncol, &format!("{}.mtx.gz", hdr))?;
        write_lines(&s.gene_names, &format!("{}.genes.gz", hdr))?;
        write_lines(&s.cell_names, &format!("{}.cells.gz", hdr))?;
        let typed: Vec<Box<str>> = s
            .cell_names
            .iter()
            .zip(sim.cell_types.iter())
            .map(|(c, t)| format!("{}\t{}", c, t).into())
            .collect();
        write_lines(&typed, &format!("{}.types.gz", hdr))?;
        info!("wrote {}.mtx.gz [{} x {}]", hdr, nrow, ncol);
    }
    Ok(())
}
