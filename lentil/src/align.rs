//! Pairwise alignment: embed the cells of two samples into one space
//!
//! Every method works on the shared over-dispersed genes of the pair
//! and returns coordinates for the cells of both samples in the same
//! space. Nothing here touches the cache; see `cache::PairCache`.

use crate::cancel::CancelToken;
use crate::config::{AlignParams, ComparisonSpace};
use crate::error::{JointError, Result};
use crate::sample::SampleRegistry;

use log::debug;
use matrix_util::dmatrix_rsvd::RSVD;
use matrix_util::dmatrix_util::dense_transpose_rows;
use matrix_util::traits::MatOps;
use nalgebra::{DMatrix, DVector};

pub type Mat = DMatrix<f32>;

/// Fewest shared genes a pair can be aligned on
pub const MIN_SHARED_GENES: usize = 2;

const CPCA_MAX_ITER: usize = 50;
const CPCA_TOL: f32 = 1e-6;
const EPS: f32 = 1e-8;

/// How much of the pair's structure the joint space keeps
#[derive(Clone, Debug, PartialEq)]
pub struct AlignmentQuality {
    pub n_genes: usize,
    pub n_components: usize,
    /// fraction of total variance (or cross-product energy for CCA)
    /// captured by the retained components
    pub variance_captured: f32,
}

/// Joint coordinates of two samples; immutable once computed
#[derive(Clone, Debug, PartialEq)]
pub struct PairAlignment {
    pub sample_a: usize,
    pub sample_b: usize,
    pub space: ComparisonSpace,
    pub params: AlignParams,
    /// cells of A x components
    pub coords_a: Mat,
    /// cells of B x components
    pub coords_b: Mat,
    pub quality: AlignmentQuality,
}

/// Embed samples `a` and `b` of the registry in a common space
pub fn align_pair(
    registry: &SampleRegistry,
    a: usize,
    b: usize,
    space: ComparisonSpace,
    params: &AlignParams,
    cancel: &CancelToken,
) -> Result<PairAlignment> {
    let sa = registry.sample(a);
    let sb = registry.sample(b);
    let fail = |reason: String| JointError::alignment(&sa.id, &sb.id, reason);

    if a == b {
        return Err(fail("a sample cannot be aligned with itself".into()));
    }

    for s in [sa, sb] {
        if s.num_cells() < params.k.max(1) {
            return Err(fail(format!(
                "`{}` has {} cells, fewer than k = {}",
                s.id,
                s.num_cells(),
                params.k
            )));
        }
    }

    let genes = shared_od_genes(registry, a, b, params.n_odgenes);
    if genes.len() < MIN_SHARED_GENES {
        return Err(fail(format!(
            "{} shared genes, need at least {}",
            genes.len(),
            MIN_SHARED_GENES
        )));
    }

    let rows_a: Vec<usize> = genes.iter().map(|&(ga, _)| ga).collect();
    let rows_b: Vec<usize> = genes.iter().map(|&(_, gb)| gb).collect();
    let xa = dense_transpose_rows(&sa.counts, &rows_a);
    let xb = dense_transpose_rows(&sb.counts, &rows_b);

    cancel.check("alignment")?;

    debug!(
        "aligning `{}` [{}] and `{}` [{}] by {} on {} genes",
        sa.id,
        xa.nrows(),
        sb.id,
        xb.nrows(),
        space,
        genes.len()
    );

    let (coords_a, coords_b, n_components, variance_captured) = match space {
        ComparisonSpace::Pca => pca_coords(&xa, &xb, params)?,
        ComparisonSpace::Cpca => cpca_coords(&xa, &xb, params, cancel)?,
        ComparisonSpace::Cca => cca_coords(&xa, &xb, params)?,
        ComparisonSpace::Genes => {
            let nn = xa.ncols();
            Some((xa, xb, nn, 1.0))
        }
    }
    .ok_or_else(|| {
        fail(format!(
            "no shared variance in the {} space (ill-conditioned covariance)",
            space
        ))
    })?;

    if n_components == 0 {
        return Err(fail("no usable components".into()));
    }

    Ok(PairAlignment {
        sample_a: a,
        sample_b: b,
        space,
        params: params.clone(),
        coords_a,
        coords_b,
        quality: AlignmentQuality {
            n_genes: genes.len(),
            n_components,
            variance_captured,
        },
    })
}

/// Union of both samples' top over-dispersed genes that are measured in
/// both, as `(row in a, row in b)` ordered by gene name
pub fn shared_od_genes(
    registry: &SampleRegistry,
    a: usize,
    b: usize,
    n_odgenes: usize,
) -> Vec<(usize, usize)> {
    let sa = registry.sample(a);
    let sb = registry.sample(b);

    let mut names: Vec<&str> = registry
        .od_genes(a, n_odgenes)
        .iter()
        .map(|&g| sa.gene_names[g].as_ref())
        .chain(
            registry
                .od_genes(b, n_odgenes)
                .iter()
                .map(|&g| sb.gene_names[g].as_ref()),
        )
        .collect();
    names.sort_unstable();
    names.dedup();

    names
        .into_iter()
        .filter_map(|g| Some((registry.gene_position(a, g)?, registry.gene_position(b, g)?)))
        .collect()
}

type Coords = Option<(Mat, Mat, usize, f32)>;

fn stack_rows(top: &Mat, bottom: &Mat) -> Mat {
    let mut ret = Mat::zeros(top.nrows() + bottom.nrows(), top.ncols());
    ret.rows_mut(0, top.nrows()).copy_from(top);
    ret.rows_mut(top.nrows(), bottom.nrows()).copy_from(bottom);
    ret
}

/// PCA on the pooled cells after centring each sample on its own mean,
/// which removes constant per-sample shifts
fn pca_coords(xa: &Mat, xb: &Mat, params: &AlignParams) -> Result<Coords> {
    let za = xa.centre_columns();
    let zb = xb.centre_columns();
    let pooled = stack_rows(&za, &zb);

    let total = pooled.norm_squared();
    if total <= EPS {
        return Ok(None);
    }

    let rank = params.ncomps.min(pooled.ncols()).min(pooled.nrows());
    let (_, dd, vv) = pooled.rsvd_seeded(rank, params.seed)?;

    let kept = dd.iter().take_while(|&&d| d * d > EPS * total).count();
    if kept == 0 {
        return Ok(None);
    }
    let vv = vv.columns(0, kept).into_owned();
    let captured = dd.rows(0, kept).norm_squared() / total;

    Ok(Some((za * &vv, zb * &vv, kept, captured)))
}

/// Stepwise common principal components
///
/// Each component `q` solves
/// `q ∝ (I - QQᵀ) Σ_s (n_s / n) S_s q / (qᵀ S_s q)`,
/// the generalised eigenproblem of the per-sample covariances `S_s`
/// against their pooled sum, started from the pooled leading
/// eigenvector orthogonal to the previous components `Q`.
fn cpca_coords(xa: &Mat, xb: &Mat, params: &AlignParams, cancel: &CancelToken) -> Result<Coords> {
    let (na, nb) = (xa.nrows(), xb.nrows());
    if na < 2 || nb < 2 {
        return Ok(None);
    }

    let za = xa.centre_columns();
    let zb = xb.centre_columns();
    let cov_a = za.transpose() * &za / (na as f32 - 1.0);
    let cov_b = zb.transpose() * &zb / (nb as f32 - 1.0);
    let (wa, wb) = (
        na as f32 / (na + nb) as f32,
        nb as f32 / (na + nb) as f32,
    );
    let pooled = &cov_a * wa + &cov_b * wb;

    let total = pooled.trace();
    if total <= EPS {
        return Ok(None);
    }

    let eig = pooled.clone().symmetric_eigen();
    let mut order: Vec<usize> = (0..eig.eigenvalues.len()).collect();
    order.sort_by(|&i, &j| {
        eig.eigenvalues[j]
            .total_cmp(&eig.eigenvalues[i])
            .then(i.cmp(&j))
    });

    let ngenes = pooled.nrows();
    let rank = params.ncomps.min(ngenes);
    let mut basis: Vec<DVector<f32>> = Vec::with_capacity(rank);
    let mut captured = 0.0;

    for &start in order.iter().take(rank) {
        cancel.check("common PCA")?;

        let mut q = deflate(eig.eigenvectors.column(start).into_owned(), &basis);
        let norm = q.norm();
        if norm <= EPS {
            break;
        }
        q /= norm;

        let mut well_posed = true;
        for _ in 0..CPCA_MAX_ITER {
            let la = q.dot(&(&cov_a * &q));
            let lb = q.dot(&(&cov_b * &q));
            if la <= EPS * total || lb <= EPS * total {
                well_posed = false;
                break;
            }
            let s = &cov_a * &q * (wa / la) + &cov_b * &q * (wb / lb);
            let s = deflate(s, &basis);
            let norm = s.norm();
            if norm <= EPS {
                well_posed = false;
                break;
            }
            let next = s / norm;
            let change = (&next - &q).amax();
            q = next;
            if change < CPCA_TOL {
                break;
            }
        }

        if !well_posed {
            // the remaining directions carry no variance in one sample
            debug!(
                "common PCA stops at {} of {} components: no variance left in one sample",
                basis.len(),
                rank
            );
            break;
        }

        // fix the sign for reproducibility
        let pivot = q
            .iter()
            .cloned()
            .fold(0_f32, |acc, x| if x.abs() > acc.abs() { x } else { acc });
        if pivot < 0.0 {
            q.neg_mut();
        }

        captured += q.dot(&(&pooled * &q));
        basis.push(q);
    }

    if basis.is_empty() {
        return Ok(None);
    }

    let qq = Mat::from_columns(&basis);
    Ok(Some((za * &qq, zb * &qq, basis.len(), captured / total)))
}

fn deflate(mut v: DVector<f32>, basis: &[DVector<f32>]) -> DVector<f32> {
    for b in basis {
        let proj = b.dot(&v);
        v.axpy(-proj, b, 1.0);
    }
    v
}

/// Canonical correlation through the SVD of the cross-product of the
/// standardised samples, `Z_a Z_bᵀ = U D Vᵀ`
fn cca_coords(xa: &Mat, xb: &Mat, params: &AlignParams) -> Result<Coords> {
    let za = xa.scale_columns();
    let zb = xb.scale_columns();
    let cross = &za * zb.transpose();

    let total = cross.norm_squared();
    if total <= EPS {
        return Ok(None);
    }

    let rank = params
        .ncomps
        .min(cross.nrows())
        .min(cross.ncols())
        .min(za.ncols());
    let (uu, dd, vv) = cross.rsvd_seeded(rank, params.seed)?;

    let kept = dd.iter().take_while(|&&d| d * d > EPS * total).count();
    if kept == 0 {
        return Ok(None);
    }

    let scale = Mat::from_diagonal(&dd.rows(0, kept).map(|d| d.sqrt()));
    let mut coords_a = uu.columns(0, kept) * &scale;
    let mut coords_b = vv.columns(0, kept) * &scale;
    coords_a.normalize_rows_inplace();
    coords_b.normalize_rows_inplace();

    let captured = dd.rows(0, kept).norm_squared() / total;
    Ok(Some((coords_a, coords_b, kept, captured)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Sample;
    use crate::simulate::{self_copy_pair, SimArgs};
    use approx::assert_abs_diff_eq;
    use matrix_util::traits::MatTriplets;
    use nalgebra_sparse::CscMatrix;

    fn params(k: usize, ncomps: usize) -> AlignParams {
        AlignParams {
            k,
            ncomps,
            ..Default::default()
        }
    }

    fn copy_registry() -> SampleRegistry {
        let args = SimArgs {
            ncells: 40,
            ngenes: 30,
            ..Default::default()
        };
        let (a, b) = self_copy_pair(&args).unwrap();
        let mut reg = SampleRegistry::new();
        reg.register(a).unwrap();
        reg.register(b).unwrap();
        reg
    }

    fn nearest_row(coords: &Mat, query: &Mat, i: usize) -> usize {
        (0..coords.nrows())
            .min_by(|&x, &y| {
                let dx = (coords.row(x) - query.row(i)).norm();
                let dy = (coords.row(y) - query.row(i)).norm();
                dx.total_cmp(&dy)
            })
            .unwrap()
    }

    #[test]
    fn self_copy_gets_identical_coordinates() -> Result<()> {
        let reg = copy_registry();
        let cancel = CancelToken::new();
        for space in [
            ComparisonSpace::Pca,
            ComparisonSpace::Cpca,
            ComparisonSpace::Genes,
        ] {
            let al = align_pair(&reg, 0, 1, space, &params(5, 8), &cancel)?;
            assert_eq!(al.coords_a.shape(), (40, al.quality.n_components));
            assert_eq!(al.coords_b.nrows(), 40);
            assert_abs_diff_eq!(al.coords_a, al.coords_b, epsilon = 1e-3);
            assert!(al.quality.variance_captured > 0.0);
            assert!(al.quality.variance_captured <= 1.0 + 1e-4);
        }
        Ok(())
    }

    #[test]
    fn cca_maps_each_cell_of_a_copy_to_itself() -> Result<()> {
        let reg = copy_registry();
        let al = align_pair(
            &reg,
            0,
            1,
            ComparisonSpace::Cca,
            &params(5, 10),
            &CancelToken::new(),
        )?;
        for i in 0..al.coords_a.nrows() {
            assert_abs_diff_eq!(al.coords_a.row(i).norm(), 1.0, epsilon = 1e-4);
        }
        let hits = (0..40)
            .filter(|&i| nearest_row(&al.coords_b, &al.coords_a, i) == i)
            .count();
        assert!(hits >= 36, "only {} of 40 cells found their copy", hits);
        Ok(())
    }

    #[test]
    fn cpca_keeps_at_most_ncomps_components() -> Result<()> {
        let reg = copy_registry();
        let al = align_pair(
            &reg,
            0,
            1,
            ComparisonSpace::Cpca,
            &params(5, 6),
            &CancelToken::new(),
        )?;
        assert!(al.quality.n_components >= 1);
        assert!(al.quality.n_components <= 6);
        Ok(())
    }

    /// 8 cells x 3 genes per sample, from per-gene value patterns
    fn patterned_registry(b_varies: bool) -> SampleRegistry {
        let a = |j: usize, g: usize| match g {
            0 => 1.0 + 2.0 * (j % 2) as f32,
            1 => 1.0 + ((j / 2) % 2) as f32,
            _ => 1.0 + ((j / 4) % 2) as f32,
        };
        let b = |j: usize, g: usize| if g == 0 && b_varies { a(j, 0) } else { 5.0 };
        let to_sample = |id: &str, x: &dyn Fn(usize, usize) -> f32| {
            let triplets = (0..8)
                .flat_map(|j| (0..3).map(move |g| (g, j)))
                .map(|(g, j)| (g, j, x(j, g)))
                .collect();
            let counts = CscMatrix::from_nonzero_triplets(3, 8, triplets).unwrap();
            let genes = (0..3).map(|g| format!("g{}", g).into()).collect();
            let cells = (0..8).map(|j| format!("{}{}", id, j).into()).collect();
            Sample::new(id, counts, genes, cells)
        };
        let mut reg = SampleRegistry::new();
        reg.register(to_sample("a", &a)).unwrap();
        reg.register(to_sample("b", &b)).unwrap();
        reg
    }

    #[test]
    fn cpca_keeps_only_directions_shared_by_both() -> Result<()> {
        let reg = patterned_registry(true);
        let al = align_pair(
            &reg,
            0,
            1,
            ComparisonSpace::Cpca,
            &params(2, 3),
            &CancelToken::new(),
        )?;
        // only gene 0 varies in b
        assert_eq!(al.quality.n_components, 1);
        assert_eq!(al.coords_a.shape(), (8, 1));
        assert_abs_diff_eq!(al.coords_a, al.coords_b, epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn cpca_fails_without_shared_variance() {
        let reg = patterned_registry(false);
        let err = align_pair(
            &reg,
            0,
            1,
            ComparisonSpace::Cpca,
            &params(2, 3),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, JointError::Alignment { .. }));
    }

    #[test]
    fn too_few_cells_for_k() {
        let reg = copy_registry();
        let err = align_pair(
            &reg,
            0,
            1,
            ComparisonSpace::Pca,
            &params(41, 5),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(err, JointError::Alignment { .. }));
    }

    #[test]
    fn disjoint_genes_cannot_be_aligned() {
        let counts = |n: usize| {
            let triplets = (0..n).map(|j| (j % 3, j, 1.0 + j as f32)).collect();
            CscMatrix::from_nonzero_triplets(3, n, triplets).unwrap()
        };
        let genes = |p: &str| (0..3).map(|g| format!("{}{}", p, g).into()).collect();
        let cells = |p: &str| (0..6).map(|c| format!("{}{}", p, c).into()).collect();

        let mut reg = SampleRegistry::new();
        reg.register(Sample::new("a", counts(6), genes("x"), cells("a")))
            .unwrap();
        reg.register(Sample::new("b", counts(6), genes("y"), cells("b")))
            .unwrap();

        let err = align_pair(
            &reg,
            0,
            1,
            ComparisonSpace::Pca,
            &params(2, 2),
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("shared genes"));
    }

    #[test]
    fn cancelled_alignment_returns_cancelled() {
        let reg = copy_registry();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err =
            align_pair(&reg, 0, 1, ComparisonSpace::Cca, &params(5, 5), &cancel).unwrap_err();
        assert!(matches!(err, JointError::Cancelled(_)));
    }
}
