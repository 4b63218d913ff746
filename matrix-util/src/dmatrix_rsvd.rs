use crate::traits::SampleOps;
use log::debug;
use nalgebra::{DMatrix, DVector};

type Mat = DMatrix<f32>;
type Vec = DVector<f32>;

pub const DEFAULT_RSVD_ITER: usize = 5;
pub const DEFAULT_RSVD_SEED: u64 = 42;

pub trait RSVD {
    /// Truncated SVD `X ≈ U diag(d) Vᵀ` with at most `rank` components
    fn rsvd(&self, rank: usize) -> anyhow::Result<(Mat, Vec, Mat)>;

    /// Same as `rsvd` with an explicit random seed
    fn rsvd_seeded(&self, rank: usize, seed: u64) -> anyhow::Result<(Mat, Vec, Mat)>;
}

impl RSVD for Mat {
    fn rsvd(&self, rank: usize) -> anyhow::Result<(Mat, Vec, Mat)> {
        self.rsvd_seeded(rank, DEFAULT_RSVD_SEED)
    }

    fn rsvd_seeded(&self, rank: usize, seed: u64) -> anyhow::Result<(Mat, Vec, Mat)> {
        let mut rsvd = RandomizedSVD::new(rank, DEFAULT_RSVD_ITER).with_seed(seed);
        rsvd.compute(self)?;
        Ok((
            rsvd.matrix_u().clone(),
            rsvd.singular_values().clone(),
            rsvd.matrix_v().clone(),
        ))
    }
}

/// Randomized SVD
///
/// Alg 4.4 of Halko et al. (2009) with QR re-orthonormalisation between
/// power iterations. The Gaussian test matrix is drawn from a fixed
/// seed, and each singular pair is sign-flipped so that the largest
/// entry of `u` is positive; the output is deterministic for a seed.
///
pub struct RandomizedSVD {
    max_rank: usize,
    iter: usize,
    seed: u64,
    u_vectors: Mat,
    singular_values: Vec,
    v_vectors: Mat,
}

impl RandomizedSVD {
    pub fn new(max_rank: usize, iter: usize) -> Self {
        Self {
            max_rank,
            iter,
            seed: DEFAULT_RSVD_SEED,
            u_vectors: Mat::zeros(0, 0),
            singular_values: Vec::zeros(0),
            v_vectors: Mat::zeros(0, 0),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn matrix_u(&self) -> &Mat {
        &self.u_vectors
    }

    pub fn matrix_v(&self) -> &Mat {
        &self.v_vectors
    }

    pub fn singular_values(&self) -> &Vec {
        &self.singular_values
    }

    pub fn compute(&mut self, xx: &Mat) -> anyhow::Result<()> {
        let nr = xx.nrows();
        let nc = xx.ncols();

        let full_rank = nr.min(nc);
        if full_rank == 0 || self.max_rank == 0 {
            anyhow::bail!("empty [{} x {}] matrix or zero rank", nr, nc);
        }

        let rank = self.max_rank.min(full_rank);
        let oversample = if rank < full_rank { 5 } else { 0 };
        let kk = (rank + oversample).min(full_rank);

        let qq = self.rand_subspace_iteration(xx, kk);

        let bb = qq.transpose() * xx;
        debug!("final svd on [{} x {}]", bb.nrows(), bb.ncols());

        let svd = bb.svd(true, true);

        let (Some(svd_u), Some(svd_vt)) = (svd.u, svd.v_t) else {
            anyhow::bail!("SVD failed");
        };

        // nalgebra does not sort singular values
        let mut order: std::vec::Vec<usize> = (0..svd.singular_values.len()).collect();
        order.sort_by(|&a, &b| {
            svd.singular_values[b]
                .partial_cmp(&svd.singular_values[a])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(&b))
        });
        let rank = rank.min(order.len());

        let uu_small = svd_u.select_columns(&order[..rank]);
        let mut vv = svd_vt.transpose().select_columns(&order[..rank]);
        let mut uu = &qq * uu_small;

        for k in 0..rank {
            let pivot = uu
                .column(k)
                .iter()
                .cloned()
                .fold(0_f32, |acc, x| if x.abs() > acc.abs() { x } else { acc });
            if pivot < 0.0 {
                uu.column_mut(k).neg_mut();
                vv.column_mut(k).neg_mut();
            }
        }

        self.u_vectors = uu;
        self.v_vectors = vv;
        self.singular_values =
            Vec::from_iterator(rank, order[..rank].iter().map(|&k| svd.singular_values[k]));

        Ok(())
    }

    /// Find an orthonormal matrix whose range approximates the range of `xx`
    fn rand_subspace_iteration(&self, xx: &Mat, kk: usize) -> Mat {
        let omega = Mat::rnorm(xx.ncols(), kk, self.seed);
        let mut qq = orthonormal_columns(xx * omega, kk);

        for i in 0..self.iter {
            let zz = orthonormal_columns(xx.transpose() * &qq, kk);
            qq = orthonormal_columns(xx * zz, kk);
            debug!("power iteration {}", i + 1);
        }
        qq
    }
}

fn orthonormal_columns(yy: Mat, kk: usize) -> Mat {
    let qr = yy.qr();
    let q = qr.q();
    let kk = kk.min(q.ncols());
    q.columns(0, kk).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn identity_has_unit_singular_values() -> anyhow::Result<()> {
        let xx = Mat::identity(8, 8);
        let (u, d, v) = xx.rsvd(3)?;
        assert_eq!(u.shape(), (8, 3));
        assert_eq!(v.shape(), (8, 3));
        for k in 0..3 {
            assert_abs_diff_eq!(d[k], 1.0, epsilon = 1e-4);
        }
        let utu = u.transpose() * &u;
        assert_abs_diff_eq!(utu, Mat::identity(3, 3), epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn recovers_low_rank_matrix() -> anyhow::Result<()> {
        let a = Mat::rnorm(30, 2, 1);
        let b = Mat::rnorm(2, 12, 2);
        let xx = &a * &b;
        let (u, d, v) = xx.rsvd(2)?;
        let recon = &u * Mat::from_diagonal(&d) * v.transpose();
        assert_abs_diff_eq!(recon, xx, epsilon = 1e-3);
        assert!(d[0] >= d[1]);
        Ok(())
    }

    #[test]
    fn same_seed_same_answer() -> anyhow::Result<()> {
        let xx = Mat::runif(20, 10, 3);
        let (u1, d1, _) = xx.rsvd_seeded(4, 11)?;
        let (u2, d2, _) = xx.rsvd_seeded(4, 11)?;
        assert_eq!(u1, u2);
        assert_eq!(d1, d2);
        Ok(())
    }
}
