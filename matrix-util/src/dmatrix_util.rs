pub use nalgebra::{DMatrix, DVector};
pub use rayon::prelude::*;

use crate::traits::*;
use nalgebra_sparse::{CooMatrix, CscMatrix};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// One generator per column, so the draws do not depend on how rayon
/// splits the work
fn column_rng(seed: u64, col: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add((col as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)))
}

impl SampleOps for DMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn runif(dd: usize, nn: usize, seed: u64) -> Self::Mat {
        let rvec: Vec<f32> = (0..nn)
            .into_par_iter()
            .flat_map_iter(|j| {
                let mut rng = column_rng(seed, j);
                (0..dd).map(move |_| rng.random::<f32>())
            })
            .collect();
        DMatrix::<f32>::from_vec(dd, nn, rvec)
    }

    fn rnorm(dd: usize, nn: usize, seed: u64) -> Self::Mat {
        let rvec: Vec<f32> = (0..nn)
            .into_par_iter()
            .flat_map_iter(|j| {
                let mut rng = column_rng(seed, j);
                (0..dd).map(move |_| rng.sample::<f32, _>(StandardNormal))
            })
            .collect();
        DMatrix::<f32>::from_vec(dd, nn, rvec)
    }
}

impl MatOps for DMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn normalize_columns_inplace(&mut self) {
        for mut x_j in self.column_iter_mut() {
            let denom = x_j.norm();
            if denom > 0.0 {
                x_j /= denom;
            }
        }
    }

    fn normalize_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.normalize_columns_inplace();
        ret
    }

    fn normalize_rows_inplace(&mut self) {
        for mut x_i in self.row_iter_mut() {
            let denom = x_i.norm();
            if denom > 0.0 {
                x_i /= denom;
            }
        }
    }

    fn normalize_rows(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.normalize_rows_inplace();
        ret
    }

    fn scale_columns_inplace(&mut self) {
        let nn = self.nrows() as f32;
        if nn < 1.0 {
            return;
        }
        for mut x_j in self.column_iter_mut() {
            let mu = x_j.sum() / nn;
            x_j.add_scalar_mut(-mu);
            let sig = (x_j.norm_squared() / nn).sqrt();
            if sig > 0.0 {
                x_j /= sig;
            }
        }
    }

    fn scale_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.scale_columns_inplace();
        ret
    }

    fn centre_columns_inplace(&mut self) {
        let nn = self.nrows() as f32;
        if nn < 1.0 {
            return;
        }
        for mut x_j in self.column_iter_mut() {
            let mu = x_j.sum() / nn;
            x_j.add_scalar_mut(-mu);
        }
    }

    fn centre_columns(&self) -> Self::Mat {
        let mut ret = self.clone();
        ret.centre_columns_inplace();
        ret
    }
}

impl MatTriplets for CscMatrix<f32> {
    type Mat = Self;
    type Scalar = f32;

    fn from_nonzero_triplets<I>(
        nrow: usize,
        ncol: usize,
        triplets: Vec<(I, I, Self::Scalar)>,
    ) -> anyhow::Result<Self::Mat>
    where
        I: TryInto<usize> + Copy,
        <I as TryInto<usize>>::Error: std::fmt::Debug,
    {
        let mut coo = CooMatrix::<f32>::new(nrow, ncol);
        for (ii, jj, x_ij) in triplets {
            let ii: usize = ii
                .try_into()
                .map_err(|e| anyhow::anyhow!("bad row index: {:?}", e))?;
            let jj: usize = jj
                .try_into()
                .map_err(|e| anyhow::anyhow!("bad column index: {:?}", e))?;
            if ii >= nrow || jj >= ncol {
                anyhow::bail!("triplet ({}, {}) out of [{} x {}]", ii, jj, nrow, ncol);
            }
            coo.push(ii, jj, x_ij);
        }
        // duplicate entries are summed
        Ok(CscMatrix::from(&coo))
    }

    fn to_nonzero_triplets(
        &self,
    ) -> anyhow::Result<(usize, usize, Vec<(usize, usize, Self::Scalar)>)> {
        let triplets = self
            .triplet_iter()
            .filter(|&(_, _, &x)| x != 0.0)
            .map(|(i, j, &x)| (i, j, x))
            .collect();
        Ok((self.nrows(), self.ncols(), triplets))
    }
}

impl SparseStatOps for CscMatrix<f32> {
    type Scalar = f32;

    fn row_mean_variance(&self) -> (Vec<f32>, Vec<f32>) {
        let nrow = self.nrows();
        let ncol = self.ncols();
        let mut s1 = vec![0_f64; nrow];
        let mut s2 = vec![0_f64; nrow];

        for col in self.col_iter() {
            for (&i, &x) in col.row_indices().iter().zip(col.values()) {
                let x = x as f64;
                s1[i] += x;
                s2[i] += x * x;
            }
        }

        if ncol == 0 {
            return (vec![0.0; nrow], vec![0.0; nrow]);
        }

        let nn = ncol as f64;
        let mean = s1.iter().map(|&s| (s / nn) as f32).collect();
        let var = s1
            .iter()
            .zip(s2.iter())
            .map(|(&a, &b)| {
                let mu = a / nn;
                (b / nn - mu * mu).max(0.0) as f32
            })
            .collect();
        (mean, var)
    }
}

/// Densify a subset of rows of a sparse `feature x column` matrix into
/// a `column x selected-feature` matrix, so that each column becomes a
/// row (point) of the output
///
/// * `mat` - sparse matrix (features are rows)
/// * `rows` - rows to keep, in output order
pub fn dense_transpose_rows(mat: &CscMatrix<f32>, rows: &[usize]) -> DMatrix<f32> {
    let mut position = vec![usize::MAX; mat.nrows()];
    for (k, &r) in rows.iter().enumerate() {
        position[r] = k;
    }

    let mut ret = DMatrix::<f32>::zeros(mat.ncols(), rows.len());
    for (j, col) in mat.col_iter().enumerate() {
        for (&i, &x) in col.row_indices().iter().zip(col.values()) {
            let k = position[i];
            if k != usize::MAX {
                ret[(j, k)] = x;
            }
        }
    }
    ret
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn seeded_sampling_is_reproducible() {
        let a = DMatrix::<f32>::rnorm(7, 13, 42);
        let b = DMatrix::<f32>::rnorm(7, 13, 42);
        let c = DMatrix::<f32>::rnorm(7, 13, 43);
        assert_eq!(a, b);
        assert_ne!(a, c);

        let u = DMatrix::<f32>::runif(5, 5, 1);
        assert!(u.iter().all(|&x| (0.0..1.0).contains(&x)));
    }

    #[test]
    fn scale_and_centre_columns() {
        let xx = DMatrix::from_row_slice(4, 2, &[1.0, 5.0, 2.0, 5.0, 3.0, 5.0, 4.0, 5.0]);
        let zz = xx.scale_columns();
        assert_abs_diff_eq!(zz.column(0).sum(), 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(zz.column(0).norm_squared() / 4.0, 1.0, epsilon = 1e-5);
        // constant column is centred only
        assert!(zz.column(1).iter().all(|&x| x == 0.0));

        let cc = xx.centre_columns();
        assert_abs_diff_eq!(cc[(0, 0)], -1.5, epsilon = 1e-6);
    }

    #[test]
    fn normalize_rows_to_unit_length() {
        let xx = DMatrix::from_row_slice(3, 2, &[3.0, 4.0, 0.0, 0.0, 1.0, 0.0]);
        let yy = xx.normalize_rows();
        assert_abs_diff_eq!(yy.row(0).norm(), 1.0, epsilon = 1e-6);
        assert_eq!(yy.row(1).norm(), 0.0);
        assert_abs_diff_eq!(yy[(0, 1)], 0.8, epsilon = 1e-6);
    }

    #[test]
    fn sparse_triplets_and_row_stats() -> anyhow::Result<()> {
        let triplets = vec![(0_usize, 0_usize, 1.0_f32), (0, 1, 3.0), (2, 1, 2.0)];
        let csc = CscMatrix::<f32>::from_nonzero_triplets(3, 2, triplets)?;
        let (nr, nc, back) = csc.to_nonzero_triplets()?;
        assert_eq!((nr, nc, back.len()), (3, 2, 3));

        let (mean, var) = csc.row_mean_variance();
        assert_abs_diff_eq!(mean[0], 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(var[0], 1.0, epsilon = 1e-6);
        assert_eq!(mean[1], 0.0);

        let dense = dense_transpose_rows(&csc, &[2, 0]);
        assert_eq!(dense.shape(), (2, 2));
        assert_eq!(dense[(1, 0)], 2.0);
        assert_eq!(dense[(0, 1)], 1.0);
        Ok(())
    }

    #[test]
    fn out_of_range_triplet_is_rejected() {
        let triplets = vec![(5_usize, 0_usize, 1.0_f32)];
        assert!(CscMatrix::<f32>::from_nonzero_triplets(3, 2, triplets).is_err());
    }
}
