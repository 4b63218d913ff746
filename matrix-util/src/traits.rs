/// Normalize, scale or centre the columns (features) or rows
/// (points) of a matrix
pub trait MatOps {
    type Mat;
    type Scalar;

    /// `X[,j] / |X[,j]|`, zero columns stay zero
    fn normalize_columns_inplace(&mut self);
    fn normalize_columns(&self) -> Self::Mat;

    /// `X[i,] / |X[i,]|`, zero rows stay zero
    fn normalize_rows_inplace(&mut self);
    fn normalize_rows(&self) -> Self::Mat;

    /// `(X[,j] - mean) / sd`; constant columns are only centred
    fn scale_columns_inplace(&mut self);
    fn scale_columns(&self) -> Self::Mat;

    fn centre_columns_inplace(&mut self);
    fn centre_columns(&self) -> Self::Mat;
}

/// Sample random matrices from a fixed seed so that downstream
/// decompositions are reproducible
pub trait SampleOps {
    type Mat;
    type Scalar;

    /// Sample a `dd x nn` matrix from a uniform distribution `U(0,1)`
    fn runif(dd: usize, nn: usize, seed: u64) -> Self::Mat;

    /// Sample a `dd x nn` matrix from a normal distribution `N(0,1)`
    fn rnorm(dd: usize, nn: usize, seed: u64) -> Self::Mat;
}

/// Convert to and from the vector of triplets
pub trait MatTriplets {
    type Mat;
    type Scalar;

    fn from_nonzero_triplets<I>(
        nrow: usize,
        ncol: usize,
        triplets: Vec<(I, I, Self::Scalar)>,
    ) -> anyhow::Result<Self::Mat>
    where
        I: TryInto<usize> + Copy,
        <I as TryInto<usize>>::Error: std::fmt::Debug;

    fn to_nonzero_triplets(
        &self,
    ) -> anyhow::Result<(usize, usize, Vec<(usize, usize, Self::Scalar)>)>;
}

/// Column summaries of a sparse feature x sample matrix
pub trait SparseStatOps {
    type Scalar;

    /// Mean and variance of each row across all columns, zeros included
    fn row_mean_variance(&self) -> (Vec<Self::Scalar>, Vec<Self::Scalar>);
}
