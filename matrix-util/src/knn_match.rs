use indicatif::ParallelProgressIterator;
use nalgebra::DMatrix;
use rayon::prelude::*;

pub const DEFAULT_APPROX_THRESHOLD: usize = 5000;

/// A dictionary of points (matrix rows) for nearest neighbour look-up
///
/// Small dictionaries are searched exhaustively; once the number of
/// points reaches `approx_threshold` an HNSW index (`instant-distance`)
/// is built from a fixed seed.
///
pub struct PointDict {
    data_vec: Vec<VecPoint>,
    hnsw: Option<instant_distance::HnswMap<VecPoint, usize>>,
}

impl PointDict {
    /// Build a dictionary from the rows of `data`
    ///
    /// * `data` - points x features
    /// * `approx_threshold` - use HNSW when `nrows >= approx_threshold`
    /// * `seed` - HNSW construction seed
    pub fn from_rows(data: &DMatrix<f32>, approx_threshold: usize, seed: u64) -> Self {
        let nn = data.nrows();
        let data_vec: Vec<VecPoint> = (0..nn)
            .into_par_iter()
            .map(|i| data.row(i).to_vp())
            .collect();

        let hnsw = if nn >= approx_threshold.max(1) {
            use instant_distance::Builder;
            let names = (0..nn).collect::<Vec<_>>();
            Some(Builder::default().seed(seed).build(data_vec.clone(), names))
        } else {
            None
        };

        Self { data_vec, hnsw }
    }

    pub fn len(&self) -> usize {
        self.data_vec.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data_vec.is_empty()
    }

    pub fn is_approximate(&self) -> bool {
        self.hnsw.is_some()
    }

    /// `knn` nearest points of `query`, sorted by distance and then by
    /// index, so equidistant points come out in a stable order
    pub fn search(&self, query: &[f32], knn: usize) -> Vec<(usize, f32)> {
        self.search_filtered(query, knn, None)
    }

    /// `knn` nearest points of the dictionary's own point `i`, excluding
    /// itself
    pub fn search_others(&self, i: usize, knn: usize) -> Vec<(usize, f32)> {
        let query = self.data_vec[i].data.clone();
        self.search_filtered(&query, knn, Some(i))
    }

    /// Search every row of `queries` in parallel
    pub fn search_rows(&self, queries: &DMatrix<f32>, knn: usize) -> Vec<Vec<(usize, f32)>> {
        let nq = queries.nrows();
        (0..nq)
            .into_par_iter()
            .progress_count(nq as u64)
            .map(|i| {
                let q = queries.row(i).to_vp();
                self.search(&q.data, knn)
            })
            .collect()
    }

    fn search_filtered(&self, query: &[f32], knn: usize, skip: Option<usize>) -> Vec<(usize, f32)> {
        let nn = self.data_vec.len();
        let avail = if skip.is_some() { nn.saturating_sub(1) } else { nn };
        let nquery = knn.min(avail);
        if nquery == 0 {
            return vec![];
        }

        let mut ret: Vec<(usize, f32)> = match &self.hnsw {
            Some(dict) => {
                use instant_distance::Search;
                let qp = VecPoint {
                    data: query.to_vec(),
                };
                let mut search = Search::default();
                dict.search(&qp, &mut search)
                    .map(|item| (*item.value, item.distance))
                    .filter(|(j, _)| Some(*j) != skip)
                    .take(nquery)
                    .collect()
            }
            None => {
                let mut all: Vec<(usize, f32)> = self
                    .data_vec
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| Some(*j) != skip)
                    .map(|(j, p)| (j, euclidean(query, &p.data)))
                    .collect();
                if nquery < all.len() {
                    all.select_nth_unstable_by(nquery - 1, cmp_dist_index);
                    all.truncate(nquery);
                }
                all
            }
        };

        ret.sort_by(cmp_dist_index);
        ret
    }
}

fn cmp_dist_index(a: &(usize, f32), b: &(usize, f32)) -> std::cmp::Ordering {
    a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
}

pub fn euclidean(x: &[f32], y: &[f32]) -> f32 {
    x.iter()
        .zip(y.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f32>()
        .sqrt()
}

#[derive(Clone, Debug)]
/// a wrapper for Vec<f32>
pub struct VecPoint {
    pub data: Vec<f32>,
}

pub trait MakeVecPoint {
    fn to_vp(&self) -> VecPoint;
}

impl MakeVecPoint for Vec<f32> {
    fn to_vp(&self) -> VecPoint {
        VecPoint { data: self.clone() }
    }
}

impl MakeVecPoint for nalgebra::DVectorView<'_, f32> {
    fn to_vp(&self) -> VecPoint {
        VecPoint {
            data: self.iter().cloned().collect(),
        }
    }
}

impl<C> MakeVecPoint for nalgebra::Matrix<f32, nalgebra::U1, nalgebra::Dyn, C>
where
    C: nalgebra::Storage<f32, nalgebra::U1, nalgebra::Dyn>,
{
    fn to_vp(&self) -> VecPoint {
        VecPoint {
            data: self.iter().cloned().collect(),
        }
    }
}

impl instant_distance::Point for VecPoint {
    fn distance(&self, other: &Self) -> f32 {
        euclidean(&self.data, &other.data)
    }
}
