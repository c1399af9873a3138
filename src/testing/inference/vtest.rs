//! V-test statistic for cluster characterization.
//!
//! For a feature with global mean `μ` and unbiased global variance `σ²` over `N` samples, the
//! v-test of a cluster of `n` samples with mean `μc` is
//!
//! ```text
//! v = (μc - μ) / sqrt(((N - n) / (N - 1)) * (σ² / n))
//! ```
//!
//! i.e. the cluster mean compared to the global mean under sampling without replacement. Values
//! beyond ±2 are conventionally read as significant.

use nalgebra_sparse::CsrMatrix;
use ndarray::{Array2, ArrayView1};
use num_traits::ToPrimitive;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use single_utilities::traits::{FloatOps, FloatOpsTS};
use statrs::distribution::{ContinuousCDF, Normal};

/// Global mean and unbiased variance of one feature.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureMoments {
    pub mean: f64,
    pub variance: f64,
}

impl FeatureMoments {
    /// Constant features have a variance of exactly zero.
    pub fn is_constant(&self) -> bool {
        self.variance == 0.0
    }
}

/// Standard error of a cluster mean drawn without replacement from `total_size` samples.
#[inline]
pub fn finite_population_standard_error(variance: f64, cluster_size: f64, total_size: f64) -> f64 {
    (((total_size - cluster_size) / (total_size - 1.0)) * (variance / cluster_size)).sqrt()
}

/// V-test score of a cluster mean against the global moments of its feature.
///
/// Returns NaN when the standard error vanishes (constant feature), never ±inf.
#[inline]
pub fn v_test_score(
    cluster_mean: f64,
    cluster_size: f64,
    moments: &FeatureMoments,
    total_size: f64,
) -> f64 {
    let standard_error = finite_population_standard_error(moments.variance, cluster_size, total_size);
    if standard_error == 0.0 || !standard_error.is_finite() {
        return f64::NAN;
    }
    (cluster_mean - moments.mean) / standard_error
}

/// Two-sided p-value of a v-test score under the standard normal distribution.
pub fn v_test_p_value(score: f64) -> f64 {
    if score.is_nan() {
        return f64::NAN;
    }
    match Normal::new(0.0, 1.0) {
        Ok(normal) => (2.0 * normal.sf(score.abs())).min(1.0),
        Err(_) => f64::NAN,
    }
}

#[inline]
fn as_f64<T: ToPrimitive>(value: &T) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

/// Moments and per-cluster means of one dense feature column.
fn dense_feature_statistics<T>(
    column: ArrayView1<T>,
    assignments: &[usize],
    cluster_sizes: &[usize],
) -> (FeatureMoments, Vec<f64>)
where
    T: FloatOps,
{
    let n = column.len() as f64;
    let mut cluster_sums = vec![0.0; cluster_sizes.len()];
    let mut total = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;

    for (value, &cluster) in column.iter().zip(assignments) {
        let value = as_f64(value);
        cluster_sums[cluster] += value;
        total += value;
        min = min.min(value);
        max = max.max(value);
    }

    let mean = total / n;
    // second pass over centred values, min == max pins constant features to exactly zero
    let variance = if min == max {
        0.0
    } else {
        column
            .iter()
            .map(|value| {
                let d = as_f64(value) - mean;
                d * d
            })
            .sum::<f64>()
            / (n - 1.0)
    };

    let cluster_means = cluster_sums
        .iter()
        .zip(cluster_sizes)
        .map(|(&sum, &size)| sum / size as f64)
        .collect();

    (FeatureMoments { mean, variance }, cluster_means)
}

/// Feature moments and features × clusters mean table of a dense samples × features matrix.
pub(crate) fn dense_statistics<T>(
    matrix: &Array2<T>,
    assignments: &[usize],
    cluster_sizes: &[usize],
) -> (Vec<FeatureMoments>, Array2<f64>)
where
    T: FloatOpsTS,
{
    let n_features = matrix.ncols();
    let per_feature: Vec<(FeatureMoments, Vec<f64>)> = (0..n_features)
        .into_par_iter()
        .map(|feature| dense_feature_statistics(matrix.column(feature), assignments, cluster_sizes))
        .collect();

    let mut moments = Vec::with_capacity(n_features);
    let mut cluster_means = Array2::zeros((n_features, cluster_sizes.len()));
    for (feature, (feature_moments, means)) in per_feature.into_iter().enumerate() {
        moments.push(feature_moments);
        for (cluster, mean) in means.into_iter().enumerate() {
            cluster_means[[feature, cluster]] = mean;
        }
    }
    (moments, cluster_means)
}

/// Running sums over the stored entries of a sparse matrix.
#[derive(Debug, Clone)]
struct SparseAccumulator {
    sums: Vec<f64>,
    stored: Vec<usize>,
    min: Vec<f64>,
    max: Vec<f64>,
    cluster_sums: Array2<f64>,
}

impl SparseAccumulator {
    fn new(n_features: usize, n_clusters: usize) -> Self {
        SparseAccumulator {
            sums: vec![0.0; n_features],
            stored: vec![0; n_features],
            min: vec![f64::INFINITY; n_features],
            max: vec![f64::NEG_INFINITY; n_features],
            cluster_sums: Array2::zeros((n_features, n_clusters)),
        }
    }

    fn add_row<T: FloatOps>(&mut self, col_indices: &[usize], values: &[T], cluster: usize) {
        for (&feature, value) in col_indices.iter().zip(values) {
            let value = as_f64(value);
            self.sums[feature] += value;
            self.stored[feature] += 1;
            self.min[feature] = self.min[feature].min(value);
            self.max[feature] = self.max[feature].max(value);
            self.cluster_sums[[feature, cluster]] += value;
        }
    }

    fn merge(mut self, other: SparseAccumulator) -> Self {
        for feature in 0..self.sums.len() {
            self.sums[feature] += other.sums[feature];
            self.stored[feature] += other.stored[feature];
            self.min[feature] = self.min[feature].min(other.min[feature]);
            self.max[feature] = self.max[feature].max(other.max[feature]);
        }
        self.cluster_sums += &other.cluster_sums;
        self
    }
}

/// Feature moments and features × clusters mean table of a sparse samples × features matrix.
///
/// Entries that are not stored count as zeros.
pub(crate) fn sparse_statistics<T>(
    matrix: &CsrMatrix<T>,
    assignments: &[usize],
    cluster_sizes: &[usize],
) -> (Vec<FeatureMoments>, Array2<f64>)
where
    T: FloatOpsTS,
{
    let n_samples = matrix.nrows();
    let n_features = matrix.ncols();
    let n_clusters = cluster_sizes.len();

    let acc = (0..n_samples)
        .into_par_iter()
        .fold(
            || SparseAccumulator::new(n_features, n_clusters),
            |mut acc, sample| {
                let row = matrix.row(sample);
                acc.add_row(row.col_indices(), row.values(), assignments[sample]);
                acc
            },
        )
        .reduce(
            || SparseAccumulator::new(n_features, n_clusters),
            SparseAccumulator::merge,
        );

    let n = n_samples as f64;
    let means: Vec<f64> = acc.sums.iter().map(|sum| sum / n).collect();

    // second pass over centred stored values, implicit zeros add (n - stored) * mean²
    let centred = (0..n_samples)
        .into_par_iter()
        .fold(
            || vec![0.0; n_features],
            |mut squares, sample| {
                let row = matrix.row(sample);
                for (&feature, value) in row.col_indices().iter().zip(row.values()) {
                    let d = as_f64(value) - means[feature];
                    squares[feature] += d * d;
                }
                squares
            },
        )
        .reduce(
            || vec![0.0; n_features],
            |mut left, right| {
                for (l, r) in left.iter_mut().zip(right) {
                    *l += r;
                }
                left
            },
        );

    let moments = (0..n_features)
        .map(|feature| {
            let mean = means[feature];
            let implicit = n_samples - acc.stored[feature];
            let mut min = acc.min[feature];
            let mut max = acc.max[feature];
            if implicit > 0 {
                min = min.min(0.0);
                max = max.max(0.0);
            }

            let variance = if min == max {
                0.0
            } else {
                (centred[feature] + implicit as f64 * mean * mean) / (n - 1.0)
            };
            FeatureMoments { mean, variance }
        })
        .collect();

    let mut cluster_means = acc.cluster_sums;
    for (cluster, &size) in cluster_sizes.iter().enumerate() {
        cluster_means.column_mut(cluster).mapv_inplace(|sum| sum / size as f64);
    }

    (moments, cluster_means)
}

/// Score every (feature, cluster) cell from the precomputed moments and means.
pub(crate) fn score_table(
    moments: &[FeatureMoments],
    cluster_means: &Array2<f64>,
    cluster_sizes: &[usize],
    n_samples: usize,
) -> Array2<f64> {
    let total = n_samples as f64;
    Array2::from_shape_fn(cluster_means.dim(), |(feature, cluster)| {
        v_test_score(
            cluster_means[[feature, cluster]],
            cluster_sizes[cluster] as f64,
            &moments[feature],
            total,
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra_sparse::CooMatrix;
    use ndarray::array;

    #[test]
    fn test_standard_error_matches_hand_computation() {
        // [1, 1, 1, 10, 10, 10]: variance 24.3, clusters of three
        let se = finite_population_standard_error(24.3, 3.0, 6.0);
        assert_abs_diff_eq!(se, 4.86_f64.sqrt(), epsilon = 1e-12);

        let moments = FeatureMoments {
            mean: 5.5,
            variance: 24.3,
        };
        let v = v_test_score(10.0, 3.0, &moments, 6.0);
        assert_abs_diff_eq!(v, 5.0 / 6.0_f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(v_test_score(1.0, 3.0, &moments, 6.0), -v, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_variance_is_undefined() {
        let moments = FeatureMoments {
            mean: 4.0,
            variance: 0.0,
        };
        assert!(moments.is_constant());
        assert!(v_test_score(4.0, 2.0, &moments, 5.0).is_nan());
        assert!(v_test_score(4.000001, 2.0, &moments, 5.0).is_nan());
    }

    #[test]
    fn test_p_value() {
        assert_abs_diff_eq!(v_test_p_value(0.0), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v_test_p_value(1.959964), 0.05, epsilon = 1e-5);
        assert_abs_diff_eq!(v_test_p_value(-1.959964), 0.05, epsilon = 1e-5);
        assert!(v_test_p_value(f64::NAN).is_nan());
    }

    #[test]
    fn test_constant_column_has_exact_zero_variance() {
        // 0.1 does not sum exactly, the min/max guard keeps the variance at zero
        let matrix = array![[0.1], [0.1], [0.1], [0.1], [0.1]];
        let (moments, _) = dense_statistics(&matrix, &[0, 0, 1, 1, 1], &[2, 3]);
        assert_eq!(moments[0].variance, 0.0);
    }

    #[test]
    fn test_sparse_matches_dense() {
        let dense = array![
            [0.0, 2.0, 5.0],
            [1.0, 0.0, 5.0],
            [0.0, 0.0, 5.0],
            [4.0, 3.0, 5.0],
            [6.0, 0.0, 5.0],
        ];
        let mut coo = CooMatrix::new(5, 3);
        for ((row, col), &value) in dense.indexed_iter() {
            if value != 0.0 {
                coo.push(row, col, value);
            }
        }
        let sparse = CsrMatrix::from(&coo);

        let assignments = [0, 0, 0, 1, 1];
        let sizes = [3, 2];
        let (dense_moments, dense_means) = dense_statistics(&dense, &assignments, &sizes);
        let (sparse_moments, sparse_means) = sparse_statistics(&sparse, &assignments, &sizes);

        for feature in 0..3 {
            assert_abs_diff_eq!(
                dense_moments[feature].mean,
                sparse_moments[feature].mean,
                epsilon = 1e-12
            );
            assert_abs_diff_eq!(
                dense_moments[feature].variance,
                sparse_moments[feature].variance,
                epsilon = 1e-9
            );
        }
        for (d, s) in dense_means.iter().zip(sparse_means.iter()) {
            assert_abs_diff_eq!(*d, *s, epsilon = 1e-12);
        }
        assert_eq!(sparse_moments[2].variance, 0.0);
    }

    #[test]
    fn test_sparse_matches_dense_with_large_offset() {
        let offset = 1e8;
        let dense = array![
            [offset + 1.0, 0.0],
            [offset + 2.0, 3.0],
            [offset + 1.0, 0.0],
            [offset + 9.0, 1e8],
            [offset + 10.0, 0.0],
            [offset + 9.0, 1e8 + 4.0],
        ];
        let mut coo = CooMatrix::new(6, 2);
        for ((row, col), &value) in dense.indexed_iter() {
            if value != 0.0 {
                coo.push(row, col, value);
            }
        }
        let sparse = CsrMatrix::from(&coo);

        let assignments = [0, 0, 0, 1, 1, 1];
        let sizes = [3, 3];
        let (dense_moments, dense_means) = dense_statistics(&dense, &assignments, &sizes);
        let (sparse_moments, sparse_means) = sparse_statistics(&sparse, &assignments, &sizes);

        // [1, 2, 1, 9, 10, 9] shifted by 1e8 keeps its variance of 292 / 15
        assert_abs_diff_eq!(dense_moments[0].variance, 292.0 / 15.0, epsilon = 1e-6);
        for feature in 0..2 {
            assert_abs_diff_eq!(
                dense_moments[feature].variance,
                sparse_moments[feature].variance,
                epsilon = 1e-6 * dense_moments[feature].variance
            );
        }

        let dense_scores = score_table(&dense_moments, &dense_means, &sizes, 6);
        let sparse_scores = score_table(&sparse_moments, &sparse_means, &sizes, 6);
        for (d, s) in dense_scores.iter().zip(sparse_scores.iter()) {
            assert_abs_diff_eq!(*d, *s, epsilon = 1e-6);
        }
    }
}
