use std::collections::HashMap;

use nalgebra_sparse::CsrMatrix;
use ndarray::Array2;
use single_utilities::traits::FloatOpsTS;

use crate::error::{MarkerError, Result};
use crate::testing::VTestScores;
use crate::testing::inference::vtest::{FeatureMoments, dense_statistics, score_table, sparse_statistics};
use crate::testing::utils::{SampleGroups, align_group_ids, ensure_cluster_diversity, group_samples};

pub mod vtest;

/// V-test scoring of a samples × features matrix against a clustering of its rows.
pub trait MatrixVTest<T>
where
    T: FloatOpsTS,
{
    fn n_samples(&self) -> usize;

    fn n_features(&self) -> usize;

    /// Score every feature against every cluster.
    ///
    /// `group_ids` holds one cluster label per matrix row.
    fn v_test<L>(&self, group_ids: &[L]) -> Result<VTestScores<L>>
    where
        L: Ord + Clone;

    /// Score every feature against every cluster, with labels keyed by sample identifier.
    ///
    /// `sample_ids` names the matrix rows in order; `labels` must cover exactly those samples.
    fn v_test_by_sample<S, L>(
        &self,
        sample_ids: &[S],
        labels: &HashMap<String, L>,
    ) -> Result<VTestScores<L>>
    where
        S: AsRef<str>,
        L: Ord + Clone,
    {
        if sample_ids.len() != self.n_samples() {
            return Err(MarkerError::ShapeMismatch(format!(
                "{} sample identifiers for a matrix with {} rows",
                sample_ids.len(),
                self.n_samples()
            )));
        }
        let group_ids = align_group_ids(sample_ids, labels)?;
        self.v_test(&group_ids)
    }
}

fn prepare_groups<L>(group_ids: &[L], n_samples: usize) -> Result<SampleGroups<L>>
where
    L: Ord + Clone,
{
    if group_ids.len() != n_samples {
        return Err(MarkerError::ShapeMismatch(format!(
            "{} cluster labels for a matrix with {} rows",
            group_ids.len(),
            n_samples
        )));
    }
    let groups = group_samples(group_ids);
    ensure_cluster_diversity(&groups)?;
    Ok(groups)
}

fn assemble_scores<L>(
    groups: SampleGroups<L>,
    moments: Vec<FeatureMoments>,
    cluster_means: Array2<f64>,
) -> VTestScores<L> {
    let n_samples = groups.n_samples();
    let cluster_sizes = groups.sizes();
    let scores = score_table(&moments, &cluster_means, &cluster_sizes, n_samples);

    let constant = moments.iter().filter(|m| m.is_constant()).count();
    if constant > 0 {
        log::debug!("{} constant feature(s) have undefined v-test scores", constant);
    }

    VTestScores {
        clusters: groups.groups,
        cluster_sizes,
        n_samples,
        feature_moments: moments,
        cluster_means,
        scores,
    }
}

impl<T> MatrixVTest<T> for Array2<T>
where
    T: FloatOpsTS,
{
    fn n_samples(&self) -> usize {
        self.nrows()
    }

    fn n_features(&self) -> usize {
        self.ncols()
    }

    fn v_test<L>(&self, group_ids: &[L]) -> Result<VTestScores<L>>
    where
        L: Ord + Clone,
    {
        let groups = prepare_groups(group_ids, self.nrows())?;
        log::debug!(
            "Scoring {} features over {} samples in {} clusters (dense)",
            self.ncols(),
            self.nrows(),
            groups.n_groups()
        );
        let (moments, cluster_means) =
            dense_statistics(self, &groups.assignments, &groups.sizes());
        Ok(assemble_scores(groups, moments, cluster_means))
    }
}

impl<T> MatrixVTest<T> for CsrMatrix<T>
where
    T: FloatOpsTS,
{
    fn n_samples(&self) -> usize {
        self.nrows()
    }

    fn n_features(&self) -> usize {
        self.ncols()
    }

    fn v_test<L>(&self, group_ids: &[L]) -> Result<VTestScores<L>>
    where
        L: Ord + Clone,
    {
        let groups = prepare_groups(group_ids, self.nrows())?;
        log::debug!(
            "Scoring {} features over {} samples in {} clusters (sparse, {} stored entries)",
            self.ncols(),
            self.nrows(),
            groups.n_groups(),
            self.nnz()
        );
        let (moments, cluster_means) =
            sparse_statistics(self, &groups.assignments, &groups.sizes());
        Ok(assemble_scores(groups, moments, cluster_means))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use nalgebra_sparse::CooMatrix;
    use ndarray::array;

    #[test]
    fn test_two_cluster_mirror_scores() {
        let matrix = array![[1.0], [1.0], [1.0], [10.0], [10.0], [10.0]];
        let scores = matrix.v_test(&["A", "A", "A", "B", "B", "B"]).unwrap();

        assert_eq!(scores.clusters, vec!["A", "B"]);
        assert_eq!(scores.cluster_sizes, vec![3, 3]);
        assert_abs_diff_eq!(scores.score(0, 1), 5.0 / 6.0_f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(scores.score(0, 0), -scores.score(0, 1), epsilon = 1e-12);
    }

    #[test]
    fn test_singleton_cluster_is_scored() {
        let matrix = array![[1.0, 0.0], [2.0, 0.0], [3.0, 1.0], [10.0, 0.0]];
        let scores = matrix.v_test(&[0u8, 0, 0, 1]).unwrap();
        assert_eq!(scores.cluster_sizes, vec![3, 1]);
        assert!(scores.score(0, 1).is_finite());
        assert!(scores.score(0, 1) > 0.0);
    }

    #[test]
    fn test_label_count_mismatch() {
        let matrix = array![[1.0], [2.0], [3.0]];
        let err = matrix.v_test(&[1, 2]).unwrap_err();
        assert!(matches!(err, MarkerError::ShapeMismatch(_)));
    }

    #[test]
    fn test_one_cluster_is_rejected() {
        let matrix = array![[1.0], [2.0], [3.0]];
        let err = matrix.v_test(&[7, 7, 7]).unwrap_err();
        assert_eq!(err, MarkerError::InsufficientClusterDiversity { found: 1 });
    }

    #[test]
    fn test_by_sample_ignores_label_map_order() {
        let matrix = array![[1.0], [1.0], [10.0], [10.0]];
        let labels: HashMap<String, u32> = [("d", 2), ("a", 1), ("c", 2), ("b", 1)]
            .iter()
            .map(|(s, l)| (s.to_string(), *l))
            .collect();

        let scores = matrix.v_test_by_sample(&["a", "b", "c", "d"], &labels).unwrap();
        assert!(scores.score(0, 1) > 0.0);
        assert!(scores.score(0, 0) < 0.0);

        let err = matrix.v_test_by_sample(&["a", "b", "c"], &labels).unwrap_err();
        assert!(matches!(err, MarkerError::ShapeMismatch(_)));
    }

    #[test]
    fn test_sparse_scores_match_dense() {
        let dense = array![
            [0.0, 3.0],
            [0.0, 2.0],
            [5.0, 0.0],
            [4.0, 0.0],
            [0.0, 1.0],
            [6.0, 0.0],
        ];
        let mut coo = CooMatrix::new(6, 2);
        for ((row, col), &value) in dense.indexed_iter() {
            if value != 0.0 {
                coo.push(row, col, value);
            }
        }
        let sparse = CsrMatrix::from(&coo);
        let labels = [1, 1, 2, 2, 3, 2];

        let dense_scores = dense.v_test(&labels).unwrap();
        let sparse_scores = sparse.v_test(&labels).unwrap();
        assert_eq!(dense_scores.clusters, sparse_scores.clusters);
        for (d, s) in dense_scores.scores.iter().zip(sparse_scores.scores.iter()) {
            assert_abs_diff_eq!(*d, *s, epsilon = 1e-9);
        }
    }
}
