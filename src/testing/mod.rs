use ndarray::Array2;
use serde::Serialize;
use std::cmp::Ordering;

use crate::error::{MarkerError, Result};
use crate::testing::inference::vtest::{FeatureMoments, v_test_p_value};

pub mod inference;
pub mod selection;

pub mod utils;

/// Absolute v-test value a cluster has to exceed to be reported as a marker.
pub const SIGNIFICANCE_THRESHOLD: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VTestConfig {
    /// Scores above `+threshold` (below `-threshold`) are significant high (low) outliers
    pub significance_threshold: f64,
}

impl Default for VTestConfig {
    fn default() -> Self {
        VTestConfig {
            significance_threshold: SIGNIFICANCE_THRESHOLD,
        }
    }
}

impl VTestConfig {
    pub fn with_threshold(significance_threshold: f64) -> Self {
        VTestConfig {
            significance_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerDirection {
    /// Feature is over-expressed in the cluster
    High,
    /// Feature is under-expressed in the cluster
    Low,
}

/// One row of the long-form score table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreEntry<L> {
    pub feature: String,
    pub cluster: L,
    /// V-test score, NaN when the feature has zero global variance
    #[serde(rename = "vt_score")]
    pub score: f64,
}

impl<L> ScoreEntry<L> {
    pub fn new(feature: impl Into<String>, cluster: L, score: f64) -> Self {
        ScoreEntry {
            feature: feature.into(),
            cluster,
            score,
        }
    }

    /// Two-sided p-value of the score under the standard normal approximation.
    pub fn p_value(&self) -> f64 {
        v_test_p_value(self.score)
    }

    pub fn is_defined(&self) -> bool {
        !self.score.is_nan()
    }
}

/// A feature selected as a marker of exactly one cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerEntry<L> {
    pub feature: String,
    pub cluster: L,
    #[serde(rename = "vt_score")]
    pub score: f64,
    #[serde(skip)]
    pub direction: MarkerDirection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MarkerSets<L> {
    /// Features over-expressed in a single cluster
    pub high: Vec<MarkerEntry<L>>,
    /// Features under-expressed in a single cluster
    pub low: Vec<MarkerEntry<L>>,
}

impl<L> MarkerSets<L> {
    pub fn is_empty(&self) -> bool {
        self.high.is_empty() && self.low.is_empty()
    }

    /// Markers of a single cluster in both directions
    pub fn for_cluster<'a>(&'a self, cluster: &'a L) -> impl Iterator<Item = &'a MarkerEntry<L>> + 'a
    where
        L: PartialEq,
    {
        self.high
            .iter()
            .chain(self.low.iter())
            .filter(move |entry| &entry.cluster == cluster)
    }
}

/// V-test scores of every feature against every cluster.
///
/// `scores` and `cluster_means` are laid out features × clusters, with clusters in the
/// ascending label order stored in `clusters`.
#[derive(Debug, Clone)]
pub struct VTestScores<L> {
    pub clusters: Vec<L>,
    pub cluster_sizes: Vec<usize>,
    pub n_samples: usize,
    pub feature_moments: Vec<FeatureMoments>,
    pub cluster_means: Array2<f64>,
    pub scores: Array2<f64>,
}

impl<L> VTestScores<L> {
    pub fn n_features(&self) -> usize {
        self.scores.nrows()
    }

    pub fn n_clusters(&self) -> usize {
        self.clusters.len()
    }

    pub fn score(&self, feature: usize, cluster: usize) -> f64 {
        self.scores[[feature, cluster]]
    }

    pub fn cluster_index(&self, cluster: &L) -> Option<usize>
    where
        L: PartialEq,
    {
        self.clusters.iter().position(|c| c == cluster)
    }

    /// Flatten into the long-form table, one entry per (feature, cluster) pair.
    pub fn to_entries<S>(&self, feature_names: &[S]) -> Result<Vec<ScoreEntry<L>>>
    where
        S: AsRef<str>,
        L: Clone,
    {
        if feature_names.len() != self.n_features() {
            return Err(MarkerError::ShapeMismatch(format!(
                "{} feature names for a matrix with {} features",
                feature_names.len(),
                self.n_features()
            )));
        }

        let mut entries = Vec::with_capacity(self.n_features() * self.n_clusters());
        for (feature_idx, name) in feature_names.iter().enumerate() {
            for (cluster_idx, cluster) in self.clusters.iter().enumerate() {
                entries.push(ScoreEntry::new(
                    name.as_ref(),
                    cluster.clone(),
                    self.scores[[feature_idx, cluster_idx]],
                ));
            }
        }
        Ok(entries)
    }

    /// Score table flattening followed by marker selection.
    pub fn markers<S>(&self, feature_names: &[S], config: &VTestConfig) -> Result<MarkerSets<L>>
    where
        S: AsRef<str>,
        L: Clone + Eq + std::hash::Hash + Send + Sync,
    {
        let entries = self.to_entries(feature_names)?;
        selection::select_markers(&entries, self.n_clusters(), config.significance_threshold)
    }

    /// Get the indices of the top n features for a cluster, highest score first.
    /// Undefined scores are never ranked.
    pub fn top_features(&self, cluster: usize, n: usize) -> Vec<usize> {
        let column = self.scores.column(cluster);
        let mut indices: Vec<usize> = (0..column.len())
            .filter(|&i| !column[i].is_nan())
            .collect();
        indices.sort_by(|&a, &b| column[b].partial_cmp(&column[a]).unwrap_or(Ordering::Equal));
        indices.truncate(n);
        indices
    }
}
