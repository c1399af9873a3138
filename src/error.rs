use thiserror::Error;

/// Input validation failures of the v-test core.
///
/// All of them are raised before any score is computed, so a failed call never
/// yields partial output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkerError {
    /// Sample identifiers, labels or feature names do not line up with the matrix.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Fewer than two distinct clusters, so there is nothing to compare against.
    #[error("Insufficient cluster diversity: found {found} distinct cluster(s), at least 2 are required")]
    InsufficientClusterDiversity { found: usize },

    /// A score table without exactly one row per feature per cluster.
    #[error("Malformed score table: {0}")]
    MalformedScoreTable(String),
}

pub type Result<T> = std::result::Result<T, MarkerError>;
