//! Reading inputs for and writing results of the v-test.
//!
//! - **[`table`]**: expression matrices, cluster assignments and marker/score tables (TSV)
//! - **[`gtf`]**: gene-type filtering of expression matrices against a GENCODE annotation

pub mod gtf;
pub mod table;

pub use table::{ExpressionTable, marker_output_paths, read_cluster_assignments, write_markers, write_scores};
