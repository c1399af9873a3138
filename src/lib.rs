//! # single-vtest
//!
//! V-test marker gene identification for clustered expression data, part of the single-rust ecosystem.
//!
//! Given a samples × features expression matrix and a cluster label per sample, this crate scores
//! every feature against every cluster with the value-test (v-test) statistic and then selects, per
//! feature, the single cluster in which that feature is a significant high or low outlier.
//!
//! ## Core Features
//!
//! - **V-test scoring**: finite-population-corrected comparison of cluster means to the global mean
//! - **Marker selection**: top-2 / bottom-2 adjacency rule around a significance threshold
//! - **Dense and sparse input**: `Array2` from ndarray and `CsrMatrix` from nalgebra-sparse
//! - **Tabular I/O**: expression and cluster TSV files, GENCODE GTF gene-type filtering
//!
//! ## Quick Start
//!
//! ```rust
//! use ndarray::array;
//! use single_vtest::testing::inference::MatrixVTest;
//! use single_vtest::testing::selection::select_markers;
//! use single_vtest::testing::SIGNIFICANCE_THRESHOLD;
//!
//! let matrix = array![[1.0], [1.0], [1.0], [10.0], [10.0], [10.0]];
//! let scores = matrix.v_test(&["A", "A", "A", "B", "B", "B"]).unwrap();
//! let entries = scores.to_entries(&["GENE1"]).unwrap();
//! let markers = select_markers(&entries, scores.n_clusters(), SIGNIFICANCE_THRESHOLD).unwrap();
//!
//! assert_eq!(markers.high[0].cluster, "B");
//! assert_eq!(markers.low[0].cluster, "A");
//! ```
//!
//! ## Module Organization
//!
//! - **[`testing`]**: V-test computation and marker selection
//! - **[`io`]**: Expression/cluster tables, marker writers and the GTF gene filter
//! - **[`pipeline`]**: End-to-end runs used by the `single-vtest` binary
//! - **[`error`]**: Typed errors raised by the statistical core

pub mod cli;
pub mod error;
pub mod io;
pub mod pipeline;
pub mod testing;
