//! End-to-end runs behind the `vtest` and `filter-gtf` subcommands.

use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Debug;
use std::fs;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::cli::{FilterGtfArgs, VTestArgs};
use crate::io::gtf::{filter_expression_rows, read_gene_names};
use crate::io::table::{
    ExpressionTable, marker_output_paths, read_cluster_assignments, write_markers, write_scores,
};
use crate::testing::inference::MatrixVTest;
use crate::testing::selection::select_markers;
use crate::testing::{MarkerSets, ScoreEntry, VTestConfig};

const TOP_GENES_LOGGED: usize = 3;

/// Output of a v-test run, ready to be written.
#[derive(Debug, Clone)]
pub struct VTestRun<L> {
    pub scores: Vec<ScoreEntry<L>>,
    pub markers: MarkerSets<L>,
}

/// Score and select markers for a joined expression table.
pub fn score_table<L>(
    table: &ExpressionTable,
    labels: &HashMap<String, L>,
    config: &VTestConfig,
) -> Result<VTestRun<L>>
where
    L: Ord + Clone + Hash + Send + Sync + Debug,
{
    let scores = table.values.v_test_by_sample(&table.samples, labels)?;
    log::info!(
        "Scored {} genes against {} clusters over {} samples",
        scores.n_features(),
        scores.n_clusters(),
        scores.n_samples
    );
    for (idx, (cluster, size)) in scores.clusters.iter().zip(&scores.cluster_sizes).enumerate() {
        let top: Vec<&str> = scores
            .top_features(idx, TOP_GENES_LOGGED)
            .into_iter()
            .map(|feature| table.genes[feature].as_str())
            .collect();
        log::debug!("Cluster {:?}: {} samples, top genes {:?}", cluster, size, top);
    }

    let entries = scores.to_entries(&table.genes)?;
    let markers = select_markers(&entries, scores.n_clusters(), config.significance_threshold)?;
    if markers.is_empty() {
        log::warn!(
            "No gene passes |v| > {}, marker tables will be empty",
            config.significance_threshold
        );
    }
    log::info!(
        "Found {} high and {} low marker genes (|v| > {})",
        markers.high.len(),
        markers.low.len(),
        config.significance_threshold
    );

    Ok(VTestRun {
        scores: entries,
        markers,
    })
}

fn score_and_write<L>(
    table: &ExpressionTable,
    labels: HashMap<String, L>,
    args: &VTestArgs,
) -> Result<()>
where
    L: Ord + Clone + Hash + Send + Sync + Debug + Serialize,
{
    let config = VTestConfig::with_threshold(args.threshold);
    let run = score_table(table, &labels, &config)?;

    let (high_path, low_path) = marker_output_paths(&args.out);
    let mut targets = vec![high_path, low_path];
    if let Some(path) = &args.scores {
        targets.push(path.clone());
    }
    let staged: Vec<PathBuf> = targets.iter().map(|path| staging_path(path)).collect();

    let written = write_markers(&staged[0], &run.markers.high)
        .and_then(|_| write_markers(&staged[1], &run.markers.low))
        .and_then(|_| match staged.get(2) {
            Some(path) => write_scores(path, &run.scores),
            None => Ok(()),
        });
    if let Err(e) = written {
        discard(&staged);
        return Err(e);
    }
    promote(&staged, &targets)
}

/// Sibling path an output is written to before it is moved into place.
fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn discard(paths: &[PathBuf]) {
    for path in paths {
        if path.exists() {
            if let Err(e) = fs::remove_file(path) {
                log::warn!("Failed to remove {:?}: {}", path, e);
            }
        }
    }
}

/// Move every staged file onto its target. On failure the targets already moved and the
/// remaining staged files are removed, so either all outputs exist or none do.
fn promote(staged: &[PathBuf], targets: &[PathBuf]) -> Result<()> {
    for (idx, (from, to)) in staged.iter().zip(targets).enumerate() {
        if let Err(e) = fs::rename(from, to) {
            discard(&targets[..idx]);
            discard(&staged[idx..]);
            return Err(e).with_context(|| format!("Failed to write {:?}", to));
        }
    }
    Ok(())
}

/// Integer value of a cluster label, accepting float spellings such as `"3.0"`.
fn integer_label(label: &str) -> Option<i64> {
    if let Ok(value) = label.parse::<i64>() {
        return Some(value);
    }
    let value = label.parse::<f64>().ok()?;
    let in_range = value >= i64::MIN as f64 && value < i64::MAX as f64;
    (value.is_finite() && value.fract() == 0.0 && in_range).then(|| value as i64)
}

pub fn run_vtest(args: &VTestArgs) -> Result<()> {
    log::info!("Reading expression matrix {:?}", args.expression);
    let table = ExpressionTable::from_path(&args.expression)?;
    log::info!(
        "Loaded {} genes x {} samples",
        table.n_genes(),
        table.n_samples()
    );

    let assignments =
        read_cluster_assignments(&args.clusters, &args.sample_column, &args.cluster_column)?;
    let sample_ids: Vec<&str> = assignments.iter().map(|(s, _)| s.as_str()).collect();
    let table = table.restrict_to(&sample_ids);

    let present: HashSet<&str> = table.samples.iter().map(String::as_str).collect();
    let assignments: Vec<(String, String)> = assignments
        .into_iter()
        .filter(|(s, _)| present.contains(s.as_str()))
        .collect();

    // integer labels ("2", "2.0") sort numerically
    let numeric: Option<HashMap<String, i64>> = assignments
        .iter()
        .map(|(s, l)| integer_label(l).map(|l| (s.clone(), l)))
        .collect();

    match numeric {
        Some(labels) => score_and_write(&table, labels, args),
        None => score_and_write(&table, assignments.into_iter().collect(), args),
    }
}

pub fn run_filter_gtf(args: &FilterGtfArgs) -> Result<()> {
    let genes: HashSet<String> = read_gene_names(&args.gtf, &args.gene_type)?
        .into_iter()
        .collect();
    filter_expression_rows(&args.expression, &args.out, &genes)?;
    Ok(())
}
