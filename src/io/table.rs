//! Tab-separated expression matrices, cluster assignments and marker tables.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use ndarray::{Array2, Axis};
use serde::Serialize;

use crate::testing::{MarkerEntry, ScoreEntry};

pub const DEFAULT_SAMPLE_COLUMN: &str = "Sample.Names";

const HIGH_SUFFIX: &str = ".highvtscore.tsv";
const LOW_SUFFIX: &str = ".lowvtscore.tsv";

/// Expression values stored samples × genes, read from a genes × samples file.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionTable {
    pub samples: Vec<String>,
    pub genes: Vec<String>,
    pub values: Array2<f64>,
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or_default()
}

impl ExpressionTable {
    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
        Self::from_reader(file).with_context(|| format!("Failed to read expression matrix {:?}", path))
    }

    /// Parse a genes × samples table.
    ///
    /// The header names the samples, with or without a leading cell for the gene column. Every
    /// other line is a gene name followed by one value per sample.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut records = reader.records();
        let header = match records.next() {
            Some(record) => record?,
            None => bail!("Empty expression table"),
        };
        let header: Vec<String> = header.iter().map(|s| s.trim().to_string()).collect();

        let mut samples: Option<Vec<String>> = None;
        let mut genes = Vec::new();
        let mut seen_genes = HashSet::new();
        let mut rows: Vec<Vec<f64>> = Vec::new();

        for record in records {
            let record = record?;
            let line = line_of(&record);

            let samples = samples.get_or_insert_with(|| {
                if record.len() == header.len() + 1 {
                    header.clone()
                } else {
                    header.iter().skip(1).cloned().collect()
                }
            });
            if record.len() != samples.len() + 1 {
                bail!(
                    "Line {}: expected {} fields, found {}",
                    line,
                    samples.len() + 1,
                    record.len()
                );
            }

            let gene = record[0].trim().to_string();
            if !seen_genes.insert(gene.clone()) {
                bail!("Line {}: duplicated gene '{}'", line, gene);
            }

            let mut values = Vec::with_capacity(samples.len());
            for (field, sample) in record.iter().skip(1).zip(samples.iter()) {
                let value: f64 = field.trim().parse().map_err(|_| {
                    anyhow!("Line {}: invalid value '{}' for sample '{}'", line, field, sample)
                })?;
                if value.is_nan() {
                    bail!("Line {}: missing value for sample '{}'", line, sample);
                }
                values.push(value);
            }

            genes.push(gene);
            rows.push(values);
        }

        // without a data row the header layout cannot be told apart
        let Some(samples) = samples else {
            bail!("Expression table has a header but no gene rows");
        };
        let mut seen_samples = HashSet::with_capacity(samples.len());
        for sample in &samples {
            if !seen_samples.insert(sample.as_str()) {
                bail!("Duplicated sample '{}' in header", sample);
            }
        }

        let values = Array2::from_shape_fn((samples.len(), genes.len()), |(s, g)| rows[g][s]);
        Ok(ExpressionTable {
            samples,
            genes,
            values,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn n_genes(&self) -> usize {
        self.genes.len()
    }

    /// Inner join on sample identifier, in the order of `sample_ids`.
    pub fn restrict_to<S: AsRef<str>>(&self, sample_ids: &[S]) -> Self {
        let position: HashMap<&str, usize> = self
            .samples
            .iter()
            .enumerate()
            .map(|(i, s)| (s.as_str(), i))
            .collect();

        let mut kept = Vec::with_capacity(sample_ids.len());
        let mut rows = Vec::with_capacity(sample_ids.len());
        let mut unmatched = 0usize;
        for sample in sample_ids {
            match position.get(sample.as_ref()) {
                Some(&row) => {
                    kept.push(sample.as_ref().to_string());
                    rows.push(row);
                }
                None => unmatched += 1,
            }
        }

        if unmatched > 0 {
            log::warn!(
                "{} labelled sample(s) have no expression values and are skipped",
                unmatched
            );
        }
        let unlabelled = self.samples.len() - rows.len();
        if unlabelled > 0 {
            log::warn!(
                "{} sample(s) in the expression matrix have no cluster label and are skipped",
                unlabelled
            );
        }

        ExpressionTable {
            samples: kept,
            genes: self.genes.clone(),
            values: self.values.select(Axis(0), &rows),
        }
    }
}

/// Read `(sample, cluster label)` pairs from a tab-separated file with a header.
pub fn read_cluster_assignments(
    path: &Path,
    sample_column: &str,
    cluster_column: &str,
) -> Result<Vec<(String, String)>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    read_cluster_assignments_from(file, sample_column, cluster_column)
        .with_context(|| format!("Failed to read cluster assignments {:?}", path))
}

pub fn read_cluster_assignments_from<R: Read>(
    reader: R,
    sample_column: &str,
    cluster_column: &str,
) -> Result<Vec<(String, String)>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let find = |name: &str| {
        headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
            anyhow!(
                "Column '{}' not found, available columns: {}",
                name,
                headers.iter().collect::<Vec<_>>().join(", ")
            )
        })
    };
    let sample_idx = find(sample_column)?;
    let cluster_idx = find(cluster_column)?;

    let mut seen = HashSet::new();
    let mut assignments = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = line_of(&record);
        let sample = record.get(sample_idx).unwrap_or_default().trim().to_string();
        let label = record.get(cluster_idx).unwrap_or_default().trim().to_string();

        if sample.is_empty() {
            bail!("Line {}: empty sample identifier", line);
        }
        if label.is_empty() {
            bail!("Line {}: sample '{}' has no cluster label", line, sample);
        }
        if !seen.insert(sample.clone()) {
            bail!("Line {}: sample '{}' is assigned more than once", line, sample);
        }
        assignments.push((sample, label));
    }

    Ok(assignments)
}

/// `out.tsv` becomes `out.highvtscore.tsv` and `out.lowvtscore.tsv`.
pub fn marker_output_paths(out: &Path) -> (PathBuf, PathBuf) {
    let name = out.to_string_lossy();
    let stem = name.strip_suffix(".tsv").unwrap_or(&name);
    (
        PathBuf::from(format!("{}{}", stem, HIGH_SUFFIX)),
        PathBuf::from(format!("{}{}", stem, LOW_SUFFIX)),
    )
}

fn tsv_writer<W: Write>(writer: W) -> csv::Writer<W> {
    WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_writer(writer)
}

/// Write marker rows sorted by feature, then cluster.
pub fn write_markers_to<W, L>(writer: W, entries: &[MarkerEntry<L>]) -> Result<()>
where
    W: Write,
    L: Serialize + Ord,
{
    let mut sorted: Vec<&MarkerEntry<L>> = entries.iter().collect();
    sorted.sort_by(|a, b| a.feature.cmp(&b.feature).then_with(|| a.cluster.cmp(&b.cluster)));

    let mut writer = tsv_writer(writer);
    writer.write_record(["feature", "cluster", "vt_score"])?;
    for entry in sorted {
        writer.serialize(entry)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_markers<L>(path: &Path, entries: &[MarkerEntry<L>]) -> Result<()>
where
    L: Serialize + Ord,
{
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    write_markers_to(file, entries).with_context(|| format!("Failed to write {:?}", path))?;
    log::info!("Wrote {} markers to {:?}", entries.len(), path);
    Ok(())
}

#[derive(Serialize)]
struct ScoreRow<'a, L> {
    feature: &'a str,
    cluster: &'a L,
    vt_score: f64,
    p_value: f64,
}

/// Write the full long-form score table with two-sided p-values.
pub fn write_scores_to<W, L>(writer: W, entries: &[ScoreEntry<L>]) -> Result<()>
where
    W: Write,
    L: Serialize,
{
    let mut writer = tsv_writer(writer);
    writer.write_record(["feature", "cluster", "vt_score", "p_value"])?;
    for entry in entries {
        writer.serialize(ScoreRow {
            feature: &entry.feature,
            cluster: &entry.cluster,
            vt_score: entry.score,
            p_value: entry.p_value(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_scores<L: Serialize>(path: &Path, entries: &[ScoreEntry<L>]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
    write_scores_to(file, entries).with_context(|| format!("Failed to write {:?}", path))?;
    log::info!("Wrote {} scores to {:?}", entries.len(), path);
    Ok(())
}
