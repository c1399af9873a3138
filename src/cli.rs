use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::io::gtf::DEFAULT_GENE_TYPE;
use crate::io::table::DEFAULT_SAMPLE_COLUMN;
use crate::testing::SIGNIFICANCE_THRESHOLD;

#[derive(Debug, Parser)]
#[command(name = "single-vtest")]
#[command(about = "single-vtest: v-test marker genes for clustered expression data")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(long = "verbose", global = true, help = "Print debug messages")]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Score genes against clusters and write high/low marker tables
    #[command(name = "vtest")]
    VTest(VTestArgs),
    /// Keep only the genes of a given GTF gene type in an expression matrix
    #[command(name = "filter-gtf")]
    FilterGtf(FilterGtfArgs),
}

#[derive(Debug, Args)]
pub struct VTestArgs {
    #[arg(
        short = 'i',
        long = "geneexpfile",
        required = true,
        value_name = "PATH",
        help = "Path to the genes x samples expression TSV"
    )]
    pub expression: PathBuf,

    #[arg(
        short = 'c',
        long = "clusterfile",
        required = true,
        value_name = "PATH",
        help = "Path to the TSV with sample identifiers and cluster labels"
    )]
    pub clusters: PathBuf,

    #[arg(
        short = 't',
        long = "clustertype",
        required = true,
        value_name = "COLUMN",
        help = "Column of the cluster file holding the cluster labels"
    )]
    pub cluster_column: String,

    #[arg(
        short = 'v',
        long = "vtest-outname",
        required = true,
        value_name = "PATH",
        help = "Output name, .tsv is replaced by .highvtscore.tsv and .lowvtscore.tsv"
    )]
    pub out: PathBuf,

    #[arg(
        long = "sample-column",
        value_name = "COLUMN",
        default_value = DEFAULT_SAMPLE_COLUMN,
        help = "Column of the cluster file holding the sample identifiers"
    )]
    pub sample_column: String,

    #[arg(
        long = "threshold",
        value_name = "VALUE",
        default_value_t = SIGNIFICANCE_THRESHOLD,
        help = "Absolute v-test score a marker has to exceed"
    )]
    pub threshold: f64,

    #[arg(
        long = "scores",
        value_name = "PATH",
        help = "Also write every (gene, cluster) score with its p-value"
    )]
    pub scores: Option<PathBuf>,

    #[arg(short = 'T', long = "threads", value_name = "THREADS", help = "Number of threads")]
    pub threads: Option<usize>,
}

#[derive(Debug, Args)]
pub struct FilterGtfArgs {
    #[arg(
        short = 'i',
        long = "inputGenExp",
        required = true,
        value_name = "PATH",
        help = "Input genes x samples expression TSV"
    )]
    pub expression: PathBuf,

    #[arg(
        short = 'g',
        long = "gtf_file",
        required = true,
        value_name = "PATH",
        help = "GENCODE annotation in GTF format, optionally gzipped"
    )]
    pub gtf: PathBuf,

    #[arg(
        short = 'o',
        long = "outfilename",
        required = true,
        value_name = "PATH",
        help = "Filtered expression TSV"
    )]
    pub out: PathBuf,

    #[arg(
        long = "gene-type",
        value_name = "TYPE",
        default_value = DEFAULT_GENE_TYPE,
        help = "gene_type attribute to keep"
    )]
    pub gene_type: String,
}

/// error handling for CLI
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// argument checker for all subcommands
pub trait ArgCheck {
    fn check(&self) -> Result<(), CliError>;

    fn threads(&self) -> Option<usize> {
        None
    }
}

impl ArgCheck for VTestArgs {
    fn check(&self) -> Result<(), CliError> {
        validate(&self.expression)?;
        validate(&self.clusters)?;

        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(CliError::InvalidInput(format!(
                "threshold must be a positive number, got {}",
                self.threshold
            )));
        }
        if self.cluster_column.trim().is_empty() {
            return Err(CliError::InvalidInput("empty cluster column name".to_string()));
        }
        check_threads(self.threads)
    }

    fn threads(&self) -> Option<usize> {
        self.threads
    }
}

impl ArgCheck for FilterGtfArgs {
    fn check(&self) -> Result<(), CliError> {
        validate(&self.expression)?;
        validate(&self.gtf)?;

        let name = self.gtf.to_string_lossy();
        if !(name.ends_with(".gtf") || name.ends_with(".gtf.gz")) {
            return Err(CliError::InvalidInput(format!(
                "{:?} is not a GTF file (.gtf or .gtf.gz)",
                self.gtf
            )));
        }
        if self.gene_type.trim().is_empty() {
            return Err(CliError::InvalidInput("empty gene type".to_string()));
        }
        Ok(())
    }
}

fn check_threads(threads: Option<usize>) -> Result<(), CliError> {
    match threads {
        Some(0) => Err(CliError::InvalidInput(
            "number of threads must be at least 1".to_string(),
        )),
        _ => Ok(()),
    }
}

/// argument validation
pub fn validate(arg: &Path) -> Result<(), CliError> {
    if !arg.exists() {
        return Err(CliError::InvalidInput(format!("{:?} does not exist", arg)));
    }

    if !arg.is_file() {
        return Err(CliError::InvalidInput(format!("{:?} is not a file", arg)));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vtest_defaults() {
        let cli = Cli::try_parse_from([
            "single-vtest",
            "vtest",
            "-i",
            "expr.tsv",
            "-c",
            "clusters.tsv",
            "-t",
            "kmeans",
            "-v",
            "out.tsv",
        ])
        .unwrap();

        match cli.command {
            Command::VTest(args) => {
                assert_eq!(args.cluster_column, "kmeans");
                assert_eq!(args.sample_column, DEFAULT_SAMPLE_COLUMN);
                assert_eq!(args.threshold, SIGNIFICANCE_THRESHOLD);
                assert!(args.scores.is_none());
                assert!(args.threads.is_none());
            }
            Command::FilterGtf(_) => panic!("expected vtest"),
        }
    }

    #[test]
    fn test_parse_filter_gtf() {
        let cli = Cli::try_parse_from([
            "single-vtest",
            "filter-gtf",
            "-i",
            "expr.tsv",
            "-g",
            "gencode.gtf.gz",
            "-o",
            "filtered.tsv",
        ])
        .unwrap();

        match cli.command {
            Command::FilterGtf(args) => assert_eq!(args.gene_type, DEFAULT_GENE_TYPE),
            Command::VTest(_) => panic!("expected filter-gtf"),
        }
    }

    #[test]
    fn test_check_rejects_missing_files_and_bad_threshold() {
        let args = VTestArgs {
            expression: PathBuf::from("/nonexistent/expr.tsv"),
            clusters: PathBuf::from("/nonexistent/clusters.tsv"),
            cluster_column: "k".to_string(),
            out: PathBuf::from("out.tsv"),
            sample_column: DEFAULT_SAMPLE_COLUMN.to_string(),
            threshold: SIGNIFICANCE_THRESHOLD,
            scores: None,
            threads: None,
        };
        assert!(matches!(args.check(), Err(CliError::InvalidInput(_))));

        let dir = tempfile::tempdir().unwrap();
        let expr = dir.path().join("expr.tsv");
        std::fs::write(&expr, "gene\ts1\n").unwrap();
        let args = VTestArgs {
            expression: expr.clone(),
            clusters: expr,
            threshold: -1.0,
            ..args
        };
        assert!(args.check().is_err());

        let args = VTestArgs {
            threshold: 2.0,
            threads: Some(0),
            ..args
        };
        assert!(args.check().is_err());

        let args = VTestArgs {
            threads: Some(2),
            ..args
        };
        assert!(args.check().is_ok());
        assert_eq!(args.threads(), Some(2));
    }
}
