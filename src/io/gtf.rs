//! GENCODE GTF gene-type filtering of expression matrices.

use std::collections::{BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use flate2::read::MultiGzDecoder;

pub const DEFAULT_GENE_TYPE: &str = "protein_coding";

const GTF_FIELDS: usize = 9;

/// Split a GTF attribute column (`key "value"; key value;`) into pairs.
pub fn parse_attributes(field: &str) -> Vec<(&str, &str)> {
    field
        .split(';')
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            let (key, value) = pair.split_once(char::is_whitespace)?;
            Some((key.trim(), value.trim().trim_matches('"')))
        })
        .collect()
}

/// Value of the first attribute named `key`.
pub fn attribute<'a>(field: &'a str, key: &str) -> Option<&'a str> {
    parse_attributes(field)
        .into_iter()
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

/// Open a plain or gzip-compressed (`.gz`) text file.
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let reader: Box<dyn BufRead> = match path.extension() {
        Some(ext) if ext == "gz" => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        _ => Box::new(BufReader::new(file)),
    };
    Ok(reader)
}

/// Collect `gene_name` of every record whose `gene_type` equals `gene_type`.
pub fn read_gene_names_from<R: BufRead>(reader: R, gene_type: &str) -> Result<BTreeSet<String>> {
    let mut names = BTreeSet::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.starts_with('#') || line.trim().is_empty() {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != GTF_FIELDS {
            bail!(
                "Line {}: expected {} tab-separated fields, found {}",
                idx + 1,
                GTF_FIELDS,
                fields.len()
            );
        }

        let attributes = fields[GTF_FIELDS - 1];
        if attribute(attributes, "gene_type") != Some(gene_type) {
            continue;
        }
        if let Some(name) = attribute(attributes, "gene_name") {
            names.insert(name.to_string());
        }
    }

    Ok(names)
}

pub fn read_gene_names(path: &Path, gene_type: &str) -> Result<BTreeSet<String>> {
    let reader = open_text(path)?;
    let names = read_gene_names_from(reader, gene_type)
        .with_context(|| format!("Failed to parse GTF {:?}", path))?;
    log::info!("Found {} '{}' genes in {:?}", names.len(), gene_type, path);
    Ok(names)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterSummary {
    pub kept: usize,
    pub total: usize,
}

/// Copy the header and the rows whose gene (first field) is in `genes`.
pub fn filter_expression_rows_to<R, W>(
    reader: R,
    writer: W,
    genes: &HashSet<String>,
) -> Result<FilterSummary>
where
    R: BufRead,
    W: Write,
{
    let mut writer = BufWriter::new(writer);
    let mut lines = reader.lines();

    match lines.next() {
        Some(header) => writeln!(writer, "{}", header?)?,
        None => bail!("Empty expression table"),
    }

    let mut summary = FilterSummary { kept: 0, total: 0 };
    for line in lines {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        summary.total += 1;
        let gene = line.split('\t').next().unwrap_or_default().trim();
        if genes.contains(gene) {
            writeln!(writer, "{}", line)?;
            summary.kept += 1;
        }
    }
    writer.flush()?;
    Ok(summary)
}

pub fn filter_expression_rows(
    input: &Path,
    output: &Path,
    genes: &HashSet<String>,
) -> Result<FilterSummary> {
    let reader = open_text(input)?;
    let file = File::create(output).with_context(|| format!("Failed to create {:?}", output))?;
    let summary = filter_expression_rows_to(reader, file, genes)
        .with_context(|| format!("Failed to filter {:?}", input))?;
    log::info!(
        "Kept {} of {} genes, written to {:?}",
        summary.kept,
        summary.total,
        output
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GTF: &str = "##description: test\n\
chr1\tHAVANA\tgene\t11869\t14409\t.\t+\t.\tgene_id \"ENSG1\"; gene_type \"transcribed_unprocessed_pseudogene\"; gene_name \"DDX11L1\"; level 2;\n\
chr1\tHAVANA\tgene\t65419\t71585\t.\t+\t.\tgene_id \"ENSG2\"; gene_type \"protein_coding\"; gene_name \"OR4F5\"; level 2;\n\
chr1\tHAVANA\texon\t65419\t65433\t.\t+\t.\tgene_id \"ENSG2\"; gene_type \"protein_coding\"; gene_name \"OR4F5\"; exon_number 1;\n\
chr17\tHAVANA\tgene\t7661779\t7687538\t.\t-\t.\tgene_id \"ENSG3\"; gene_type \"protein_coding\"; gene_name \"TP53\"; level 2;\n";

    #[test]
    fn test_parse_attributes() {
        let attrs = parse_attributes("gene_id \"ENSG2\"; gene_type \"protein_coding\"; level 2;");
        assert_eq!(
            attrs,
            vec![("gene_id", "ENSG2"), ("gene_type", "protein_coding"), ("level", "2")]
        );
        assert_eq!(attribute("gene_name \"TP53\";", "gene_name"), Some("TP53"));
        assert_eq!(attribute("gene_name \"TP53\";", "gene_type"), None);
    }

    #[test]
    fn test_read_protein_coding_names() {
        let names = read_gene_names_from(GTF.as_bytes(), DEFAULT_GENE_TYPE).unwrap();
        let expected: BTreeSet<String> = ["OR4F5", "TP53"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_malformed_gtf_line() {
        let bad = "chr1\tHAVANA\tgene\n";
        assert!(read_gene_names_from(bad.as_bytes(), DEFAULT_GENE_TYPE).is_err());
    }

    #[test]
    fn test_filter_expression_rows() {
        let genes: HashSet<String> = ["TP53".to_string()].into_iter().collect();
        let input = "gene\ts1\ts2\nTP53\t1\t2\nDDX11L1\t0\t0\n";
        let mut out = Vec::new();
        let summary = filter_expression_rows_to(input.as_bytes(), &mut out, &genes).unwrap();
        assert_eq!(summary, FilterSummary { kept: 1, total: 2 });
        assert_eq!(String::from_utf8(out).unwrap(), "gene\ts1\ts2\nTP53\t1\t2\n");
    }
}
