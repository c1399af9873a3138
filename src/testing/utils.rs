use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{MarkerError, Result};

/// Samples partitioned by cluster label.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleGroups<L> {
    /// Distinct labels in ascending order
    pub groups: Vec<L>,
    /// Position in `groups` of every sample's label, in sample order
    pub assignments: Vec<usize>,
    /// Sample indices of each group
    pub indices: Vec<Vec<usize>>,
}

impl<L> SampleGroups<L> {
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn n_samples(&self) -> usize {
        self.assignments.len()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.indices.iter().map(Vec::len).collect()
    }
}

pub fn extract_unique_groups<L: Ord + Clone>(group_ids: &[L]) -> Vec<L> {
    let mut unique_groups = group_ids.to_vec();
    unique_groups.sort();
    unique_groups.dedup();
    unique_groups
}

/// Build the group index in one pass over the labels.
pub fn group_samples<L: Ord + Clone>(group_ids: &[L]) -> SampleGroups<L> {
    let groups = extract_unique_groups(group_ids);
    let position: BTreeMap<&L, usize> = groups.iter().enumerate().map(|(i, g)| (g, i)).collect();

    let mut assignments = Vec::with_capacity(group_ids.len());
    let mut indices = vec![Vec::new(); groups.len()];
    for (sample, group) in group_ids.iter().enumerate() {
        let g = position[group];
        assignments.push(g);
        indices[g].push(sample);
    }

    SampleGroups {
        groups,
        assignments,
        indices,
    }
}

/// Check that a labelling partitions the samples into at least two clusters.
pub fn ensure_cluster_diversity<L>(groups: &SampleGroups<L>) -> Result<()> {
    if groups.n_groups() < 2 {
        return Err(MarkerError::InsufficientClusterDiversity {
            found: groups.n_groups(),
        });
    }
    Ok(())
}

/// Order a `sample id -> label` mapping by the rows of a matrix.
///
/// Every sample must carry exactly one label and every labelled sample must be present.
pub fn align_group_ids<S, L>(sample_ids: &[S], labels: &HashMap<String, L>) -> Result<Vec<L>>
where
    S: AsRef<str>,
    L: Clone,
{
    let mut seen: HashSet<&str> = HashSet::with_capacity(sample_ids.len());
    let mut aligned = Vec::with_capacity(sample_ids.len());
    let mut unlabelled = Vec::new();

    for sample in sample_ids {
        let sample = sample.as_ref();
        if !seen.insert(sample) {
            return Err(MarkerError::ShapeMismatch(format!(
                "sample '{}' appears more than once in the matrix",
                sample
            )));
        }
        match labels.get(sample) {
            Some(label) => aligned.push(label.clone()),
            None => unlabelled.push(sample),
        }
    }

    if !unlabelled.is_empty() {
        return Err(MarkerError::ShapeMismatch(format!(
            "{} sample(s) without a cluster label, first: '{}'",
            unlabelled.len(),
            unlabelled[0]
        )));
    }

    if labels.len() != aligned.len() {
        let mut unknown: Vec<&str> = labels
            .keys()
            .map(String::as_str)
            .filter(|s| !seen.contains(s))
            .collect();
        unknown.sort_unstable();
        return Err(MarkerError::ShapeMismatch(format!(
            "{} labelled sample(s) missing from the matrix, first: '{}'",
            unknown.len(),
            unknown.first().copied().unwrap_or_default()
        )));
    }

    Ok(aligned)
}
