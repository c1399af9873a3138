//! Marker selection from a long-form v-test score table.
//!
//! A feature is a high marker of cluster `c` when `c` is the only cluster whose score exceeds the
//! significance threshold: the highest score is above `+t` and the runner-up is below it. Low
//! markers mirror this around `-t`. Both directions are evaluated independently, so a feature can
//! be reported once in each set.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};

use crate::error::{MarkerError, Result};
use crate::testing::{MarkerDirection, MarkerEntry, MarkerSets, ScoreEntry};

/// Extreme well-defined scores of one feature, as indices into its score rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremes {
    pub highest: (usize, f64),
    pub second_highest: f64,
    pub lowest: (usize, f64),
    pub second_lowest: f64,
}

impl Extremes {
    /// Linear scan for the top two and bottom two scores, skipping NaN.
    ///
    /// Returns `None` when fewer than two scores are defined. Tied scores occupy separate
    /// ranks, so two clusters sharing the maximum also share the runner-up value.
    pub fn scan<I>(scores: I) -> Option<Self>
    where
        I: IntoIterator<Item = f64>,
    {
        let mut highest: Option<(usize, f64)> = None;
        let mut second_highest = f64::NEG_INFINITY;
        let mut lowest: Option<(usize, f64)> = None;
        let mut second_lowest = f64::INFINITY;
        let mut defined = 0usize;

        for (idx, score) in scores.into_iter().enumerate() {
            if score.is_nan() {
                continue;
            }
            defined += 1;

            match highest {
                Some((_, top)) if score <= top => {
                    if score > second_highest {
                        second_highest = score;
                    }
                }
                Some((_, top)) => {
                    second_highest = top;
                    highest = Some((idx, score));
                }
                None => highest = Some((idx, score)),
            }

            match lowest {
                Some((_, bottom)) if score >= bottom => {
                    if score < second_lowest {
                        second_lowest = score;
                    }
                }
                Some((_, bottom)) => {
                    second_lowest = bottom;
                    lowest = Some((idx, score));
                }
                None => lowest = Some((idx, score)),
            }
        }

        if defined < 2 {
            return None;
        }
        Some(Extremes {
            highest: highest?,
            second_highest,
            lowest: lowest?,
            second_lowest,
        })
    }

    /// Index of the single cluster above `threshold`, if there is exactly one.
    pub fn high_marker(&self, threshold: f64) -> Option<usize> {
        let (idx, score) = self.highest;
        (score > threshold && self.second_highest < threshold).then_some(idx)
    }

    /// Index of the single cluster below `-threshold`, if there is exactly one.
    pub fn low_marker(&self, threshold: f64) -> Option<usize> {
        let (idx, score) = self.lowest;
        (score < -threshold && self.second_lowest > -threshold).then_some(idx)
    }
}

fn marker_entry<L: Clone>(entry: &ScoreEntry<L>, direction: MarkerDirection) -> MarkerEntry<L> {
    MarkerEntry {
        feature: entry.feature.clone(),
        cluster: entry.cluster.clone(),
        score: entry.score,
        direction,
    }
}

/// Group score rows by feature, keeping the order in which features first appear.
fn group_by_feature<'a, L>(
    scores: &'a [ScoreEntry<L>],
    cluster_count: usize,
) -> Result<Vec<Vec<&'a ScoreEntry<L>>>>
where
    L: Eq + Hash,
{
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut grouped: Vec<Vec<&ScoreEntry<L>>> = Vec::new();

    for entry in scores {
        let idx = *position.entry(entry.feature.as_str()).or_insert_with(|| {
            grouped.push(Vec::with_capacity(cluster_count));
            grouped.len() - 1
        });
        grouped[idx].push(entry);
    }

    for rows in &grouped {
        let feature = &rows[0].feature;
        if rows.len() != cluster_count {
            return Err(MarkerError::MalformedScoreTable(format!(
                "feature '{}' has {} score rows, expected {}",
                feature,
                rows.len(),
                cluster_count
            )));
        }
        let distinct: HashSet<&L> = rows.iter().map(|entry| &entry.cluster).collect();
        if distinct.len() != rows.len() {
            return Err(MarkerError::MalformedScoreTable(format!(
                "feature '{}' lists the same cluster more than once",
                feature
            )));
        }
    }

    Ok(grouped)
}

/// Select high and low markers from a long-form score table.
///
/// `cluster_count` is the number of clusters every feature was scored against; each feature must
/// have exactly that many rows with distinct clusters. Row order is irrelevant. Output follows the
/// order in which features first appear in `scores`.
pub fn select_markers<L>(
    scores: &[ScoreEntry<L>],
    cluster_count: usize,
    threshold: f64,
) -> Result<MarkerSets<L>>
where
    L: Clone + Eq + Hash + Send + Sync,
{
    if cluster_count < 2 {
        return Err(MarkerError::InsufficientClusterDiversity {
            found: cluster_count,
        });
    }

    let grouped = group_by_feature(scores, cluster_count)?;

    let selected: Vec<(Option<MarkerEntry<L>>, Option<MarkerEntry<L>>)> = grouped
        .par_iter()
        .map(|rows| match Extremes::scan(rows.iter().map(|entry| entry.score)) {
            Some(extremes) => (
                extremes
                    .high_marker(threshold)
                    .map(|idx| marker_entry(rows[idx], MarkerDirection::High)),
                extremes
                    .low_marker(threshold)
                    .map(|idx| marker_entry(rows[idx], MarkerDirection::Low)),
            ),
            None => (None, None),
        })
        .collect();

    let mut high = Vec::new();
    let mut low = Vec::new();
    for (h, l) in selected {
        high.extend(h);
        low.extend(l);
    }

    log::debug!(
        "Selected {} high and {} low markers from {} features",
        high.len(),
        low.len(),
        grouped.len()
    );

    Ok(MarkerSets { high, low })
}
