//! Pure statistics derived from the votes of a revealed round.

use indexmap::IndexMap;

use crate::state::models::{CardValue, StoryId, Vote};

/// Statistics computed at reveal time.
#[derive(Debug, Clone, PartialEq)]
pub struct VotingStats {
    /// Story the votes were cast for.
    pub story_id: StoryId,
    /// Votes the statistics were computed from.
    pub votes: Vec<Vote>,
    /// Mean of numeric votes rounded half-up to one decimal.
    pub average: Option<f64>,
    /// Median of numeric votes.
    pub median: Option<f64>,
    /// Most frequent values (ties included) in first-encountered order.
    pub mode: Vec<CardValue>,
    /// At least two votes and all of them identical.
    pub consensus: bool,
    /// Max minus min of numeric votes, when at least two exist.
    pub spread: Option<u64>,
    /// Vote count per distinct value keyed by its string form.
    pub distribution: IndexMap<String, usize>,
}

/// Fibonacci cards a suggested estimate snaps to.
const FIBONACCI: [i64; 11] = [0, 1, 2, 3, 5, 8, 13, 21, 34, 55, 89];

impl VotingStats {
    /// Fibonacci card closest to the average; the smaller card wins a tie.
    pub fn suggested_estimate(&self) -> Option<i64> {
        let average = self.average?;
        FIBONACCI
            .into_iter()
            .reduce(|best, card| {
                if (card as f64 - average).abs() < (best as f64 - average).abs() {
                    card
                } else {
                    best
                }
            })
    }

    /// Spread exceeds half the average, or 5 for small averages.
    pub fn high_disagreement(&self) -> bool {
        match (self.spread, self.average) {
            (Some(spread), Some(average)) => spread as f64 > f64::max(5.0, average * 0.5),
            _ => false,
        }
    }
}

/// Compute [`VotingStats`] for `votes`.
pub fn compute(story_id: &str, votes: &[Vote]) -> VotingStats {
    let mut numeric: Vec<i64> = votes.iter().filter_map(|v| v.value.as_number()).collect();
    numeric.sort_unstable();

    let mut tally: IndexMap<String, (CardValue, usize)> = IndexMap::new();
    for vote in votes {
        tally
            .entry(vote.value.to_string())
            .or_insert_with(|| (vote.value.clone(), 0))
            .1 += 1;
    }

    let max_count = tally.values().map(|(_, count)| *count).max().unwrap_or(0);
    let mode = tally
        .values()
        .filter(|(_, count)| *count == max_count)
        .map(|(value, _)| value.clone())
        .collect();

    let average = (!numeric.is_empty()).then(|| {
        let total: i128 = numeric.iter().copied().map(i128::from).sum();
        let mean = total as f64 / numeric.len() as f64;
        round_tenths(mean)
    });

    let spread = match (numeric.first(), numeric.last()) {
        (Some(min), Some(max)) if numeric.len() > 1 => Some(max.abs_diff(*min)),
        _ => None,
    };

    VotingStats {
        story_id: story_id.to_string(),
        votes: votes.to_vec(),
        average,
        median: median(&numeric),
        mode,
        consensus: votes.len() > 1 && tally.len() == 1,
        spread,
        distribution: tally
            .into_iter()
            .map(|(key, (_, count))| (key, count))
            .collect(),
    }
}

/// Median of an already sorted slice.
fn median(sorted: &[i64]) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((i128::from(sorted[mid - 1]) + i128::from(sorted[mid])) as f64 / 2.0)
    } else {
        Some(sorted[mid] as f64)
    }
}

fn round_tenths(value: f64) -> f64 {
    (value * 10.0 + 0.5).floor() / 10.0
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use super::*;

    fn votes(values: Vec<CardValue>) -> Vec<Vote> {
        values
            .into_iter()
            .enumerate()
            .map(|(index, value)| Vote {
                participant_id: format!("p{index}"),
                participant_name: format!("Player {index}"),
                story_id: "story".into(),
                value,
                timestamp: SystemTime::now(),
            })
            .collect()
    }

    #[test]
    fn no_votes_yields_empty_stats() {
        let stats = compute("story", &[]);
        assert_eq!(stats.average, None);
        assert_eq!(stats.median, None);
        assert!(stats.mode.is_empty());
        assert!(!stats.consensus);
        assert_eq!(stats.spread, None);
        assert!(stats.distribution.is_empty());
    }

    #[test]
    fn identical_votes_reach_consensus() {
        let stats = compute("story", &votes(vec![3.into(), 3.into()]));
        assert_eq!(stats.average, Some(3.0));
        assert_eq!(stats.median, Some(3.0));
        assert_eq!(stats.mode, vec![CardValue::Number(3)]);
        assert!(stats.consensus);
        assert_eq!(stats.spread, Some(0));
        assert_eq!(stats.distribution.get("3"), Some(&2));
    }

    #[test]
    fn symbolic_votes_only_count_towards_mode_and_distribution() {
        let stats = compute("story", &votes(vec![1.into(), 2.into(), "?".into()]));
        assert_eq!(stats.average, Some(1.5));
        assert_eq!(stats.median, Some(1.5));
        assert_eq!(
            stats.mode,
            vec![CardValue::Number(1), CardValue::Number(2), CardValue::from("?")]
        );
        assert!(!stats.consensus);
        assert_eq!(stats.spread, Some(1));
        assert_eq!(stats.distribution.get("?"), Some(&1));
        assert_eq!(stats.distribution.len(), 3);
    }

    #[test]
    fn single_vote_has_no_consensus_nor_spread() {
        let stats = compute("story", &votes(vec![8.into()]));
        assert!(!stats.consensus);
        assert_eq!(stats.spread, None);
        assert_eq!(stats.average, Some(8.0));
    }

    #[test]
    fn consensus_applies_to_symbolic_values() {
        let stats = compute("story", &votes(vec!["☕".into(), "☕".into()]));
        assert!(stats.consensus);
        assert_eq!(stats.average, None);
        assert_eq!(stats.median, None);
        assert_eq!(stats.spread, None);
    }

    #[test]
    fn blank_votes_are_keyed_as_null() {
        let stats = compute("story", &votes(vec![CardValue::Blank, 5.into(), CardValue::Blank]));
        assert_eq!(stats.distribution.get("null"), Some(&2));
        assert_eq!(stats.mode, vec![CardValue::Blank]);
        assert_eq!(stats.average, Some(5.0));
    }

    #[test]
    fn average_rounds_half_up_to_one_decimal() {
        // 1 + 1 + 2 + 1 = 5 / 4 = 1.25
        let stats = compute("story", &votes(vec![1.into(), 1.into(), 2.into(), 1.into()]));
        assert_eq!(stats.average, Some(1.3));

        // 1 + 2 + 2 = 5 / 3 = 1.666..
        let stats = compute("story", &votes(vec![1.into(), 2.into(), 2.into()]));
        assert_eq!(stats.average, Some(1.7));
    }

    #[test]
    fn median_of_unsorted_votes() {
        let stats = compute("story", &votes(vec![13.into(), 1.into(), 5.into(), 3.into()]));
        assert_eq!(stats.median, Some(4.0));
        assert_eq!(stats.spread, Some(12));
        assert_eq!(stats.mode.len(), 4);
    }

    #[test]
    fn extreme_numbers_do_not_overflow() {
        let stats = compute("story", &votes(vec![i64::MAX.into(), 1.into()]));
        assert_eq!(stats.average, Some(round_tenths((i64::MAX as f64 + 1.0) / 2.0)));
        assert_eq!(stats.median, Some((i64::MAX as f64 + 1.0) / 2.0));
        assert_eq!(stats.spread, Some(i64::MAX as u64 - 1));

        let stats = compute("story", &votes(vec![i64::MIN.into(), i64::MAX.into()]));
        assert_eq!(stats.spread, Some(u64::MAX));
        assert_eq!(stats.median, Some(-0.5));
        assert!(stats.average.is_some_and(|average| average.abs() < 1.0));
    }

    #[test]
    fn suggestion_snaps_to_nearest_fibonacci() {
        let stats = compute("story", &votes(vec![3.into(), 8.into()]));
        assert_eq!(stats.average, Some(5.5));
        assert_eq!(stats.suggested_estimate(), Some(5));

        let stats = compute("story", &votes(vec![13.into(), 21.into(), 21.into()]));
        assert_eq!(stats.suggested_estimate(), Some(21));

        let stats = compute("story", &votes(vec!["?".into()]));
        assert_eq!(stats.suggested_estimate(), None);
    }

    #[test]
    fn disagreement_compares_spread_with_average() {
        assert!(!compute("story", &votes(vec![3.into(), 8.into()])).high_disagreement());
        assert!(compute("story", &votes(vec![1.into(), 13.into()])).high_disagreement());
        // spread 13 against a floor of max(5, 27.5 / 2)
        assert!(!compute("story", &votes(vec![21.into(), 34.into()])).high_disagreement());
        assert!(!compute("story", &votes(vec![8.into()])).high_disagreement());
    }
}
