//! Reference-score threshold sweep.
//!
//! Replies may carry `references`, each with a `metadata.score`. A threshold
//! keeps the references scoring at or above it. The sweep tries two families
//! of per-reply thresholds and reports, for each candidate, how many replies
//! are left with exactly one reference:
//!
//! - percentile thresholds, the p-th percentile (linear interpolation) of the
//!   reply's own scores for p in 80..=99
//! - spread thresholds, `mean + n * std` (population standard deviation) of
//!   the reply's scores for n in 0.1..=2.0 by 0.1
//!
//! Replies without references take no part in the sweep.

use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Percentiles tried by the sweep.
pub const PERCENTILES: std::ops::RangeInclusive<u32> = 80..=99;

/// Standard-deviation multipliers tried by the sweep, in tenths.
const STD_DEV_TENTHS: std::ops::RangeInclusive<u32> = 1..=20;

/// A per-reply threshold rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ThresholdRule {
    /// The p-th percentile of the reply's scores.
    Percentile(u32),
    /// `mean + n * std` of the reply's scores.
    StdDevs(f64),
}

impl ThresholdRule {
    /// The cut-off this rule yields for one reply's scores.
    pub fn threshold(self, scores: &[f64]) -> f64 {
        match self {
            Self::Percentile(p) => percentile(scores, f64::from(p)),
            Self::StdDevs(n) => {
                let (mean, std) = mean_std(scores);
                mean + n * std
            }
        }
    }
}

impl fmt::Display for ThresholdRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percentile(p) => write!(f, "p{p}"),
            Self::StdDevs(n) => write!(f, "mean+{n:.1}std"),
        }
    }
}

/// Result of applying one rule to every reply with references.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdOutcome {
    pub rule: ThresholdRule,
    /// Replies left with exactly one reference.
    pub exactly_one: usize,
    pub avg_refs: f64,
    pub min_refs: usize,
    pub max_refs: usize,
}

/// Full sweep over a set of replies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdSweep {
    /// Replies examined.
    pub responses: usize,
    /// Replies that carried at least one reference.
    pub with_references: usize,
    pub percentile: Vec<ThresholdOutcome>,
    pub std_dev: Vec<ThresholdOutcome>,
    /// Earliest percentile rule with the highest `exactly_one`.
    pub best_percentile: Option<ThresholdOutcome>,
    /// Earliest spread rule with the highest `exactly_one`.
    pub best_std_dev: Option<ThresholdOutcome>,
}

/// Scores of a reply's references; a missing or non-numeric score counts as
/// 0. Returns `None` when the reply has no references.
pub fn reference_scores(response: &Value) -> Option<Vec<f64>> {
    let references = response.get("references")?.as_array()?;
    if references.is_empty() {
        return None;
    }
    Some(
        references
            .iter()
            .map(|doc| {
                doc.pointer("/metadata/score")
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0)
            })
            .collect(),
    )
}

/// Percentile with linear interpolation between closest ranks. 0.0 for no
/// scores.
pub fn percentile(scores: &[f64], p: f64) -> f64 {
    let mut sorted = scores.to_vec();
    sorted.sort_by(f64::total_cmp);
    let Some(&last) = sorted.last() else {
        return 0.0;
    };
    let n = sorted.len();
    if n == 1 {
        return last;
    }
    let rank = (n - 1) as f64 * p.clamp(0.0, 100.0) / 100.0;
    let lo = rank.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
}

/// Mean and population standard deviation.
fn mean_std(scores: &[f64]) -> (f64, f64) {
    if scores.is_empty() {
        return (0.0, 0.0);
    }
    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// References a rule keeps for one reply.
pub fn selected_count(rule: ThresholdRule, scores: &[f64]) -> usize {
    let threshold = rule.threshold(scores);
    scores.iter().filter(|s| **s >= threshold).count()
}

fn evaluate(rule: ThresholdRule, replies: &[Vec<f64>]) -> ThresholdOutcome {
    let counts: Vec<usize> = replies
        .iter()
        .map(|scores| selected_count(rule, scores))
        .collect();
    let avg_refs = if counts.is_empty() {
        0.0
    } else {
        counts.iter().sum::<usize>() as f64 / counts.len() as f64
    };
    ThresholdOutcome {
        rule,
        exactly_one: counts.iter().filter(|c| **c == 1).count(),
        avg_refs,
        min_refs: counts.iter().copied().min().unwrap_or(0),
        max_refs: counts.iter().copied().max().unwrap_or(0),
    }
}

/// First outcome with the highest `exactly_one`.
fn best(outcomes: &[ThresholdOutcome]) -> Option<ThresholdOutcome> {
    outcomes
        .iter()
        .fold(None::<&ThresholdOutcome>, |best, outcome| match best {
            Some(b) if b.exactly_one >= outcome.exactly_one => Some(b),
            _ => Some(outcome),
        })
        .cloned()
}

/// Sweep every rule over `responses`. `None` bests mean no reply carried
/// references.
pub fn sweep<'a>(responses: impl IntoIterator<Item = &'a Value>) -> ThresholdSweep {
    let mut examined = 0;
    let replies: Vec<Vec<f64>> = responses
        .into_iter()
        .inspect(|_| examined += 1)
        .filter_map(reference_scores)
        .collect();

    let percentile: Vec<_> = PERCENTILES
        .map(|p| evaluate(ThresholdRule::Percentile(p), &replies))
        .collect();
    let std_dev: Vec<_> = STD_DEV_TENTHS
        .map(|tenths| evaluate(ThresholdRule::StdDevs(f64::from(tenths) / 10.0), &replies))
        .collect();

    let (best_percentile, best_std_dev) = if replies.is_empty() {
        (None, None)
    } else {
        (best(&percentile), best(&std_dev))
    };
    tracing::debug!(
        responses = examined,
        with_references = replies.len(),
        "swept reference thresholds"
    );

    ThresholdSweep {
        responses: examined,
        with_references: replies.len(),
        percentile,
        std_dev,
        best_percentile,
        best_std_dev,
    }
}
