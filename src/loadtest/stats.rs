//! Statistics aggregation over the exchange results of one step.
//!
//! Latency figures cover completed round trips only (latency > 0). Error
//! classification is delegated to a caller-supplied [`Classifier`], and error
//! rates always divide by the number of exchanges the step actually issued.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::loadtest::classify::{Classifier, Outcome};
use crate::loadtest::client::ExchangeResult;

/// Latency distribution in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub p95: f64,
    pub p99: f64,
    /// Number of latencies that entered the distribution.
    pub samples: usize,
}

impl LatencyStats {
    /// Computes the distribution over the strictly positive latencies only.
    pub fn from_latencies(latencies: impl IntoIterator<Item = f64>) -> Self {
        let mut sorted: Vec<f64> = latencies.into_iter().filter(|l| *l > 0.0).collect();
        if sorted.is_empty() {
            return Self::default();
        }
        sorted.sort_by(f64::total_cmp);

        let n = sorted.len();
        let max = sorted[n - 1];
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };
        Self {
            mean: sorted.iter().sum::<f64>() / n as f64,
            median,
            min: sorted[0],
            max,
            p95: if n < 20 { max } else { nearest_rank(&sorted, 95) },
            p99: if n < 100 { max } else { nearest_rank(&sorted, 99) },
            samples: n,
        }
    }
}

/// Nearest-rank percentile of an ascending slice: the value at rank
/// `ceil(percent / 100 * n)`, 1-based. Returns 0.0 for an empty slice.
pub fn nearest_rank(sorted: &[f64], percent: usize) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (percent * sorted.len()).div_ceil(100).clamp(1, sorted.len());
    sorted[rank - 1]
}

/// Error counts per classifier bucket, plus their sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorCounts {
    pub general: u64,
    pub client: u64,
    pub unexpected: u64,
    /// Sum of the three buckets.
    pub total: u64,
}

impl ErrorCounts {
    pub fn new(general: u64, client: u64, unexpected: u64) -> Self {
        Self {
            general,
            client,
            unexpected,
            total: general + client + unexpected,
        }
    }

    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Success => return,
            Outcome::GeneralError => self.general += 1,
            Outcome::ClientError => self.client += 1,
            Outcome::UnexpectedError => self.unexpected += 1,
        }
        self.total += 1;
    }

    /// Rates against `denominator`; all zero when nothing was issued.
    pub fn rates(&self, denominator: usize) -> ErrorRates {
        let rate = |count: u64| {
            if denominator == 0 {
                0.0
            } else {
                count as f64 / denominator as f64
            }
        };
        ErrorRates {
            general: rate(self.general),
            client: rate(self.client),
            unexpected: rate(self.unexpected),
            total: rate(self.total),
        }
    }
}

/// Error rates per classifier bucket, as fractions of issued exchanges.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ErrorRates {
    pub general: f64,
    pub client: f64,
    pub unexpected: f64,
    /// Any error at all, over the same denominator.
    pub total: f64,
}

/// Reduction of one batch of results, independent of how it was produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Aggregate {
    pub successes: u64,
    pub latency: LatencyStats,
    pub error_counts: ErrorCounts,
    pub error_rates: ErrorRates,
    /// Failure category (`transport`, `timeout`, `protocol`) to count.
    pub failure_kinds: BTreeMap<String, u64>,
}

/// Aggregate `results`, dividing error counts by `denominator`.
pub fn aggregate(
    results: &[ExchangeResult],
    classifier: &dyn Classifier,
    denominator: usize,
) -> Aggregate {
    let mut successes = 0;
    let mut error_counts = ErrorCounts::default();
    let mut failure_kinds = BTreeMap::new();

    for result in results {
        let outcome = classifier.classify(&result.response);
        if outcome == Outcome::Success {
            successes += 1;
        }
        error_counts.record(outcome);
        if let Some(err) = result.response.error() {
            *failure_kinds
                .entry(err.error_category().to_string())
                .or_insert(0) += 1;
        }
    }

    Aggregate {
        successes,
        latency: LatencyStats::from_latencies(results.iter().map(ExchangeResult::latency_secs)),
        error_counts,
        error_rates: error_counts.rates(denominator),
        failure_kinds,
    }
}

/// Statistics for one ramp step. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub connections: usize,
    /// `-1` for spread mode.
    pub queue_size: i64,
    /// Exchanges actually issued; the error-rate denominator.
    pub exchanges: usize,
    pub successes: u64,
    pub latency: LatencyStats,
    pub error_counts: ErrorCounts,
    pub error_rates: ErrorRates,
    pub failure_kinds: BTreeMap<String, u64>,
    pub elapsed_secs: f64,
    pub throughput_rps: f64,
}

impl StepResult {
    pub fn from_results(
        connections: usize,
        queue_size: i64,
        results: &[ExchangeResult],
        classifier: &dyn Classifier,
        elapsed: Duration,
    ) -> Self {
        let exchanges = results.len();
        let agg = aggregate(results, classifier, exchanges);
        let elapsed_secs = elapsed.as_secs_f64();
        Self {
            connections,
            queue_size,
            exchanges,
            successes: agg.successes,
            latency: agg.latency,
            error_counts: agg.error_counts,
            error_rates: agg.error_rates,
            failure_kinds: agg.failure_kinds,
            elapsed_secs,
            throughput_rps: if elapsed_secs > 0.0 {
                exchanges as f64 / elapsed_secs
            } else {
                0.0
            },
        }
    }
}

/// Responses and latency for one reported intent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntentStats {
    pub responses: u64,
    pub latency: LatencyStats,
}

/// Outcome of a quality run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityStats {
    pub total: usize,
    pub successes: u64,
    pub latency: LatencyStats,
    pub error_counts: ErrorCounts,
    pub failure_kinds: BTreeMap<String, u64>,
    /// Keyed by the intent the endpoint reported.
    pub intents: BTreeMap<String, IntentStats>,
}

/// Intent key for replies that carry none.
pub const UNKNOWN_INTENT: &str = "unknown";

impl QualityStats {
    pub fn from_results(results: &[ExchangeResult], classifier: &dyn Classifier) -> Self {
        let agg = aggregate(results, classifier, results.len());
        Self {
            total: results.len(),
            successes: agg.successes,
            latency: agg.latency,
            error_counts: agg.error_counts,
            failure_kinds: agg.failure_kinds,
            intents: intent_breakdown(results),
        }
    }
}

/// Group results by the intent the endpoint reported.
pub fn intent_breakdown(results: &[ExchangeResult]) -> BTreeMap<String, IntentStats> {
    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for result in results {
        let intent = result.response.intent().unwrap_or(UNKNOWN_INTENT);
        grouped
            .entry(intent.to_string())
            .or_default()
            .push(result.latency_secs());
    }
    grouped
        .into_iter()
        .map(|(intent, latencies)| {
            let stats = IntentStats {
                responses: latencies.len() as u64,
                latency: LatencyStats::from_latencies(latencies),
            };
            (intent, stats)
        })
        .collect()
}
