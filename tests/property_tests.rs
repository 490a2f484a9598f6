//! Property-based tests for load distribution, statistics and ramp invariants.

use proptest::prelude::*;
use serde_json::json;

use ws_ramp::loadtest::controller::{plan_connections, spread_slices, LoadShape};
use ws_ramp::loadtest::metric::Metric;
use ws_ramp::loadtest::prompt::Prompt;
use ws_ramp::loadtest::ramp::ramp_schedule;
use ws_ramp::loadtest::stats::{ErrorCounts, LatencyStats};

proptest! {
    /// Spread mode uses every prompt exactly once, in contiguous slices whose
    /// sizes differ by at most one.
    #[test]
    fn spread_uses_each_prompt_once(len in 0usize..500, connections in 1usize..64) {
        let slices = spread_slices(len, connections);
        prop_assert_eq!(slices.len(), connections);

        let mut next = 0;
        for slice in &slices {
            prop_assert_eq!(slice.start, next);
            next = slice.end;
        }
        prop_assert_eq!(next, len);

        let sizes: Vec<usize> = slices.iter().map(|s| s.len()).collect();
        let min = sizes.iter().copied().min().unwrap_or(0);
        let max = sizes.iter().copied().max().unwrap_or(0);
        prop_assert!(max - min <= 1);
        // larger slices come first
        prop_assert!(sizes.windows(2).all(|w| w[0] >= w[1]));

        let plan = plan_connections(len, connections, LoadShape::Spread);
        let mut used: Vec<usize> = plan.into_iter().flatten().collect();
        used.sort_unstable();
        prop_assert_eq!(used, (0..len).collect::<Vec<_>>());
    }

    /// Fixed-queue mode issues exactly connections x queue_size exchanges,
    /// all drawn from the prompt range.
    #[test]
    fn fixed_queue_issues_connections_times_queue(
        len in 1usize..100,
        connections in 0usize..40,
        queue_size in 1usize..20,
    ) {
        let plan = plan_connections(len, connections, LoadShape::FixedQueue(queue_size));
        prop_assert_eq!(plan.len(), connections);
        prop_assert!(plan.iter().all(|draw| draw.len() == queue_size));
        prop_assert_eq!(plan.iter().map(Vec::len).sum::<usize>(), connections * queue_size);
        prop_assert!(plan.iter().flatten().all(|&i| i < len));
    }

    /// min <= median <= max and p95 <= p99 <= max, for any positive latencies.
    #[test]
    fn latency_stats_ordered(latencies in prop::collection::vec(0.001f64..30.0, 1..300)) {
        let stats = LatencyStats::from_latencies(latencies.iter().copied());
        prop_assert_eq!(stats.samples, latencies.len());
        prop_assert!(stats.min <= stats.median);
        prop_assert!(stats.median <= stats.max);
        prop_assert!(stats.min - 1e-9 <= stats.mean && stats.mean <= stats.max + 1e-9);
        prop_assert!(stats.p95 <= stats.p99);
        prop_assert!(stats.p99 <= stats.max);
        if latencies.len() < 20 {
            prop_assert_eq!(stats.p95, stats.max);
        }
        if latencies.len() < 100 {
            prop_assert_eq!(stats.p99, stats.max);
        }
    }

    /// Zero latencies (failed exchanges) never enter the distribution.
    #[test]
    fn zero_latencies_ignored(completed in 0usize..50, failed in 0usize..50) {
        let mut latencies = vec![0.5; completed];
        latencies.extend(std::iter::repeat_n(0.0, failed));
        let stats = LatencyStats::from_latencies(latencies);
        prop_assert_eq!(stats.samples, completed);
        if completed > 0 {
            prop_assert_eq!(stats.min, 0.5);
        }
    }

    /// The schedule starts at the step size, never exceeds the ceiling and
    /// always ends on it.
    #[test]
    fn ramp_schedule_bounded(step in 1usize..50, max in 1usize..500) {
        prop_assume!(step <= max);
        let schedule = ramp_schedule(step, max);
        prop_assert_eq!(schedule.first().copied(), Some(step));
        prop_assert_eq!(schedule.last().copied(), Some(max));
        prop_assert!(schedule.iter().all(|&c| c <= max));
        prop_assert!(schedule.windows(2).all(|w| w[0] < w[1] && w[1] - w[0] <= step));
    }

    /// Error rates are fractions of the denominator and never exceed 1 when
    /// the counts come from that many exchanges.
    #[test]
    fn error_rates_bounded(general in 0u64..50, client in 0u64..50, unexpected in 0u64..50, extra in 0usize..50) {
        let counts = ErrorCounts::new(general, client, unexpected);
        let denominator = counts.total as usize + extra;
        let rates = counts.rates(denominator);
        let sum = rates.general + rates.client + rates.unexpected;
        prop_assert!((0.0..=1.0 + 1e-9).contains(&sum));
        prop_assert!((rates.total - sum).abs() < 1e-9);
    }

    /// A metric's average is the mean of its scores, its score count equals
    /// the number of evaluations, and its failures are exactly the flagged ones.
    #[test]
    fn metric_accumulators_consistent(scores in prop::collection::vec(prop::bool::ANY, 0..100)) {
        let metric = Metric::new("flag", |_, response| {
            Ok(if response["ok"].as_bool().unwrap_or(false) { 1.0 } else { 0.0 })
        })
        .with_failure_predicate(|_, _, score| score == 0.0);
        for ok in &scores {
            metric.evaluate(&Prompt::new("q"), &json!({ "ok": ok }));
        }
        let ones = scores.iter().filter(|ok| **ok).count();
        prop_assert_eq!(metric.evaluated(), scores.len());
        prop_assert_eq!(metric.failures().len(), scores.len() - ones);
        let expected = if scores.is_empty() { 0.0 } else { ones as f64 / scores.len() as f64 };
        prop_assert!((metric.average() - expected).abs() < 1e-12);
    }
}
