//! Concurrency controller: fans one ramp step out over simulated connections.
//!
//! Each simulated connection is one spawned task that replays its own draw of
//! prompts strictly in order, pausing the think time before every send. All
//! connections of a step run concurrently and are joined before the step
//! ends. A connection that faults mid-batch keeps the results it already
//! produced; its siblings are unaffected.
//!
//! The rest of a faulting connection's draw is never issued, so a step can
//! report fewer exchanges than `connections × queue_size` (or the prompt
//! count in spread mode). Error rates divide by the exchanges actually
//! returned.

use futures::FutureExt;
use rand::prelude::*;
use std::ops::Range;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;

use crate::loadtest::client::{Exchange, ExchangeResult};
use crate::loadtest::error::LoadTestError;
use crate::loadtest::metric::{panic_message, Metric};
use crate::loadtest::prompt::Prompt;

/// How prompts are distributed over the simulated connections of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadShape {
    /// Every prompt exactly once, split into contiguous near-equal slices.
    Spread,
    /// Each connection draws this many prompts uniformly with replacement.
    FixedQueue(usize),
}

impl LoadShape {
    /// `-1` selects spread mode, any positive value a fixed queue.
    pub fn from_queue_size(queue_size: i64) -> Result<Self, LoadTestError> {
        match queue_size {
            -1 => Ok(Self::Spread),
            n if n > 0 => Ok(Self::FixedQueue(n as usize)),
            n => Err(LoadTestError::validation(format!(
                "queue_size must be -1 (spread) or positive, got {n}"
            ))),
        }
    }

    /// The queue size as configured, `-1` for spread mode.
    pub fn queue_size(self) -> i64 {
        match self {
            Self::Spread => -1,
            Self::FixedQueue(n) => n as i64,
        }
    }
}

/// Contiguous slices of `0..len` for `connections` connections.
///
/// Slice sizes are `len / connections`, the first `len % connections` slices
/// one larger. Excess connections get empty slices.
pub fn spread_slices(len: usize, connections: usize) -> Vec<Range<usize>> {
    if connections == 0 {
        return Vec::new();
    }
    let base = len / connections;
    let extra = len % connections;
    let mut start = 0;
    (0..connections)
        .map(|i| {
            let size = base + usize::from(i < extra);
            let slice = start..start + size;
            start += size;
            slice
        })
        .collect()
}

/// Prompt indices each simulated connection will replay, in order.
pub fn plan_connections(len: usize, connections: usize, shape: LoadShape) -> Vec<Vec<usize>> {
    match shape {
        LoadShape::Spread => spread_slices(len, connections)
            .into_iter()
            .map(|slice| slice.collect::<Vec<_>>())
            .collect(),
        LoadShape::FixedQueue(_) if len == 0 => vec![Vec::new(); connections],
        LoadShape::FixedQueue(queue_size) => {
            let mut rng = rand::rng();
            (0..connections)
                .map(|_| {
                    (0..queue_size)
                        .map(|_| rng.random_range(0..len))
                        .collect::<Vec<_>>()
                })
                .collect()
        }
    }
}

/// Completed-exchange counter shared by all connections of a step.
#[derive(Clone, Debug, Default)]
pub struct ExchangeCounter(Arc<AtomicU64>);

impl ExchangeCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed exchange and returns the new total.
    pub fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Runs batches of exchanges with bounded parallelism and scores every reply.
#[derive(Clone)]
pub struct ConcurrencyController {
    exchanger: Arc<dyn Exchange>,
    metrics: Vec<Arc<Metric>>,
}

impl ConcurrencyController {
    pub fn new(exchanger: Arc<dyn Exchange>, metrics: Vec<Arc<Metric>>) -> Self {
        Self { exchanger, metrics }
    }

    pub fn metrics(&self) -> &[Arc<Metric>] {
        &self.metrics
    }

    /// Replay `prompts` over `connections` concurrent simulated connections.
    ///
    /// Results are flattened in the order connections finish.
    pub async fn run(
        &self,
        prompts: Arc<[Prompt]>,
        connections: usize,
        shape: LoadShape,
        think_time: Duration,
    ) -> Vec<ExchangeResult> {
        let plan = plan_connections(prompts.len(), connections, shape);
        let total: usize = plan.iter().map(Vec::len).sum();
        let completed = ExchangeCounter::new();

        tracing::debug!(connections, total, ?shape, "starting connections");

        let mut tasks = JoinSet::new();
        for (id, draw) in plan.into_iter().enumerate() {
            let replay = ConnectionReplay {
                id,
                draw,
                prompts: prompts.clone(),
                exchanger: self.exchanger.clone(),
                metrics: self.metrics.clone(),
                think_time,
                completed: completed.clone(),
                total,
            };
            tasks.spawn(replay.run());
        }

        let mut results = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(batch) => results.extend(batch),
                Err(err) => tracing::warn!(error = %err, "connection task did not complete"),
            }
        }
        results
    }
}

struct ConnectionReplay {
    id: usize,
    draw: Vec<usize>,
    prompts: Arc<[Prompt]>,
    exchanger: Arc<dyn Exchange>,
    metrics: Vec<Arc<Metric>>,
    think_time: Duration,
    completed: ExchangeCounter,
    total: usize,
}

impl ConnectionReplay {
    async fn run(self) -> Vec<ExchangeResult> {
        let mut results = Vec::with_capacity(self.draw.len());
        let outcome = AssertUnwindSafe(self.replay(&mut results))
            .catch_unwind()
            .await;
        if let Err(panic) = outcome {
            tracing::warn!(
                connection = self.id,
                kept = results.len(),
                planned = self.draw.len(),
                error = %panic_message(panic.as_ref()),
                "connection faulted, keeping partial results"
            );
        }
        results
    }

    async fn replay(&self, results: &mut Vec<ExchangeResult>) {
        for &index in &self.draw {
            if !self.think_time.is_zero() {
                tokio::time::sleep(self.think_time).await;
            }
            let result = self.exchanger.exchange(&self.prompts[index]).await;
            let payload = result.response.payload();
            for metric in &self.metrics {
                metric.evaluate(&result.prompt, &payload);
            }
            let done = self.completed.increment();
            tracing::debug!(
                connection = self.id,
                completed = done,
                total = self.total,
                latency_ms = result.latency.as_millis() as u64,
                "exchange completed"
            );
            results.push(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::client::Response;
    use crate::loadtest::error::ExchangeError;
    use crate::loadtest::registry;
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::collections::HashSet;

    struct Echo;

    #[async_trait]
    impl Exchange for Echo {
        async fn exchange(&self, prompt: &Prompt) -> ExchangeResult {
            let mut payload = Map::new();
            payload.insert("message".into(), json!(prompt.question));
            payload.insert("intent".into(), json!(prompt.expected_intent));
            ExchangeResult::success(prompt.clone(), payload, Duration::from_millis(3))
        }
    }

    /// Panics on a specific question, times out on another.
    struct Flaky;

    #[async_trait]
    impl Exchange for Flaky {
        async fn exchange(&self, prompt: &Prompt) -> ExchangeResult {
            match prompt.question.as_str() {
                "boom" => panic!("connection crashed"),
                "slow" => ExchangeResult::failure(prompt.clone(), ExchangeError::Timeout { after_ms: 1 }),
                _ => Echo.exchange(prompt).await,
            }
        }
    }

    fn prompts(n: usize) -> Arc<[Prompt]> {
        (0..n).map(|i| Prompt::new(format!("q{i}"))).collect()
    }

    #[test]
    fn test_from_queue_size() {
        assert_eq!(LoadShape::from_queue_size(-1).unwrap(), LoadShape::Spread);
        assert_eq!(LoadShape::from_queue_size(4).unwrap(), LoadShape::FixedQueue(4));
        assert!(LoadShape::from_queue_size(0).is_err());
        assert!(LoadShape::from_queue_size(-2).is_err());
        assert_eq!(LoadShape::FixedQueue(4).queue_size(), 4);
        assert_eq!(LoadShape::Spread.queue_size(), -1);
    }

    #[test]
    fn test_spread_slices_sizes() {
        let slices = spread_slices(10, 3);
        assert_eq!(slices, vec![0..4, 4..7, 7..10]);
    }

    #[test]
    fn test_spread_slices_more_connections_than_prompts() {
        let slices = spread_slices(2, 4);
        let sizes: Vec<_> = slices.iter().map(|r| r.len()).collect();
        assert_eq!(sizes, vec![1, 1, 0, 0]);
    }

    #[test]
    fn test_spread_slices_zero_connections() {
        assert!(spread_slices(5, 0).is_empty());
    }

    #[test]
    fn test_fixed_queue_plan() {
        let plan = plan_connections(7, 5, LoadShape::FixedQueue(3));
        assert_eq!(plan.len(), 5);
        assert!(plan.iter().all(|draw| draw.len() == 3));
        assert!(plan.iter().flatten().all(|&i| i < 7));
    }

    #[test]
    fn test_fixed_queue_plan_without_prompts() {
        let plan = plan_connections(0, 3, LoadShape::FixedQueue(3));
        assert_eq!(plan.len(), 3);
        assert!(plan.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_exchange_counter() {
        let counter = ExchangeCounter::new();
        let clone = counter.clone();
        assert_eq!(counter.increment(), 1);
        assert_eq!(clone.increment(), 2);
        assert_eq!(counter.get(), 2);
    }

    #[tokio::test]
    async fn test_spread_run_uses_every_prompt_once() {
        let controller = ConcurrencyController::new(Arc::new(Echo), Vec::new());
        let results = controller
            .run(prompts(11), 4, LoadShape::Spread, Duration::ZERO)
            .await;
        assert_eq!(results.len(), 11);
        let seen: HashSet<_> = results.iter().map(|r| r.prompt.question.clone()).collect();
        assert_eq!(seen.len(), 11);
    }

    #[tokio::test]
    async fn test_fixed_queue_run_issues_connections_times_queue() {
        let controller = ConcurrencyController::new(Arc::new(Echo), Vec::new());
        let results = controller
            .run(prompts(3), 6, LoadShape::FixedQueue(4), Duration::ZERO)
            .await;
        assert_eq!(results.len(), 24);
    }

    #[tokio::test]
    async fn test_every_result_is_scored_by_every_metric() {
        let metrics = registry::default_metrics();
        let controller = ConcurrencyController::new(Arc::new(Flaky), metrics.clone());
        let prompts: Arc<[Prompt]> = vec![Prompt::new("a"), Prompt::new("slow"), Prompt::new("b")].into();
        let results = controller
            .run(prompts, 2, LoadShape::Spread, Duration::ZERO)
            .await;
        assert_eq!(results.len(), 3);
        for metric in &metrics {
            assert_eq!(metric.evaluated(), 3, "{}", metric.name());
        }
    }

    #[tokio::test]
    async fn test_faulting_connection_keeps_partial_results() {
        let controller = ConcurrencyController::new(Arc::new(Flaky), Vec::new());
        // first connection: a, b, boom, c; second: d, e, f
        let prompts: Arc<[Prompt]> = ["a", "b", "boom", "c", "d", "e", "f"]
            .into_iter()
            .map(Prompt::new)
            .collect();
        let results = controller
            .run(prompts, 2, LoadShape::Spread, Duration::ZERO)
            .await;
        let questions: HashSet<_> = results.iter().map(|r| r.prompt.question.as_str()).collect();
        assert_eq!(results.len(), 5);
        for q in ["a", "b", "d", "e", "f"] {
            assert!(questions.contains(q), "missing {q}");
        }
        assert!(!questions.contains("c"));
    }

    #[tokio::test]
    async fn test_faulting_connection_abandons_rest_of_draw() {
        let controller = ConcurrencyController::new(Arc::new(Flaky), Vec::new());
        let prompts: Arc<[Prompt]> = vec![Prompt::new("boom")].into();
        // every draw starts with the faulting prompt: nothing after it is issued
        let results = controller
            .run(prompts, 2, LoadShape::FixedQueue(3), Duration::ZERO)
            .await;
        assert!(results.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_think_time_paces_each_send() {
        let controller = ConcurrencyController::new(Arc::new(Echo), Vec::new());
        let start = tokio::time::Instant::now();
        let results = controller
            .run(prompts(6), 2, LoadShape::Spread, Duration::from_millis(500))
            .await;
        assert_eq!(results.len(), 6);
        // three sequential sends per connection, connections in parallel
        assert!(start.elapsed() >= Duration::from_millis(1500));
        assert!(start.elapsed() < Duration::from_millis(3000));
    }

    #[tokio::test]
    async fn test_failure_results_reach_metrics_as_payload() {
        let metric = Arc::new(Metric::new("saw_error", |_, response: &serde_json::Value| {
            Ok(if response.get("error").is_some() { 1.0 } else { 0.0 })
        }));
        let controller = ConcurrencyController::new(Arc::new(Flaky), vec![metric.clone()]);
        let prompts: Arc<[Prompt]> = vec![Prompt::new("slow")].into();
        let results = controller
            .run(prompts, 1, LoadShape::Spread, Duration::ZERO)
            .await;
        assert!(matches!(results[0].response, Response::Failure(_)));
        assert_eq!(metric.scores(), vec![1.0]);
    }
}
