//! Ramp controller: steps concurrency upward and aggregates every step.
//!
//! The connection count starts at the step size and grows by the step size
//! until it reaches the configured ceiling; the step at the ceiling is the
//! last one. A step always runs to completion. Cancellation is only observed
//! between steps (and during the pause between them), after which the run
//! summary is returned flagged as interrupted.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::loadtest::classify::Classifier;
use crate::loadtest::controller::{ConcurrencyController, LoadShape};
use crate::loadtest::error::LoadTestError;
use crate::loadtest::metric::MetricSummary;
use crate::loadtest::prompt::Prompt;
use crate::loadtest::stats::StepResult;

/// Knobs that shape a ramp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RampSettings {
    pub max_connections: usize,
    pub step_size: usize,
    /// `-1` for spread mode, otherwise prompts drawn per connection.
    pub queue_size: i64,
    pub think_time_ms: u64,
    /// Pause between consecutive steps.
    pub step_pause_secs: u64,
}

impl Default for RampSettings {
    fn default() -> Self {
        Self {
            max_connections: 100,
            step_size: 10,
            queue_size: 10,
            think_time_ms: 5000,
            step_pause_secs: 60,
        }
    }
}

impl RampSettings {
    pub fn validate(&self) -> Result<(), LoadTestError> {
        if self.step_size == 0 {
            return Err(LoadTestError::validation("step_size must be greater than 0"));
        }
        if self.max_connections == 0 {
            return Err(LoadTestError::validation(
                "max_connections must be greater than 0",
            ));
        }
        if self.step_size > self.max_connections {
            return Err(LoadTestError::validation(format!(
                "step_size ({}) must not exceed max_connections ({})",
                self.step_size, self.max_connections
            )));
        }
        self.shape().map(|_| ())
    }

    pub fn shape(&self) -> Result<LoadShape, LoadTestError> {
        LoadShape::from_queue_size(self.queue_size)
    }

    pub fn think_time(&self) -> Duration {
        Duration::from_millis(self.think_time_ms)
    }

    pub fn step_pause(&self) -> Duration {
        Duration::from_secs(self.step_pause_secs)
    }

    pub fn schedule(&self) -> Vec<usize> {
        ramp_schedule(self.step_size, self.max_connections)
    }
}

/// Connection count of the step after `current`, or `None` once the ceiling
/// has been run.
pub fn next_count(current: usize, step_size: usize, max_connections: usize) -> Option<usize> {
    (current < max_connections).then(|| current.saturating_add(step_size).min(max_connections))
}

/// Every connection count a ramp visits, in order.
pub fn ramp_schedule(step_size: usize, max_connections: usize) -> Vec<usize> {
    if step_size == 0 || max_connections == 0 {
        return Vec::new();
    }
    let mut counts = vec![step_size.min(max_connections)];
    while let Some(next) = counts
        .last()
        .and_then(|&current| next_count(current, step_size, max_connections))
    {
        counts.push(next);
    }
    counts
}

/// Everything a ramp produced, handed to reporting once the ramp ends.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub endpoint: String,
    pub origin: String,
    pub started_at: DateTime<Utc>,
    pub settings: RampSettings,
    /// Step results keyed by connection count, in the order they ran.
    pub steps: IndexMap<usize, StepResult>,
    /// Metric averages over the whole run.
    pub metrics: Vec<MetricSummary>,
    pub elapsed_secs: f64,
    /// Whether the ramp stopped early on request.
    pub interrupted: bool,
}

/// Drives a [`ConcurrencyController`] through increasing connection counts.
pub struct RampController {
    controller: ConcurrencyController,
    classifier: Arc<dyn Classifier>,
    settings: RampSettings,
    endpoint: String,
    origin: String,
}

impl RampController {
    pub fn new(
        controller: ConcurrencyController,
        classifier: Arc<dyn Classifier>,
        settings: RampSettings,
    ) -> Self {
        Self {
            controller,
            classifier,
            settings,
            endpoint: String::new(),
            origin: String::new(),
        }
    }

    /// Labels the summary with the target under test.
    pub fn with_target(mut self, endpoint: impl Into<String>, origin: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self.origin = origin.into();
        self
    }

    pub fn settings(&self) -> &RampSettings {
        &self.settings
    }

    /// Run the whole ramp. Fails only on setup faults; exchange failures are
    /// part of the step results.
    pub async fn run(
        &self,
        prompts: Arc<[Prompt]>,
        cancel: CancellationToken,
    ) -> Result<RunSummary, LoadTestError> {
        if prompts.is_empty() {
            return Err(LoadTestError::EmptyPromptSource {
                origin: "the prompt source".to_string(),
            });
        }
        self.settings.validate()?;
        let shape = self.settings.shape()?;
        let think_time = self.settings.think_time();
        let step_pause = self.settings.step_pause();

        let started_at = Utc::now();
        let start = Instant::now();
        let mut steps = IndexMap::new();
        let mut interrupted = false;
        let mut current = self.settings.step_size.min(self.settings.max_connections);

        tracing::info!(
            endpoint = %self.endpoint,
            prompts = prompts.len(),
            schedule = ?self.settings.schedule(),
            queue_size = self.settings.queue_size,
            "starting ramp"
        );

        loop {
            tracing::info!(connections = current, "running step");
            let step_start = Instant::now();
            let results = self
                .controller
                .run(prompts.clone(), current, shape, think_time)
                .await;
            let step = StepResult::from_results(
                current,
                self.settings.queue_size,
                &results,
                self.classifier.as_ref(),
                step_start.elapsed(),
            );
            tracing::info!(
                connections = current,
                exchanges = step.exchanges,
                successes = step.successes,
                mean_latency = step.latency.mean,
                p95_latency = step.latency.p95,
                general_errors = step.error_counts.general,
                client_errors = step.error_counts.client,
                unexpected_errors = step.error_counts.unexpected,
                error_rate = step.error_rates.total,
                "step complete"
            );
            steps.insert(current, step);

            if cancel.is_cancelled() {
                interrupted = true;
                break;
            }
            let Some(next) =
                next_count(current, self.settings.step_size, self.settings.max_connections)
            else {
                break;
            };
            if !step_pause.is_zero() {
                tracing::info!(pause_secs = step_pause.as_secs(), next, "pausing before next step");
                tokio::select! {
                    _ = tokio::time::sleep(step_pause) => {}
                    _ = cancel.cancelled() => {
                        interrupted = true;
                        break;
                    }
                }
            }
            current = next;
        }

        if interrupted {
            tracing::warn!(steps = steps.len(), "ramp interrupted");
        }

        Ok(RunSummary {
            endpoint: self.endpoint.clone(),
            origin: self.origin.clone(),
            started_at,
            settings: self.settings.clone(),
            steps,
            metrics: self
                .controller
                .metrics()
                .iter()
                .map(|metric| metric.summary())
                .collect(),
            elapsed_secs: start.elapsed().as_secs_f64(),
            interrupted,
        })
    }
}
