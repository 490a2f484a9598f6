//! Pluggable per-exchange quality metrics.
//!
//! A [`Metric`] pairs a scoring function with a failure predicate and keeps
//! its own accumulators: every evaluated score, and a [`FailureRecord`] for
//! every exchange the predicate flags. Metrics are shared across all
//! simulated connections behind an `Arc`, so the accumulators sit behind a
//! mutex that is never held across an await point.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::loadtest::error::ScoringError;
use crate::loadtest::prompt::Prompt;

type ScoreFn = dyn Fn(&Prompt, &Value) -> Result<f64, ScoringError> + Send + Sync;
type FailurePredicate = dyn Fn(&Prompt, &Value, f64) -> bool + Send + Sync;

/// A logged exchange for which the failure predicate held or scoring faulted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub prompt: Prompt,
    pub response: Value,
    pub reason: String,
}

/// Final state of one metric, handed to reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricResult {
    pub name: String,
    pub average: f64,
    pub scores: Vec<f64>,
    pub failures: Vec<FailureRecord>,
}

/// Averages-only view used in run summaries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub name: String,
    pub average: f64,
    pub evaluated: usize,
    pub failed: usize,
}

#[derive(Default)]
struct Accumulators {
    scores: Vec<f64>,
    failures: Vec<FailureRecord>,
}

/// A named scoring function plus failure predicate.
///
/// Without an explicit predicate every evaluated exchange is recorded as a
/// failure. Callers that only want genuine failures pass one through
/// [`Metric::with_failure_predicate`].
pub struct Metric {
    name: String,
    score_fn: Box<ScoreFn>,
    failure_predicate: Box<FailurePredicate>,
    state: Mutex<Accumulators>,
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Metric")
            .field("name", &self.name)
            .field("evaluated", &state.scores.len())
            .field("failed", &state.failures.len())
            .finish()
    }
}

impl Metric {
    pub fn new<F>(name: impl Into<String>, score_fn: F) -> Self
    where
        F: Fn(&Prompt, &Value) -> Result<f64, ScoringError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            score_fn: Box::new(score_fn),
            failure_predicate: Box::new(|_, _, _| true),
            state: Mutex::new(Accumulators::default()),
        }
    }

    pub fn with_failure_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Prompt, &Value, f64) -> bool + Send + Sync + 'static,
    {
        self.failure_predicate = Box::new(predicate);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Score one exchange and update the accumulators.
    ///
    /// Never fails outward: a scoring error or panic records a failure with
    /// the error as reason, appends a score of 0.0 and returns 0.0.
    pub fn evaluate(&self, prompt: &Prompt, response: &Value) -> f64 {
        let outcome = catch_unwind(AssertUnwindSafe(|| (self.score_fn)(prompt, response)))
            .unwrap_or_else(|panic| {
                Err(ScoringError::Fault {
                    message: panic_message(panic.as_ref()),
                })
            });

        match outcome {
            Ok(score) => {
                let failed = catch_unwind(AssertUnwindSafe(|| {
                    (self.failure_predicate)(prompt, response, score)
                }))
                .unwrap_or(true);
                let mut state = self.state.lock();
                state.scores.push(score);
                if failed {
                    state.failures.push(FailureRecord {
                        prompt: prompt.clone(),
                        response: response.clone(),
                        reason: format!("failure condition met (score {score})"),
                    });
                }
                score
            }
            Err(err) => {
                tracing::debug!(metric = %self.name, error = %err, "scoring failed");
                let mut state = self.state.lock();
                state.scores.push(0.0);
                state.failures.push(FailureRecord {
                    prompt: prompt.clone(),
                    response: response.clone(),
                    reason: err.to_string(),
                });
                0.0
            }
        }
    }

    /// Mean of all recorded scores, or 0.0 when none were recorded.
    pub fn average(&self) -> f64 {
        mean(&self.state.lock().scores)
    }

    pub fn scores(&self) -> Vec<f64> {
        self.state.lock().scores.clone()
    }

    pub fn failures(&self) -> Vec<FailureRecord> {
        self.state.lock().failures.clone()
    }

    pub fn evaluated(&self) -> usize {
        self.state.lock().scores.len()
    }

    pub fn results(&self) -> MetricResult {
        let state = self.state.lock();
        MetricResult {
            name: self.name.clone(),
            average: mean(&state.scores),
            scores: state.scores.clone(),
            failures: state.failures.clone(),
        }
    }

    pub fn summary(&self) -> MetricSummary {
        let state = self.state.lock();
        MetricSummary {
            name: self.name.clone(),
            average: mean(&state.scores),
            evaluated: state.scores.len(),
            failed: state.failures.len(),
        }
    }
}

fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
