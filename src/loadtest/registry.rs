//! Built-in response-quality metrics.
//!
//! Every call to [`default_metrics`] or [`metrics_by_name`] builds fresh
//! [`Metric`] instances, so two runs never share accumulators.

use serde_json::Value;
use std::sync::Arc;

use crate::loadtest::error::{LoadTestError, ScoringError};
use crate::loadtest::metric::Metric;
use crate::loadtest::prompt::Prompt;

/// Replies longer than this many characters fail `length_check`.
pub const MAX_RESPONSE_CHARS: usize = 1000;

/// Names accepted by [`metrics_by_name`], in registry order.
pub const BUILTIN_METRICS: &[&str] = &[
    "classification_accuracy",
    "ref_recall_count",
    "length_check",
    "sentence_count",
];

/// All built-in metrics, freshly constructed.
pub fn default_metrics() -> Vec<Arc<Metric>> {
    BUILTIN_METRICS
        .iter()
        .filter_map(|name| builtin(name))
        .map(Arc::new)
        .collect()
}

/// Build the named subset of built-in metrics, preserving the given order.
pub fn metrics_by_name(names: &[String]) -> Result<Vec<Arc<Metric>>, LoadTestError> {
    names
        .iter()
        .map(|name| {
            builtin(name).map(Arc::new).ok_or_else(|| {
                LoadTestError::validation(format!(
                    "unknown metric '{name}' (available: {})",
                    BUILTIN_METRICS.join(", ")
                ))
            })
        })
        .collect()
}

fn builtin(name: &str) -> Option<Metric> {
    let metric = match name {
        "classification_accuracy" => Metric::new(name, classification_accuracy),
        "ref_recall_count" => Metric::new(name, ref_recall_count),
        "length_check" => Metric::new(name, length_check),
        "sentence_count" => Metric::new(name, sentence_count),
        _ => return None,
    };
    Some(metric.with_failure_predicate(|_, _, score| score == 0.0))
}

fn message(response: &Value) -> &str {
    response.get("message").and_then(Value::as_str).unwrap_or("")
}

/// 1.0 when the reply's `intent` matches the expected intent.
pub fn classification_accuracy(prompt: &Prompt, response: &Value) -> Result<f64, ScoringError> {
    let intent = response
        .get("intent")
        .ok_or_else(|| ScoringError::missing("intent"))?
        .as_str()
        .ok_or_else(|| ScoringError::invalid("intent", "a string"))?;
    Ok(if intent == prompt.expected_intent {
        1.0
    } else {
        0.0
    })
}

/// Whether the number of returned references is consistent with the
/// expected count: none for none, one for one, at least one for several.
pub fn ref_recall_count(prompt: &Prompt, response: &Value) -> Result<f64, ScoringError> {
    let references = response
        .get("references")
        .ok_or_else(|| ScoringError::missing("references"))?
        .as_array()
        .ok_or_else(|| ScoringError::invalid("references", "an array"))?;
    let recalled = match (prompt.expected_ref_count, references.len()) {
        (0, 0) | (1, 1) => true,
        (expected, found) => expected > 1 && found >= 1,
    };
    Ok(if recalled { 1.0 } else { 0.0 })
}

pub fn length_check(_prompt: &Prompt, response: &Value) -> Result<f64, ScoringError> {
    Ok(if message(response).chars().count() > MAX_RESPONSE_CHARS {
        0.0
    } else {
        1.0
    })
}

/// 1.0 when the reply contains more than one sentence.
pub fn sentence_count(_prompt: &Prompt, response: &Value) -> Result<f64, ScoringError> {
    Ok(if message(response).split('.').count() > 1 {
        1.0
    } else {
        0.0
    })
}
