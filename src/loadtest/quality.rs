//! Single-pass quality run.
//!
//! Replays every prompt exactly once in spread mode, then reduces the results
//! into per-intent statistics, metric results and one record per question.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::loadtest::classify::Classifier;
use crate::loadtest::client::ExchangeResult;
use crate::loadtest::controller::{ConcurrencyController, LoadShape};
use crate::loadtest::error::LoadTestError;
use crate::loadtest::metric::MetricResult;
use crate::loadtest::prompt::Prompt;
use crate::loadtest::stats::QualityStats;

/// What the endpoint returned for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordOutput {
    pub response: Value,
    pub intent: Option<String>,
    /// Characters in the reply message.
    pub length: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExchangeRecord {
    pub input: Prompt,
    pub output: RecordOutput,
    /// Seconds; 0 when no round trip completed.
    pub latency: f64,
}

impl From<&ExchangeResult> for ExchangeRecord {
    fn from(result: &ExchangeResult) -> Self {
        Self {
            input: result.prompt.clone(),
            output: RecordOutput {
                response: result.response.payload(),
                intent: result.response.intent().map(str::to_owned),
                length: result.response.message().map_or(0, |m| m.chars().count()),
            },
            latency: result.latency_secs(),
        }
    }
}

/// Lowercase hex SHA-256 of the question text.
pub fn question_key(question: &str) -> String {
    Sha256::digest(question.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// One record per distinct question, in result order. A repeated question
/// keeps its last result.
pub fn exchange_records(results: &[ExchangeResult]) -> IndexMap<String, ExchangeRecord> {
    results
        .iter()
        .map(|result| (question_key(&result.prompt.question), ExchangeRecord::from(result)))
        .collect()
}

/// Summary of a quality run, handed to reporting.
#[derive(Debug, Clone, Serialize)]
pub struct QualityReport {
    pub endpoint: String,
    pub origin: String,
    pub started_at: DateTime<Utc>,
    pub connections: usize,
    pub think_time_ms: u64,
    pub stats: QualityStats,
    pub metrics: Vec<MetricResult>,
    pub elapsed_secs: f64,
}

pub struct QualityOutcome {
    pub report: QualityReport,
    pub records: IndexMap<String, ExchangeRecord>,
}

pub struct QualityRun {
    controller: ConcurrencyController,
    classifier: Arc<dyn Classifier>,
    connections: usize,
    think_time: Duration,
    endpoint: String,
    origin: String,
}

impl QualityRun {
    pub fn new(
        controller: ConcurrencyController,
        classifier: Arc<dyn Classifier>,
        connections: usize,
        think_time: Duration,
    ) -> Self {
        Self {
            controller,
            classifier,
            connections,
            think_time,
            endpoint: String::new(),
            origin: String::new(),
        }
    }

    pub fn with_target(mut self, endpoint: impl Into<String>, origin: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self.origin = origin.into();
        self
    }

    pub async fn run(&self, prompts: Arc<[Prompt]>) -> Result<QualityOutcome, LoadTestError> {
        if prompts.is_empty() {
            return Err(LoadTestError::EmptyPromptSource {
                origin: "the prompt source".to_string(),
            });
        }
        if self.connections == 0 {
            return Err(LoadTestError::validation("connections must be greater than 0"));
        }

        tracing::info!(
            endpoint = %self.endpoint,
            prompts = prompts.len(),
            connections = self.connections,
            "starting quality run"
        );
        let started_at = Utc::now();
        let start = Instant::now();
        let results = self
            .controller
            .run(prompts, self.connections, LoadShape::Spread, self.think_time)
            .await;
        let stats = QualityStats::from_results(&results, self.classifier.as_ref());
        tracing::info!(
            exchanges = stats.total,
            successes = stats.successes,
            intents = stats.intents.len(),
            "quality run complete"
        );

        let report = QualityReport {
            endpoint: self.endpoint.clone(),
            origin: self.origin.clone(),
            started_at,
            connections: self.connections,
            think_time_ms: self.think_time.as_millis() as u64,
            stats,
            metrics: self
                .controller
                .metrics()
                .iter()
                .map(|metric| metric.results())
                .collect(),
            elapsed_secs: start.elapsed().as_secs_f64(),
        };
        Ok(QualityOutcome {
            report,
            records: exchange_records(&results),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::classify::MarkerClassifier;
    use crate::loadtest::client::Exchange;
    use crate::loadtest::error::ExchangeError;
    use crate::loadtest::registry;
    use async_trait::async_trait;
    use serde_json::{json, Map};

    /// Answers with the expected intent except for questions ending in '?'.
    struct Bot;

    #[async_trait]
    impl Exchange for Bot {
        async fn exchange(&self, prompt: &Prompt) -> ExchangeResult {
            if prompt.question == "down" {
                return ExchangeResult::failure(
                    prompt.clone(),
                    ExchangeError::Transport {
                        message: "refused".into(),
                    },
                );
            }
            let intent = if prompt.question.ends_with('?') {
                "smalltalk".to_string()
            } else {
                prompt.expected_intent.clone()
            };
            let mut payload = Map::new();
            payload.insert("message".into(), json!("Voici. La réponse."));
            payload.insert("intent".into(), json!(intent));
            payload.insert("references".into(), json!([]));
            ExchangeResult::success(prompt.clone(), payload, Duration::from_millis(40))
        }
    }

    #[test]
    fn test_question_key_is_sha256_hex() {
        assert_eq!(
            question_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_record_from_result() {
        let mut payload = Map::new();
        payload.insert("message".into(), json!("héllo"));
        payload.insert("intent".into(), json!("greeting"));
        let result = ExchangeResult::success(Prompt::new("hi"), payload, Duration::from_millis(250));
        let record = ExchangeRecord::from(&result);
        assert_eq!(record.output.length, 5);
        assert_eq!(record.output.intent.as_deref(), Some("greeting"));
        assert_eq!(record.latency, 0.25);
        assert_eq!(record.input.question, "hi");
    }

    #[test]
    fn test_failure_record_carries_error_payload() {
        let result = ExchangeResult::failure(Prompt::new("hi"), ExchangeError::Timeout { after_ms: 10 });
        let record = ExchangeRecord::from(&result);
        assert_eq!(record.output.response["error"], "timeout");
        assert_eq!(record.output.intent, None);
        assert_eq!(record.latency, 0.0);
    }

    #[tokio::test]
    async fn test_quality_run() {
        let prompts: Arc<[Prompt]> = vec![
            Prompt::new("opening hours").with_intent("faq"),
            Prompt::new("how are you?").with_intent("faq"),
            Prompt::new("pricing").with_intent("sales"),
            Prompt::new("down").with_intent("faq"),
        ]
        .into();
        let controller = ConcurrencyController::new(Arc::new(Bot), registry::default_metrics());
        let run = QualityRun::new(
            controller,
            Arc::new(MarkerClassifier::default()),
            2,
            Duration::ZERO,
        )
        .with_target("ws://localhost/ws", "ws://localhost");
        let outcome = run.run(prompts).await.unwrap();

        let stats = &outcome.report.stats;
        assert_eq!(stats.total, 4);
        assert_eq!(stats.successes, 3);
        assert_eq!(stats.intents["faq"].responses, 1);
        assert_eq!(stats.intents["smalltalk"].responses, 1);
        assert_eq!(stats.intents["sales"].responses, 1);
        assert_eq!(outcome.records.len(), 4);
        assert!(outcome.records.contains_key(&question_key("pricing")));

        let accuracy = outcome
            .report
            .metrics
            .iter()
            .find(|m| m.name == "classification_accuracy")
            .unwrap();
        assert_eq!(accuracy.scores.len(), 4);
        assert_eq!(accuracy.average, 0.5);
        assert_eq!(accuracy.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_quality_run_rejects_empty_prompts() {
        let controller = ConcurrencyController::new(Arc::new(Bot), Vec::new());
        let run = QualityRun::new(controller, Arc::new(MarkerClassifier::default()), 1, Duration::ZERO);
        let empty: Arc<[Prompt]> = Vec::new().into();
        assert!(matches!(
            run.run(empty).await,
            Err(LoadTestError::EmptyPromptSource { .. })
        ));
    }
}
