//! Terminal summaries for ramp and quality runs.
//!
//! Pure functions: structured data in, formatted [`String`] out. Colors come
//! from the `colored` crate and follow its global override, which the CLI
//! disables for `--no-color` or piped stdout.

use colored::Colorize;

use crate::loadtest::metric::{MetricResult, MetricSummary};
use crate::loadtest::quality::QualityReport;
use crate::loadtest::ramp::RunSummary;
use crate::loadtest::reference_threshold::{ThresholdOutcome, ThresholdSweep};
use crate::loadtest::stats::{ErrorRates, LatencyStats};

/// Width for dotted metric row padding.
const PAD_WIDTH: usize = 32;

/// Render the per-step table and metric averages of a ramp.
///
/// ```text
///   ws-ramp ramp
///   target:      wss://chat.example.com/ws
///   schedule:    10 -> 100 (step 10)
///   queue size:  10
///
///   conns  reqs   rps     mean    p95      p99      errors  general  client  unexpected
///   ───────────────────────────────────────────────────────────────────────────────────
///      10   100   3.2   0.412s  0.801s   0.950s     1.0%     0.0%    0.0%        1.0%
///
///   classification_accuracy.........: 0.920 (8 failed)
/// ```
pub fn render_ramp_summary(summary: &RunSummary) -> String {
    let mut lines = Vec::new();
    lines.push(render_header("ws-ramp ramp", &summary.endpoint));
    lines.push(format!(
        "  schedule:    {} -> {} (step {})",
        summary.settings.step_size, summary.settings.max_connections, summary.settings.step_size
    ));
    let queue = match summary.settings.queue_size {
        -1 => "spread".to_string(),
        n => n.to_string(),
    };
    lines.push(format!("  queue size:  {queue}"));
    lines.push(String::new());

    lines.push(format!(
        "  {:>5} {:>6} {:>6} {:>8} {:>8} {:>8} {:>8} {:>8} {:>8} {:>10}",
        "conns", "reqs", "rps", "mean", "p95", "p99", "errors", "general", "client", "unexpected"
    ));
    lines.push(format!("  {}", "\u{2500}".repeat(86)));
    for step in summary.steps.values() {
        let rates = format_rates(&step.error_rates);
        lines.push(format!(
            "  {:>5} {:>6} {:>6.1} {:>8} {:>8} {:>8} {}",
            step.connections,
            step.exchanges,
            step.throughput_rps,
            secs(step.latency.mean),
            secs(step.latency.p95),
            secs(step.latency.p99),
            rates
        ));
    }

    if !summary.metrics.is_empty() {
        lines.push(String::new());
        for metric in &summary.metrics {
            lines.push(metric_summary_row(metric));
        }
    }

    lines.push(String::new());
    lines.push(format_metric_row(
        "elapsed",
        &format!("{:.1}s", summary.elapsed_secs),
        PAD_WIDTH,
    ));
    if summary.interrupted {
        lines.push(format!(
            "  {}",
            "interrupted: stopped after the step in flight".yellow()
        ));
    }
    lines.join("\n")
}

/// Render the outcome of a quality run.
pub fn render_quality_summary(report: &QualityReport) -> String {
    let stats = &report.stats;
    let mut lines = Vec::new();
    lines.push(render_header("ws-ramp quality", &report.endpoint));
    lines.push(format!("  connections: {}", report.connections));
    lines.push(String::new());

    lines.push(format_metric_row("exchanges", &stats.total.to_string(), PAD_WIDTH));
    let success_str = stats.successes.to_string();
    let success_colored = if stats.successes as usize == stats.total {
        success_str.green().to_string()
    } else {
        success_str.yellow().to_string()
    };
    lines.push(format_metric_row("successes", &success_colored, PAD_WIDTH));
    lines.push(format_metric_row("latency", &latency_value(&stats.latency), PAD_WIDTH));

    if stats.error_counts.total > 0 {
        lines.push(String::new());
        lines.push("  errors:".to_string());
        for (name, count) in [
            ("general", stats.error_counts.general),
            ("client", stats.error_counts.client),
            ("unexpected", stats.error_counts.unexpected),
        ] {
            if count > 0 {
                lines.push(format_metric_row(
                    &format!("    {name}"),
                    &count.to_string().red().to_string(),
                    PAD_WIDTH,
                ));
            }
        }
    }

    if !stats.intents.is_empty() {
        lines.push(String::new());
        lines.push("  intents:".to_string());
        for (intent, intent_stats) in &stats.intents {
            lines.push(format_metric_row(
                &format!("    {intent}"),
                &format!(
                    "{} ({})",
                    intent_stats.responses,
                    latency_value(&intent_stats.latency)
                ),
                PAD_WIDTH,
            ));
        }
    }

    if !report.metrics.is_empty() {
        lines.push(String::new());
        for metric in &report.metrics {
            lines.push(metric_result_row(metric));
        }
    }
    lines.join("\n")
}

/// Render a reference-threshold sweep: one row per rule, then the best rule
/// of each family.
pub fn render_threshold_sweep(sweep: &ThresholdSweep) -> String {
    let mut lines = vec![
        String::new(),
        format!("  {}", "reference thresholds".bold()),
        format!(
            "  replies with references: {}/{}",
            sweep.with_references, sweep.responses
        ),
    ];
    if sweep.with_references == 0 {
        lines.push("  no reply carried references".yellow().to_string());
        return lines.join("\n");
    }

    lines.push(String::new());
    lines.push(format!(
        "  {:<14} {:>9} {:>8} {:>9}",
        "rule", "one ref", "avg", "range"
    ));
    lines.push(format!("  {}", "\u{2500}".repeat(43)));
    for outcome in sweep.percentile.iter().chain(&sweep.std_dev) {
        lines.push(threshold_row(outcome));
    }

    lines.push(String::new());
    for (label, best) in [
        ("best percentile", &sweep.best_percentile),
        ("best spread", &sweep.best_std_dev),
    ] {
        if let Some(best) = best {
            lines.push(format_metric_row(
                label,
                &format!(
                    "{} ({}/{} with one reference)",
                    best.rule.to_string().green(),
                    best.exactly_one,
                    sweep.with_references
                ),
                PAD_WIDTH,
            ));
        }
    }
    lines.join("\n")
}

fn threshold_row(outcome: &ThresholdOutcome) -> String {
    format!(
        "  {:<14} {:>9} {:>8.2} {:>9}",
        outcome.rule.to_string(),
        outcome.exactly_one,
        outcome.avg_refs,
        format!("{}-{}", outcome.min_refs, outcome.max_refs)
    )
}

fn render_header(title: &str, endpoint: &str) -> String {
    format!("\n  {}\n  target:      {endpoint}", title.bold())
}

/// Produces `"  metric_name..................: value_string"`.
fn format_metric_row(name: &str, value: &str, pad_width: usize) -> String {
    format!("  {name:.<pad_width$}: {value}")
}

fn secs(value: f64) -> String {
    format!("{value:.3}s")
}

fn latency_value(latency: &LatencyStats) -> String {
    format!(
        "mean={} p95={} p99={}",
        secs(latency.mean),
        secs(latency.p95),
        secs(latency.p99)
    )
}

fn rate_cell(rate: f64, width: usize) -> String {
    let pct = rate * 100.0;
    let cell = format!("{:>width$}", format!("{pct:.1}%"));
    if pct > 5.0 {
        cell.red().to_string()
    } else if pct > 1.0 {
        cell.yellow().to_string()
    } else {
        cell.green().to_string()
    }
}

fn format_rates(rates: &ErrorRates) -> String {
    format!(
        "{} {} {} {}",
        rate_cell(rates.total, 8),
        rate_cell(rates.general, 8),
        rate_cell(rates.client, 8),
        rate_cell(rates.unexpected, 10)
    )
}

fn score_value(average: f64, failed: usize) -> String {
    let avg = format!("{average:.3}");
    let avg = if average >= 0.9 {
        avg.green().to_string()
    } else if average >= 0.5 {
        avg.yellow().to_string()
    } else {
        avg.red().to_string()
    };
    format!("{avg} ({failed} failed)")
}

fn metric_summary_row(metric: &MetricSummary) -> String {
    format_metric_row(&metric.name, &score_value(metric.average, metric.failed), PAD_WIDTH)
}

fn metric_result_row(metric: &MetricResult) -> String {
    format_metric_row(
        &metric.name,
        &score_value(metric.average, metric.failures.len()),
        PAD_WIDTH,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::classify::MarkerClassifier;
    use crate::loadtest::client::ExchangeResult;
    use crate::loadtest::error::ExchangeError;
    use crate::loadtest::prompt::Prompt;
    use crate::loadtest::ramp::RampSettings;
    use crate::loadtest::reference_threshold::sweep;
    use crate::loadtest::stats::{QualityStats, StepResult};
    use indexmap::IndexMap;
    use serde_json::json;
    use std::time::Duration;

    fn setup_no_color() {
        colored::control::set_override(false);
    }

    fn results() -> Vec<ExchangeResult> {
        let map = json!({"message": "ok", "intent": "faq"})
            .as_object()
            .cloned()
            .unwrap();
        vec![
            ExchangeResult::success(Prompt::new("a"), map, Duration::from_millis(200)),
            ExchangeResult::failure(Prompt::new("b"), ExchangeError::Timeout { after_ms: 100 }),
        ]
    }

    fn summary(interrupted: bool) -> RunSummary {
        let classifier = MarkerClassifier::default();
        let mut steps = IndexMap::new();
        for connections in [10, 20] {
            steps.insert(
                connections,
                StepResult::from_results(connections, 10, &results(), &classifier, Duration::from_secs(2)),
            );
        }
        RunSummary {
            endpoint: "wss://chat.example.com/ws".into(),
            origin: "wss://chat.example.com".into(),
            started_at: chrono::Utc::now(),
            settings: RampSettings {
                max_connections: 20,
                ..RampSettings::default()
            },
            steps,
            metrics: vec![MetricSummary {
                name: "classification_accuracy".into(),
                average: 0.5,
                evaluated: 4,
                failed: 2,
            }],
            elapsed_secs: 64.0,
            interrupted,
        }
    }

    #[test]
    fn test_format_metric_row() {
        let row = format_metric_row("exchanges", "42", 16);
        assert_eq!(row, "  exchanges.......: 42");
    }

    #[test]
    fn test_ramp_summary_rows() {
        setup_no_color();
        let output = render_ramp_summary(&summary(false));
        assert!(output.contains("wss://chat.example.com/ws"));
        assert!(output.contains("10 -> 20 (step 10)"));
        assert!(output.contains("50.0%"));
        assert!(output.contains("errors"));
        // one timeout out of two exchanges: total and unexpected both at 50%
        let step_row = output.lines().find(|l| l.contains("0.200s")).unwrap_or_default();
        assert_eq!(step_row.matches("50.0%").count(), 2);
        assert!(output.contains("classification_accuracy"));
        assert!(output.contains("0.500 (2 failed)"));
        assert!(output.contains("64.0s"));
        assert!(!output.contains("interrupted"));
        let rows = output.lines().filter(|l| l.contains("0.200s")).count();
        assert_eq!(rows, 2);
    }

    #[test]
    fn test_ramp_summary_interrupted() {
        setup_no_color();
        let output = render_ramp_summary(&summary(true));
        assert!(output.contains("interrupted"));
    }

    #[test]
    fn test_threshold_sweep_rows() {
        setup_no_color();
        let replies = vec![
            json!({"references": [{"metadata": {"score": 0.9}}, {"metadata": {"score": 0.2}}]}),
            json!({"message": "none"}),
        ];
        let output = render_threshold_sweep(&sweep(&replies));
        assert!(output.contains("replies with references: 1/2"));
        assert!(output.contains("p80"));
        assert!(output.contains("p99"));
        assert!(output.contains("mean+0.1std"));
        assert!(output.contains("mean+2.0std"));
        assert!(output.contains("p80 (1/1 with one reference)"));
        // 20 percentile rows and 20 spread rows
        let rows = output
            .lines()
            .filter(|l| l.trim_start().starts_with('p') || l.trim_start().starts_with("mean+"))
            .count();
        assert_eq!(rows, 40);
    }

    #[test]
    fn test_threshold_sweep_without_references() {
        setup_no_color();
        let output = render_threshold_sweep(&sweep(&[json!({"message": "none"})]));
        assert!(output.contains("0/1"));
        assert!(output.contains("no reply carried references"));
        assert!(!output.contains("best"));
    }

    #[test]
    fn test_quality_summary() {
        setup_no_color();
        let report = QualityReport {
            endpoint: "ws://localhost/ws".into(),
            origin: "ws://localhost".into(),
            started_at: chrono::Utc::now(),
            connections: 5,
            think_time_ms: 500,
            stats: QualityStats::from_results(&results(), &MarkerClassifier::default()),
            metrics: vec![MetricResult {
                name: "length_check".into(),
                average: 1.0,
                scores: vec![1.0, 1.0],
                failures: Vec::new(),
            }],
            elapsed_secs: 1.0,
        };
        let output = render_quality_summary(&report);
        assert!(output.contains("exchanges"));
        assert!(output.contains("unexpected"));
        assert!(output.contains("faq"));
        assert!(output.contains("unknown"));
        assert!(output.contains("1.000 (0 failed)"));
    }
}
