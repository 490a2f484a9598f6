//! `ws-ramp quality` command implementation.

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use std::time::Duration;

use ws_ramp::loadtest::client::WsClient;
use ws_ramp::loadtest::controller::ConcurrencyController;
use ws_ramp::loadtest::quality::QualityRun;
use ws_ramp::loadtest::reference_threshold;
use ws_ramp::loadtest::report::{
    archive_outputs, run_suffix, write_exchange_records, write_quality_summary,
    write_threshold_sweep,
};
use ws_ramp::loadtest::summary::{render_quality_summary, render_threshold_sweep};

use super::{load_prompts, CommonArgs};

#[derive(Debug, Args)]
pub struct QualityArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Concurrent connections (overrides config)
    #[arg(long)]
    pub connections: Option<usize>,

    /// Pause before each send, in milliseconds (overrides config)
    #[arg(long)]
    pub think_time_ms: Option<u64>,

    /// Keep report files but skip the zip archive
    #[arg(long)]
    pub no_archive: bool,

    /// Sweep reference-score thresholds over the replies and report the one
    /// that leaves exactly one reference for the most questions
    #[arg(long)]
    pub thresholds: bool,
}

/// Execute the `quality` command.
pub async fn execute_quality(args: QualityArgs) -> Result<()> {
    let mut config = args.common.resolve_config()?;
    if let Some(connections) = args.connections {
        config.quality.connections = connections;
    }
    if let Some(think) = args.think_time_ms {
        config.quality.think_time_ms = think;
    }
    config.validate().context("Invalid configuration")?;

    let origin = config.origin()?;
    let client = WsClient::new(
        config.target.url.clone(),
        origin.clone(),
        config.settings.timeout_as_duration(),
    )?;
    let prompts = load_prompts(&config)?;
    let metrics = args.common.metrics()?;

    let run = QualityRun::new(
        ConcurrencyController::new(Arc::new(client), metrics),
        Arc::new(config.classifier.clone()),
        config.quality.connections,
        Duration::from_millis(config.quality.think_time_ms),
    )
    .with_target(config.target.url.clone(), origin);
    let outcome = run.run(prompts).await.context("Quality run failed")?;

    args.common.apply_color();
    println!("{}", render_quality_summary(&outcome.report));

    let sweep = args.thresholds.then(|| {
        reference_threshold::sweep(outcome.records.values().map(|record| &record.output.response))
    });
    if let Some(sweep) = &sweep {
        println!("{}", render_threshold_sweep(sweep));
    }

    if !args.common.no_report {
        let dir = &config.output.dir;
        let suffix = run_suffix(&outcome.report.started_at);
        let summary_path = write_quality_summary(&outcome.report, dir)?;
        let records_path = write_exchange_records(&outcome.records, dir, &suffix)?;
        eprintln!("\nSummary written to: {}", summary_path.display());
        eprintln!("Records written to: {}", records_path.display());
        if let Some(sweep) = &sweep {
            let sweep_path = write_threshold_sweep(sweep, dir, &suffix)?;
            eprintln!("Thresholds written to: {}", sweep_path.display());
        }
        if !args.no_archive {
            let archive = archive_outputs(dir, &suffix)?;
            eprintln!("Archive written to: {}", archive.display());
        }
    }
    Ok(())
}
