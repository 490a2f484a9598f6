//! `ws-ramp ramp` command implementation.

use anyhow::{Context, Result};
use clap::Args;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use ws_ramp::loadtest::client::WsClient;
use ws_ramp::loadtest::config::LoadTestConfig;
use ws_ramp::loadtest::controller::ConcurrencyController;
use ws_ramp::loadtest::ramp::RampController;
use ws_ramp::loadtest::report::write_run_summary;
use ws_ramp::loadtest::summary::render_ramp_summary;

use super::{load_prompts, CommonArgs};

#[derive(Debug, Args)]
pub struct RampArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Highest connection count to run (overrides config)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Connections added per step (overrides config)
    #[arg(long)]
    pub step_size: Option<usize>,

    /// Pause before each send, in milliseconds (overrides config)
    #[arg(long)]
    pub think_time_ms: Option<u64>,

    /// Prompts drawn per connection; -1 replays every prompt once (overrides config)
    #[arg(long, allow_hyphen_values = true)]
    pub queue_size: Option<i64>,

    /// Pause between steps, in seconds (overrides config)
    #[arg(long)]
    pub step_pause_secs: Option<u64>,
}

fn apply_overrides(config: &mut LoadTestConfig, args: &RampArgs) {
    if let Some(max) = args.max_connections {
        config.settings.max_connections = max;
    }
    if let Some(step) = args.step_size {
        config.settings.step_size = step;
    }
    if let Some(think) = args.think_time_ms {
        config.settings.think_time_ms = think;
    }
    if let Some(queue) = args.queue_size {
        config.settings.queue_size = queue;
    }
    if let Some(pause) = args.step_pause_secs {
        config.settings.step_pause_secs = pause;
    }
}

/// Execute the `ramp` command.
///
/// Resolves config and overrides, runs the ramp until the ceiling or the
/// first Ctrl+C, prints the step table and writes the JSON report.
pub async fn execute_ramp(args: RampArgs) -> Result<()> {
    let mut config = args.common.resolve_config()?;
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    let origin = config.origin()?;
    let client = WsClient::new(
        config.target.url.clone(),
        origin.clone(),
        config.settings.timeout_as_duration(),
    )?;
    let prompts = load_prompts(&config)?;
    let metrics = args.common.metrics()?;

    let controller = ConcurrencyController::new(Arc::new(client), metrics);
    let ramp = RampController::new(
        controller,
        Arc::new(config.classifier.clone()),
        config.ramp_settings(),
    )
    .with_target(config.target.url.clone(), origin);

    let cancel = CancellationToken::new();
    let signal = tokio::spawn(handle_ctrl_c(cancel.clone()));
    let outcome = ramp.run(prompts, cancel).await;
    signal.abort();
    let summary = outcome.context("Ramp failed")?;

    args.common.apply_color();
    println!("{}", render_ramp_summary(&summary));

    if !args.common.no_report {
        let path = write_run_summary(&summary, &config.output.dir)?;
        eprintln!("\nReport written to: {}", path.display());
    }
    Ok(())
}

/// First Ctrl+C lets the step in flight finish; a second one exits.
async fn handle_ctrl_c(cancel: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    eprintln!("\nReceived Ctrl+C, finishing the current step...");
    cancel.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        eprintln!("\nReceived second Ctrl+C, aborting immediately.");
        std::process::exit(1);
    }
}
