//! ws-ramp: concurrency-ramping load and quality tester for chat endpoints
//! speaking JSON over WebSocket.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

/// Load and quality testing for JSON-over-WebSocket chat endpoints
#[derive(Parser)]
#[command(name = "ws-ramp")]
#[command(about = "Ramp concurrency against a WebSocket chat endpoint", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Step the connection count upward and record latency and error rates per step
    ///
    /// Reads prompts from the dataset folder, runs one step per connection
    /// count from step_size up to max_connections, prints a per-step table
    /// and writes a JSON report to the output folder.
    Ramp(commands::ramp::RampArgs),

    /// Replay every prompt once and score the replies with quality metrics
    ///
    /// Writes a quality summary, per-question records and a zip archive of
    /// both to the output folder. `--thresholds` also sweeps reference-score
    /// cut-offs over the replies.
    Quality(commands::quality::QualityArgs),

    /// Generate a starter config file at .ws-ramp/loadtest.toml
    Init {
        /// Target WebSocket URL to put in the config
        #[arg(long)]
        url: Option<String>,

        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Ramp(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::ramp::execute_ramp(args))
        },
        Commands::Quality(args) => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::quality::execute_quality(args))
        },
        Commands::Init { url, force } => commands::init::execute_init(url, force),
    }
}
