//! CLI subcommands: `ramp`, `quality` and `init`.
//!
//! The shared half of every run lives here: config resolution, CLI
//! overrides, prompt loading and metric selection.

pub mod init;
pub mod quality;
pub mod ramp;

use anyhow::{Context, Result};
use clap::Args;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use ws_ramp::loadtest::config::{discover_config, LoadTestConfig, CONFIG_DIR, CONFIG_FILE};
use ws_ramp::loadtest::dataset::read_prompts;
use ws_ramp::loadtest::error::LoadTestError;
use ws_ramp::loadtest::metric::Metric;
use ws_ramp::loadtest::prompt::Prompt;
use ws_ramp::loadtest::registry;

/// Options shared by `ramp` and `quality`.
#[derive(Debug, Args)]
pub struct CommonArgs {
    /// Path to config file (default: auto-discover .ws-ramp/loadtest.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Target WebSocket URL (overrides config)
    #[arg(long, env = "WS_RAMP_URL")]
    pub url: Option<String>,

    /// Origin header (default: scheme://host[:port] of the url)
    #[arg(long)]
    pub origin: Option<String>,

    /// Per-exchange timeout in milliseconds (overrides config)
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Folder of *.jsonl prompt files (overrides config)
    #[arg(long)]
    pub dataset: Option<PathBuf>,

    /// Lines sampled per dataset file (overrides config)
    #[arg(long)]
    pub max_samples: Option<usize>,

    /// Metric to evaluate; repeat for several (default: all built-ins)
    #[arg(long = "metric", value_name = "NAME")]
    pub metrics: Vec<String>,

    /// Folder for report files (overrides config)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Do not write report files
    #[arg(long)]
    pub no_report: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

impl CommonArgs {
    /// Load the config (explicit path, discovered file, or defaults) and
    /// apply the shared overrides. Not yet validated.
    pub fn resolve_config(&self) -> Result<LoadTestConfig> {
        let mut config = match &self.config {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!(
                        "Config file not found: {}\nUse `ws-ramp init` to create one.",
                        path.display()
                    );
                }
                eprintln!("Loading config from: {}", path.display());
                LoadTestConfig::read(path)?
            },
            None => {
                let cwd = std::env::current_dir()?;
                match discover_config(&cwd) {
                    Some(path) => {
                        eprintln!("Loading config from: {}", path.display());
                        LoadTestConfig::read(&path)?
                    },
                    None => {
                        tracing::debug!(
                            "no {CONFIG_DIR}/{CONFIG_FILE} found, using built-in defaults"
                        );
                        LoadTestConfig::default()
                    },
                }
            },
        };

        if let Some(url) = &self.url {
            config.target.url = url.clone();
        }
        if let Some(origin) = &self.origin {
            config.target.origin = Some(origin.clone());
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.settings.timeout_ms = timeout_ms;
        }
        if let Some(folder) = &self.dataset {
            config.dataset.folder = folder.clone();
        }
        if self.max_samples.is_some() {
            config.dataset.max_samples = self.max_samples;
        }
        if let Some(out) = &self.out {
            config.output.dir = out.clone();
        }
        Ok(config)
    }

    pub fn metrics(&self) -> Result<Vec<Arc<Metric>>> {
        if self.metrics.is_empty() {
            Ok(registry::default_metrics())
        } else {
            Ok(registry::metrics_by_name(&self.metrics)?)
        }
    }

    pub fn apply_color(&self) {
        if self.no_color || !std::io::stdout().is_terminal() {
            colored::control::set_override(false);
        }
    }
}

/// Read the dataset; an empty result is fatal.
pub fn load_prompts(config: &LoadTestConfig) -> Result<Arc<[Prompt]>> {
    let folder = &config.dataset.folder;
    let prompts = read_prompts(folder, config.dataset.max_samples)
        .with_context(|| format!("Failed to read prompts from {}", folder.display()))?;
    if prompts.is_empty() {
        return Err(LoadTestError::EmptyPromptSource {
            origin: folder.display().to_string(),
        }
        .into());
    }
    tracing::info!(prompts = prompts.len(), folder = %folder.display(), "loaded prompts");
    Ok(prompts.into())
}
