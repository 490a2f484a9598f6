//! TOML-based load test configuration.
//!
//! # Example TOML
//!
//! ```toml
//! [target]
//! url = "wss://chat.example.com/ws"
//! # origin defaults to scheme://host[:port] of the url
//!
//! [settings]
//! max_connections = 100
//! step_size = 10
//! think_time_ms = 5000
//! queue_size = 10        # -1 replays every prompt once, spread over connections
//! timeout_ms = 30000
//! step_pause_secs = 60
//!
//! [classifier]
//! general_markers = ["erreur est survenue"]
//! client_markers = ["Nous rencontrons un trafic intense"]
//!
//! [dataset]
//! folder = "./datasets"
//! max_samples = 50
//! ```
//!
//! Every section and key is optional in the file; the target URL must be
//! present by the time [`LoadTestConfig::validate`] runs, either from the
//! file or from a CLI override.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::loadtest::classify::MarkerClassifier;
use crate::loadtest::error::LoadTestError;
use crate::loadtest::ramp::RampSettings;

/// Directory searched for [`CONFIG_FILE`] in the working directory and its parents.
pub const CONFIG_DIR: &str = ".ws-ramp";
pub const CONFIG_FILE: &str = "loadtest.toml";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestConfig {
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default = "default_classifier")]
    pub classifier: MarkerClassifier,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Default for LoadTestConfig {
    fn default() -> Self {
        Self {
            target: Target::default(),
            settings: Settings::default(),
            classifier: default_classifier(),
            dataset: DatasetConfig::default(),
            quality: QualityConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// The endpoint under test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
}

/// Ramp and exchange settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_step_size")]
    pub step_size: usize,
    #[serde(default = "default_think_time_ms")]
    pub think_time_ms: u64,
    #[serde(default = "default_queue_size")]
    pub queue_size: i64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_step_pause_secs")]
    pub step_pause_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            step_size: default_step_size(),
            think_time_ms: default_think_time_ms(),
            queue_size: default_queue_size(),
            timeout_ms: default_timeout_ms(),
            step_pause_secs: default_step_pause_secs(),
        }
    }
}

fn default_max_connections() -> usize {
    100
}

fn default_step_size() -> usize {
    10
}

fn default_think_time_ms() -> u64 {
    5000
}

fn default_queue_size() -> i64 {
    10
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_step_pause_secs() -> u64 {
    60
}

fn default_classifier() -> MarkerClassifier {
    MarkerClassifier::new(
        vec!["erreur est survenue".to_string()],
        vec!["Nous rencontrons un trafic intense".to_string()],
    )
}

/// Where prompts are read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    #[serde(default = "default_dataset_folder")]
    pub folder: PathBuf,
    /// Lines sampled per file; all lines when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_samples: Option<usize>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            folder: default_dataset_folder(),
            max_samples: None,
        }
    }
}

fn default_dataset_folder() -> PathBuf {
    PathBuf::from("./datasets")
}

/// Settings for the single-pass quality run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    #[serde(default = "default_quality_connections")]
    pub connections: usize,
    #[serde(default = "default_quality_think_time_ms")]
    pub think_time_ms: u64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            connections: default_quality_connections(),
            think_time_ms: default_quality_think_time_ms(),
        }
    }
}

fn default_quality_connections() -> usize {
    5
}

fn default_quality_think_time_ms() -> u64 {
    500
}

/// Where reports and archives are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

impl LoadTestConfig {
    /// Parse a TOML string into a validated [`LoadTestConfig`].
    pub fn from_toml(content: &str) -> Result<Self, LoadTestError> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating, for callers that apply overrides first.
    pub fn parse(content: &str) -> Result<Self, LoadTestError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a config file without validating it.
    pub fn read(path: &Path) -> Result<Self, LoadTestError> {
        let content = std::fs::read_to_string(path).map_err(|source| LoadTestError::ConfigIo {
            source,
            path: path.display().to_string(),
        })?;
        Self::parse(&content)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, LoadTestError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that the config is semantically correct.
    ///
    /// Checks:
    /// - `target.url` parses and uses `ws` or `wss`
    /// - an explicit origin is not blank
    /// - ramp settings are consistent (see [`RampSettings::validate`])
    /// - `timeout_ms` and `quality.connections` are positive
    pub fn validate(&self) -> Result<(), LoadTestError> {
        parse_ws_url(&self.target.url)?;
        if let Some(origin) = &self.target.origin {
            if origin.trim().is_empty() {
                return Err(LoadTestError::validation("target.origin must not be blank"));
            }
        }
        self.ramp_settings().validate()?;
        if self.settings.timeout_ms == 0 {
            return Err(LoadTestError::validation("timeout_ms must be greater than 0"));
        }
        if self.quality.connections == 0 {
            return Err(LoadTestError::validation(
                "quality.connections must be greater than 0",
            ));
        }
        Ok(())
    }

    /// The explicit origin, or `scheme://host[:port]` of the target url.
    pub fn origin(&self) -> Result<String, LoadTestError> {
        match &self.target.origin {
            Some(origin) => Ok(origin.clone()),
            None => default_origin(&self.target.url),
        }
    }

    pub fn ramp_settings(&self) -> RampSettings {
        RampSettings {
            max_connections: self.settings.max_connections,
            step_size: self.settings.step_size,
            queue_size: self.settings.queue_size,
            think_time_ms: self.settings.think_time_ms,
            step_pause_secs: self.settings.step_pause_secs,
        }
    }
}

impl Settings {
    pub fn timeout_as_duration(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl QualityConfig {
    pub fn think_time(&self) -> Duration {
        Duration::from_millis(self.think_time_ms)
    }
}

fn parse_ws_url(raw: &str) -> Result<Url, LoadTestError> {
    if raw.trim().is_empty() {
        return Err(LoadTestError::validation(
            "target.url is required (set it in [target] or pass --url)",
        ));
    }
    let url = Url::parse(raw).map_err(|err| LoadTestError::InvalidEndpoint {
        url: raw.to_string(),
        message: err.to_string(),
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(LoadTestError::InvalidEndpoint {
            url: raw.to_string(),
            message: format!("scheme must be ws or wss, got '{other}'"),
        }),
    }
}

/// `scheme://host[:port]` of `url`, the origin sent when none is configured.
pub fn default_origin(url: &str) -> Result<String, LoadTestError> {
    let parsed = parse_ws_url(url)?;
    let host = parsed.host_str().ok_or_else(|| LoadTestError::InvalidEndpoint {
        url: url.to_string(),
        message: "url has no host".to_string(),
    })?;
    Ok(match parsed.port() {
        Some(port) => format!("{}://{host}:{port}", parsed.scheme()),
        None => format!("{}://{host}", parsed.scheme()),
    })
}

/// Find `.ws-ramp/loadtest.toml` in `start` or the nearest parent holding one.
pub fn discover_config(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_DIR).join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Starter config written by `ws-ramp init`.
pub fn starter_config(url: Option<&str>) -> String {
    let url = url.unwrap_or("wss://localhost:8080/ws");
    format!(
        r#"# ws-ramp configuration
# Put prompt files (*.jsonl, one {{"Question": ..., "Intent": ..., "RefCount": ...}} per line)
# into the dataset folder, then run `ws-ramp ramp` or `ws-ramp quality`.

[target]
url = "{url}"
# origin = "https://localhost:8080"

[settings]
max_connections = 100
step_size = 10
think_time_ms = 5000
# -1 replays every prompt exactly once, spread over the connections
queue_size = 10
timeout_ms = 30000
step_pause_secs = 60

[classifier]
general_markers = ["erreur est survenue"]
client_markers = ["Nous rencontrons un trafic intense"]

[dataset]
folder = "./datasets"
# max_samples = 50

[quality]
connections = 5
think_time_ms = 500

[output]
dir = "output"
"#
    )
}
