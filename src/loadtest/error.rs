//! Error types for the load testing engine.
//!
//! Defines [`LoadTestError`] for setup-time faults that abort a run,
//! [`ExchangeError`] for the per-exchange failures that are converted into
//! data at the client boundary, and [`ScoringError`] for metric faults.

use std::path::Path;

/// Errors that abort a run before (or outside of) load generation.
///
/// Per-exchange failures never surface as a `LoadTestError`; they are
/// recorded as [`ExchangeError`] values inside the exchange results.
#[derive(Debug, thiserror::Error)]
pub enum LoadTestError {
    /// TOML parse failure -- the config file contains invalid TOML syntax
    /// or does not match the expected schema.
    #[error("Failed to parse config TOML: {source}")]
    ConfigParse {
        #[from]
        source: toml::de::Error,
    },

    /// Semantic validation failure -- the config parsed successfully but
    /// contains invalid values (e.g., zero step size).
    #[error("Config validation error: {message}")]
    ConfigValidation { message: String },

    /// File I/O failure -- the config file could not be read from disk.
    #[error("Failed to read config file '{path}': {source}")]
    ConfigIo {
        source: std::io::Error,
        path: String,
    },

    /// The prompt dataset folder or one of its files could not be read.
    #[error("Failed to read dataset '{path}': {source}")]
    DatasetIo {
        source: std::io::Error,
        path: String,
    },

    /// The prompt source yielded no usable prompts.
    #[error("No valid prompts found in {origin}")]
    EmptyPromptSource { origin: String },

    /// The endpoint URL or origin header cannot be turned into a handshake request.
    #[error("Invalid endpoint '{url}': {message}")]
    InvalidEndpoint { url: String, message: String },

    /// A report or archive file could not be written.
    #[error("Failed to write '{path}': {source}")]
    ReportIo {
        source: std::io::Error,
        path: String,
    },

    /// The zip archive of report files could not be assembled.
    #[error("Failed to archive reports: {source}")]
    Archive {
        #[from]
        source: zip::result::ZipError,
    },
}

impl LoadTestError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    pub(crate) fn report_io(source: std::io::Error, path: &Path) -> Self {
        Self::ReportIo {
            source,
            path: path.display().to_string(),
        }
    }
}

/// Failure of a single request/response exchange.
///
/// Each variant is a distinct category that the statistics aggregator
/// counts separately. All of them produce a zero-latency result.
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ExchangeError {
    /// Connection-level failure (DNS, TCP connect, TLS, handshake, reset).
    #[error("Transport error: {message}")]
    Transport { message: String },

    /// No reply arrived within the per-exchange timeout.
    #[error("No reply within {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The reply was not a JSON object. Carries the raw reply text.
    #[error("Malformed reply: {raw}")]
    Protocol { raw: String },
}

impl ExchangeError {
    /// Returns the error category as a static string for metrics classification.
    ///
    /// Categories: `"transport"`, `"timeout"`, `"protocol"`.
    pub fn error_category(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Timeout { .. } => "timeout",
            Self::Protocol { .. } => "protocol",
        }
    }

    /// Classify a tungstenite error raised while connecting, sending or receiving.
    pub fn classify_ws(err: &tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

/// A metric's scoring function could not produce a score.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ScoringError {
    /// A field the scorer requires is absent from the prompt or response.
    #[error("missing field '{field}'")]
    MissingField { field: String },

    /// A field is present but has the wrong shape.
    #[error("field '{field}' is not {expected}")]
    InvalidField {
        field: String,
        expected: &'static str,
    },

    /// The scoring function panicked.
    #[error("scoring function faulted: {message}")]
    Fault { message: String },
}

impl ScoringError {
    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub fn invalid(field: impl Into<String>, expected: &'static str) -> Self {
        Self::InvalidField {
            field: field.into(),
            expected,
        }
    }
}
