//! Load testing engine for JSON-over-WebSocket endpoints.
//!
//! Provides typed TOML configuration, a one-exchange-per-connection
//! WebSocket client, marker-based response classification, pluggable
//! quality metrics, the ramp/quality run drivers and a reference-score
//! threshold sweep.

pub mod classify;
pub mod client;
pub mod config;
pub mod controller;
pub mod dataset;
pub mod error;
pub mod metric;
pub mod prompt;
pub mod quality;
pub mod ramp;
pub mod reference_threshold;
pub mod registry;
pub mod report;
pub mod stats;
pub mod summary;
