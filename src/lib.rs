//! # ws-ramp
//!
//! Load and quality testing for chat endpoints that speak JSON over
//! WebSocket. The [`loadtest`] module holds the engine: a per-exchange
//! client, pluggable metrics, a concurrency controller, step statistics and
//! a ramp controller that steps the connection count upward.

pub mod loadtest;
