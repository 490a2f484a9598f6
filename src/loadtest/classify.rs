//! Response classification into success and error buckets.
//!
//! The statistics aggregator is agnostic of response content: the caller
//! injects a [`Classifier`]. [`MarkerClassifier`] covers the usual case of
//! an endpoint that reports errors as normal replies carrying a known
//! message text.

use serde::{Deserialize, Serialize};

use crate::loadtest::client::Response;

/// Bucket a response falls into. Every response lands in exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    /// The endpoint replied with its generic "an error occurred" message.
    GeneralError,
    /// The endpoint replied that it is overloaded ("high traffic").
    ClientError,
    /// No well-formed object came back at all.
    UnexpectedError,
}

impl Outcome {
    pub fn is_error(self) -> bool {
        !matches!(self, Self::Success)
    }
}

/// Decides which [`Outcome`] a response belongs to.
pub trait Classifier: Send + Sync {
    fn classify(&self, response: &Response) -> Outcome;
}

impl<F> Classifier for F
where
    F: Fn(&Response) -> Outcome + Send + Sync,
{
    fn classify(&self, response: &Response) -> Outcome {
        self(response)
    }
}

/// Substring-based classifier over the reply's `message` field.
///
/// Failures (transport, timeout, protocol) are always
/// [`Outcome::UnexpectedError`]. General markers are checked before client
/// markers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerClassifier {
    #[serde(default)]
    pub general_markers: Vec<String>,
    #[serde(default)]
    pub client_markers: Vec<String>,
}

impl MarkerClassifier {
    pub fn new(general_markers: Vec<String>, client_markers: Vec<String>) -> Self {
        Self {
            general_markers,
            client_markers,
        }
    }
}

impl Classifier for MarkerClassifier {
    fn classify(&self, response: &Response) -> Outcome {
        if !response.is_success() {
            return Outcome::UnexpectedError;
        }
        let message = response.message().unwrap_or_default();
        if contains_any(message, &self.general_markers) {
            Outcome::GeneralError
        } else if contains_any(message, &self.client_markers) {
            Outcome::ClientError
        } else {
            Outcome::Success
        }
    }
}

fn contains_any(message: &str, markers: &[String]) -> bool {
    markers
        .iter()
        .any(|marker| !marker.is_empty() && message.contains(marker.as_str()))
}
