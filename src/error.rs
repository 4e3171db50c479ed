//! Error types for feeds, configuration, weather lookups and exports.
//!
//! Malformed telemetry is never an error: the normalizer defaults missing or
//! unparseable fields. These types cover the failures that do reach callers.

use std::time::Duration;

use thiserror::Error;

use crate::data::Parameter;

/// Errors raised by telemetry feed adapters.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The feed has shut down and accepts no new subscriptions.
    #[error("Feed closed: {0}")]
    Closed(String),

    /// The adapter refused to subscribe to a source.
    #[error("Subscription rejected for source {source_id}: {reason}")]
    Rejected { source_id: String, reason: String },
}

/// Errors raised while loading configuration or building a band table.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A threshold band violates its ordering constraints.
    #[error("Invalid threshold band for {parameter}: {reason}")]
    InvalidBand { parameter: Parameter, reason: String },

    /// A duration string could not be parsed.
    #[error("Invalid duration {value:?}: {reason}")]
    Duration { value: String, reason: String },

    /// The layered configuration could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Errors from the weather collaborator.
///
/// These are recoverable: the tracker keeps the last known snapshot and
/// flags the error for display.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WeatherError {
    /// The lookup did not finish within the configured bound.
    #[error("Weather lookup timed out after {0:?}")]
    Timeout(Duration),

    /// The service answered with a non-success status.
    #[error("Weather service returned status {0}")]
    Status(u16),

    /// The request could not be made at all.
    #[error("Weather request failed: {0}")]
    Request(String),

    /// The response body was not understood.
    #[error("Failed to parse weather response: {0}")]
    Parse(String),

    /// No async runtime was available to run the lookup.
    #[error("No async runtime available for weather lookup")]
    NoRuntime,
}

/// Errors from producing an export document.
#[derive(Debug, Error)]
pub enum ExportError {
    /// There is no sample to export yet.
    #[error("No telemetry sample available to export")]
    NoSample,

    #[error("Failed to encode export: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),
}
