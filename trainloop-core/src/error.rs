//! Error types for the trainloop-core crate.

use thiserror::Error;

/// Top-level error type for stream, tracker and checkpoint operations.
///
/// Epoch boundaries and early-stop decisions are not errors; they are returned
/// as [`Advance::EndOfEpoch`](crate::stream::Advance) and
/// [`Decision::Stop`](crate::tracker::Decision) values.
#[derive(Debug, Error)]
pub enum TrainLoopError {
    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),

    #[error("Data source failed to start an epoch: {0}")]
    ExhaustedSourceMisuse(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid metric: {0}")]
    InvalidMetric(String),

    #[error("Callback error: {0:#}")]
    Callback(anyhow::Error),

    #[error("Config loading error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl TrainLoopError {
    pub fn invalid_checkpoint(msg: impl Into<String>) -> Self {
        Self::InvalidCheckpoint(msg.into())
    }

    pub fn source_failure(msg: impl Into<String>) -> Self {
        Self::ExhaustedSourceMisuse(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn invalid_metric(msg: impl Into<String>) -> Self {
        Self::InvalidMetric(msg.into())
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TrainLoopError>;
