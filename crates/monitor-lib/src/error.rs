//! Error types for the anomaly engine

use std::time::Duration;

use thiserror::Error;

/// Failure of a metrics source query
///
/// Always treated as transient by the scanner: the affected detector
/// contributes no finding for the current cycle.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics source unavailable: {0}")]
    Unavailable(String),

    #[error("metrics query failed: {0}")]
    Query(String),

    #[error("metrics query timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error reading metrics: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of an alert lifecycle operation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AlertError {
    #[error("alert {0} not found")]
    NotFound(String),

    #[error("alert {0} is already resolved")]
    AlreadyResolved(String),

    #[error("actor identity must not be blank")]
    InvalidActor,
}

/// Rejected threshold update
#[derive(Debug, Error)]
pub enum ThresholdError {
    #[error("threshold patch must be a JSON object")]
    NotAnObject,

    #[error("invalid threshold patch: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("threshold out of range: {0}")]
    OutOfRange(String),
}

/// Failure delivering an alert downstream
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook rejected alert with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
}
