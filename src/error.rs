//! Error types for the order management subsystem

use thiserror::Error;

/// Errors raised by OMS operations.
///
/// Benign races (updates for unknown ids, stale status updates) are not
/// errors; those operations return `None` instead.
#[derive(Debug, Error)]
pub enum OmsError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("no precision registered for symbol {0}")]
    MissingPrecision(String),

    #[error("value {value} cannot be quantized: {reason}")]
    InvalidNumber { value: f64, reason: String },

    #[error("transport error on {host}: {reason}")]
    Transport { host: String, reason: String },

    #[error("connector error: {0}")]
    Connector(String),

    #[error("failed to decode frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] rusqlite::Error),

    #[error("timer service stopped")]
    TimerStopped,

    #[error("invalid module status: {0}")]
    ModuleStatus(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, OmsError>;
