//! 错误类型定义

use thiserror::Error;

/// scan-relay 库边界错误
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to parse scan result: {0}")]
    Parse(#[source] serde_json::Error),

    #[error("Scan history lookup failed: {0}")]
    History(String),

    #[error("Aggregation store failure for {subscriber:?}: {message}")]
    Store { subscriber: String, message: String },

    #[error("Policy evaluation failed: {0}")]
    Policy(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unknown severity level: {0:?}")]
    UnknownSeverity(String),

    #[error("No Tokio runtime available: {0}")]
    Runtime(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    pub fn store(subscriber: &str, message: impl Into<String>) -> Self {
        RelayError::Store {
            subscriber: subscriber.to_string(),
            message: message.into(),
        }
    }
}
