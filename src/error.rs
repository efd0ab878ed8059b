//! Error types shared across the forecasting pipeline
//!
//! Only submission-time overload and malformed queries reach the immediate
//! caller. Executor failures are absorbed by the scheduler and retried on the
//! next relevant update; configuration errors are fatal at startup.

use thiserror::Error;

/// Failure to hand an update to the bounded inbound queues
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// Queue stayed full for the whole timeout. Retryable.
    #[error("system is overloaded: model update-pipeline is full")]
    Overloaded,

    /// The inbound consumer has stopped.
    #[error("update pipeline is closed")]
    Closed,
}

impl SubmitError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SubmitError::Overloaded)
    }
}

/// Errors returned by the outbound query surface
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("the given timestamps are invalid: from is after to")]
    IllegalRange,

    #[error("could not get power for some point in time")]
    NoData,
}

/// External model executor failures
///
/// Never fatal: the scheduler logs these and leaves the affected slots pending.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("could not start model process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("model process exited with {status}: {output}")]
    Process { status: String, output: String },

    #[error("model output is malformed: {0}")]
    MalformedOutput(String),

    #[error("model returned {actual} predictions, expected {expected}")]
    ShapeMismatch { expected: usize, actual: usize },
}

/// Invalid static configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid configuration value for {key}: expected {expected}, got '{actual}'")]
    InvalidValue {
        key: String,
        expected: String,
        actual: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, expected: &str, actual: impl ToString) -> Self {
        ConfigError::InvalidValue {
            key: key.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}
