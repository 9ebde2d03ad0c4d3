//! Error types for metrics scopes and the root scope lifecycle.

use thiserror::Error;

/// Result type alias for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Errors surfaced by scope construction, emission, and configuration.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("stopwatch for timer {0:?} already stopped")]
    StopwatchStopped(String),

    #[error("reserved tag {key:?} already set to {existing:?}, cannot retag as {attempted:?}")]
    ReservedTag {
        key: String,
        existing: String,
        attempted: String,
    },

    #[error("tag keys must not be empty")]
    EmptyTagKey,

    #[error("root scope requires a reporter")]
    MissingReporter,

    #[error("invalid reporting interval: {0}")]
    InvalidInterval(String),

    #[error("flush loop already started")]
    AlreadyStarted,

    #[error("flush loop requires a tokio runtime")]
    NoRuntime,

    #[error("config error: {0}")]
    Config(String),
}
