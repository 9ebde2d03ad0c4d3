//! Error types for signal delivery.

use thiserror::Error;

/// Result type alias for signal delivery.
pub type SignalResult<T> = Result<T, SignalError>;

/// Errors that abort a signal delivery.
#[derive(Debug, Error)]
pub enum SignalError {
    /// A stage refused the signal; later stages and the handler never ran.
    #[error("signal {signal:?} rejected by {stage}: {reason}")]
    Rejected {
        stage: String,
        signal: String,
        reason: String,
    },

    /// The target execution has no inbox to accept signals any more.
    #[error("workflow {0} is closed to signals")]
    Closed(String),

    #[error("signal name must not be empty")]
    EmptyName,
}
