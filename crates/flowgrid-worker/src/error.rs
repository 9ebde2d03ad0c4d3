//! Error types for workers and executions.

use flowgrid_interceptor::SignalError;
use flowgrid_metrics::MetricsError;
use thiserror::Error;

/// Result type alias for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors that can occur while configuring or driving a worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("workflow type not registered: {0}")]
    UnknownWorkflowType(String),

    #[error("workflow type already registered: {0}")]
    DuplicateWorkflowType(String),

    #[error("workflow execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("worker not started")]
    NotStarted,

    #[error("worker already started")]
    AlreadyStarted,

    #[error("worker is shut down")]
    ShutDown,

    #[error("worker requires a tokio runtime")]
    NoRuntime,

    #[error("workflow {id} failed: {message}")]
    WorkflowFailed { id: String, message: String },

    #[error("workflow {0} was cancelled")]
    Cancelled(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Signal(#[from] SignalError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),
}
