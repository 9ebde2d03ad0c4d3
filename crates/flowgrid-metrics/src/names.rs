//! Metric names emitted by the runtime itself.

/// Signals whose payload was replaced or could not be decoded.
pub const CORRUPTED_SIGNALS_COUNTER: &str = "corrupted-signals";

pub const WORKFLOW_STARTED_COUNTER: &str = "workflow-started";
pub const WORKFLOW_COMPLETED_COUNTER: &str = "workflow-completed";
pub const WORKFLOW_FAILED_COUNTER: &str = "workflow-failed";

/// Logical time from execution start to completion.
pub const WORKFLOW_E2E_LATENCY: &str = "workflow-endtoend-latency";
