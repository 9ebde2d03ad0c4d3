//! flowgrid-worker — workflow executions wired to scoped metrics and
//! intercepted signal delivery.
//!
//! # Architecture
//!
//! ```text
//! RootScope
//!   └── Worker {domain, task-list}
//!         ├── signal pipeline (InterceptorFactory, built at start)
//!         └── Execution {…, workflow-type}
//!               ├── WorkflowContext   metrics_scope / sleep / start_child / receive_signal
//!               ├── SignalInbox       bounded, per signal name
//!               └── History           Started, SignalReceived, Completed | Failed
//! ```
//!
//! [`testing::TestWorkflowEnvironment`] bundles a started root scope with
//! workers for in-process tests.

pub mod attribution;
pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod testing;
pub mod worker;

pub use attribution::{execution_scope, task_list_scope, ExecutionType};
pub use config::WorkerConfig;
pub use context::WorkflowContext;
pub use error::{WorkerError, WorkerResult};
pub use execution::{History, HistoryEvent};
pub use testing::{TestEnvironmentOptions, TestWorkflowEnvironment};
pub use worker::{Worker, WorkerOptions, WorkflowFuture, WorkflowHandle};
