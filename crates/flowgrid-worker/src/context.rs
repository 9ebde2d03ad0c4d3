//! Workflow-facing API of a running execution.

use std::sync::Arc;
use std::time::Duration;

use flowgrid_interceptor::Payload;
use flowgrid_metrics::names::CORRUPTED_SIGNALS_COUNTER;
use flowgrid_metrics::Scope;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{WorkerError, WorkerResult};
use crate::execution::{Execution, PendingSignal};
use crate::worker::{WorkerShared, WorkflowHandle};

/// Handle passed to workflow code. Cheap to clone.
#[derive(Clone)]
pub struct WorkflowContext {
    execution: Arc<Execution>,
    shared: Arc<WorkerShared>,
}

impl WorkflowContext {
    pub(crate) fn new(execution: Arc<Execution>, shared: Arc<WorkerShared>) -> Self {
        Self { execution, shared }
    }

    pub fn workflow_id(&self) -> &str {
        &self.execution.id
    }

    pub fn workflow_type(&self) -> &str {
        &self.execution.workflow_type
    }

    /// Scope tagged with this execution's domain, task list and type.
    pub fn metrics_scope(&self) -> &Scope {
        &self.execution.scope
    }

    /// Current logical time.
    pub fn now(&self) -> Duration {
        self.execution.scope.clock().now()
    }

    /// Suspend this execution for `duration` of logical time.
    pub async fn sleep(&self, duration: Duration) {
        let clock = self.execution.scope.clock();
        clock.sleep(duration).await;
    }

    /// Start a child execution on the same worker.
    pub fn start_child(&self, workflow_type: &str, args: Vec<Payload>) -> WorkerResult<WorkflowHandle> {
        self.shared.execute(workflow_type, args)
    }

    /// Signal another execution on the same worker.
    pub fn signal_workflow(&self, workflow_id: &str, name: &str, args: Vec<Payload>) -> WorkerResult<()> {
        self.shared.deliver(workflow_id, name, args)
    }

    /// Wait for the next signal named `name` whose payload decodes as `T`.
    ///
    /// Payloads that fail to decode are counted as corrupted and skipped.
    pub async fn receive_signal<T: DeserializeOwned>(&self, name: &str) -> WorkerResult<T> {
        loop {
            let pending = self
                .execution
                .inbox
                .next(name)
                .await
                .ok_or(WorkerError::ShutDown)?;
            if let Some(value) = self.decode(name, pending) {
                return Ok(value);
            }
        }
    }

    /// Like [`receive_signal`](Self::receive_signal), giving up after
    /// `timeout` of logical time with `Ok(None)`.
    pub async fn receive_signal_timeout<T: DeserializeOwned>(
        &self,
        name: &str,
        timeout: Duration,
    ) -> WorkerResult<Option<T>> {
        let clock = self.execution.scope.clock();
        tokio::select! {
            received = self.receive_signal(name) => received.map(Some),
            _ = clock.sleep(timeout) => Ok(None),
        }
    }

    fn decode<T: DeserializeOwned>(&self, name: &str, pending: PendingSignal) -> Option<T> {
        let mut args = pending.args;
        let value = match args.len() {
            0 => Payload::Null,
            1 => args.remove(0),
            _ => Payload::Array(args),
        };
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                if !pending.corrupted {
                    self.execution.scope.counter(CORRUPTED_SIGNALS_COUNTER).inc(1);
                }
                warn!(
                    workflow_id = %self.execution.id,
                    signal = name,
                    error = %e,
                    "dropping signal with undecodable payload"
                );
                None
            }
        }
    }
}
