//! Signals, the per-delivery context, and the terminal handler.

use std::cell::Cell;
use std::sync::Arc;

use flowgrid_metrics::names::CORRUPTED_SIGNALS_COUNTER;
use flowgrid_metrics::Scope;
use tracing::debug;

use crate::error::{SignalError, SignalResult};

/// Opaque signal argument.
pub type Payload = serde_json::Value;

/// A named message for a running workflow execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Signal {
    pub name: String,
    pub args: Vec<Payload>,
}

impl Signal {
    pub fn new(name: impl Into<String>, args: Vec<Payload>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }
}

/// Receiving end of a delivery: the execution's signal inbox.
pub trait SignalTarget: Send + Sync {
    /// Accept a signal that has passed every stage.
    ///
    /// `corrupted` is set when a stage already counted this delivery as
    /// corrupted.
    fn accept(&self, signal: Signal, corrupted: bool) -> SignalResult<()>;
}

/// State of one signal delivery, shared by every stage it passes through.
pub struct SignalContext<'a> {
    workflow_id: &'a str,
    workflow_type: &'a str,
    scope: &'a Scope,
    target: &'a dyn SignalTarget,
    corrupted: Cell<bool>,
}

impl<'a> SignalContext<'a> {
    pub fn new(
        workflow_id: &'a str,
        workflow_type: &'a str,
        scope: &'a Scope,
        target: &'a dyn SignalTarget,
    ) -> Self {
        Self {
            workflow_id,
            workflow_type,
            scope,
            target,
            corrupted: Cell::new(false),
        }
    }

    pub fn workflow_id(&self) -> &str {
        self.workflow_id
    }

    pub fn workflow_type(&self) -> &str {
        self.workflow_type
    }

    /// Metrics scope of the receiving execution.
    pub fn metrics_scope(&self) -> &Scope {
        self.scope
    }

    /// Count this delivery as corrupted.
    ///
    /// The corrupted-signals counter moves at most once per delivery no
    /// matter how many stages mark it. Returns whether this call counted.
    pub fn mark_corrupted(&self) -> bool {
        if self.corrupted.replace(true) {
            return false;
        }
        self.scope.counter(CORRUPTED_SIGNALS_COUNTER).inc(1);
        true
    }

    pub fn is_corrupted(&self) -> bool {
        self.corrupted.get()
    }
}

/// One link of a signal delivery pipeline.
pub trait SignalHandler: Send + Sync {
    fn handle_signal(&self, cx: &SignalContext<'_>, signal: Signal) -> SignalResult<()>;
}

struct FnHandler<F>(F);

impl<F> SignalHandler for FnHandler<F>
where
    F: Fn(&SignalContext<'_>, Signal) -> SignalResult<()> + Send + Sync,
{
    fn handle_signal(&self, cx: &SignalContext<'_>, signal: Signal) -> SignalResult<()> {
        (self.0)(cx, signal)
    }
}

/// Wrap a closure as a handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn SignalHandler>
where
    F: Fn(&SignalContext<'_>, Signal) -> SignalResult<()> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Innermost handler: hands the signal to the execution's inbox.
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchToWorkflow;

impl SignalHandler for DispatchToWorkflow {
    fn handle_signal(&self, cx: &SignalContext<'_>, signal: Signal) -> SignalResult<()> {
        if signal.name.is_empty() {
            return Err(SignalError::EmptyName);
        }
        debug!(
            workflow_id = %cx.workflow_id(),
            signal = %signal.name,
            args = signal.args.len(),
            "dispatching signal"
        );
        cx.target.accept(signal, cx.is_corrupted())
    }
}
