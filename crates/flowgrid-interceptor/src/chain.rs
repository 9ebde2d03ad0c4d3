//! Interceptor chains: ordered composition of signal stages.
//!
//! A stage constructor takes the handler it wraps (`next`) and returns a new
//! handler. Composing stages `[a, b]` around a terminal yields `a(b(terminal))`:
//!
//! ```text
//! deliver ─► a.before ─► b.before ─► terminal ─► b.after ─► a.after
//! ```
//!
//! Chains are compiled once at worker startup and shared read-only by every
//! execution on that worker.

use std::sync::Arc;

use crate::signal::{DispatchToWorkflow, SignalHandler};

/// Builds a handler around `next`.
pub type InterceptorFactory =
    Arc<dyn Fn(Arc<dyn SignalHandler>) -> Arc<dyn SignalHandler> + Send + Sync>;

/// Factory that adds no stages.
pub fn identity() -> InterceptorFactory {
    Arc::new(|next: Arc<dyn SignalHandler>| next)
}

/// Ordered list of stage constructors, outermost first.
#[derive(Default, Clone)]
pub struct InterceptorChain {
    stages: Vec<InterceptorFactory>,
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage. It runs after every stage added before it.
    pub fn stage<F>(mut self, constructor: F) -> Self
    where
        F: Fn(Arc<dyn SignalHandler>) -> Arc<dyn SignalHandler> + Send + Sync + 'static,
    {
        self.stages.push(Arc::new(constructor));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Compose every stage around `terminal`.
    pub fn wrap(&self, terminal: Arc<dyn SignalHandler>) -> Arc<dyn SignalHandler> {
        self.stages
            .iter()
            .rev()
            .fold(terminal, |next, constructor| constructor(next))
    }

    pub fn into_factory(self) -> InterceptorFactory {
        Arc::new(move |terminal| self.wrap(terminal))
    }
}

/// Build the signal delivery pipeline for a worker.
pub fn build_pipeline(factory: &InterceptorFactory) -> Arc<dyn SignalHandler> {
    factory(Arc::new(DispatchToWorkflow))
}
