//! Stock signal stages.
//!
//! [`SignalInterceptor`] applies pure transforms to the signal name and
//! arguments. [`CorruptSignalInterceptor`] is a fault-injection stage that
//! replaces any non-empty argument list with a fixed sentinel and counts the
//! delivery as corrupted.
//!
//! Both are deterministic: the same input always yields the same output, so
//! replaying an execution's signals reproduces what its handlers saw.

use std::sync::Arc;

use tracing::debug;

use crate::chain::InterceptorFactory;
use crate::error::SignalResult;
use crate::signal::{Payload, Signal, SignalContext, SignalHandler};

type ArgsTransform = Box<dyn Fn(Vec<Payload>) -> Vec<Payload> + Send + Sync>;
type NameTransform = Box<dyn Fn(String) -> String + Send + Sync>;

/// Stage that rewrites signal names and arguments before delegating.
pub struct SignalInterceptor {
    args: ArgsTransform,
    name: NameTransform,
    next: Arc<dyn SignalHandler>,
}

impl SignalInterceptor {
    /// Pass-through stage around `next`.
    pub fn new(next: Arc<dyn SignalHandler>) -> Self {
        Self {
            args: Box::new(|args| args),
            name: Box::new(|name| name),
            next,
        }
    }

    pub fn map_args<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<Payload>) -> Vec<Payload> + Send + Sync + 'static,
    {
        self.args = Box::new(f);
        self
    }

    pub fn map_name<F>(mut self, f: F) -> Self
    where
        F: Fn(String) -> String + Send + Sync + 'static,
    {
        self.name = Box::new(f);
        self
    }
}

impl SignalHandler for SignalInterceptor {
    fn handle_signal(&self, cx: &SignalContext<'_>, signal: Signal) -> SignalResult<()> {
        let signal = Signal {
            name: (self.name)(signal.name),
            args: (self.args)(signal.args),
        };
        self.next.handle_signal(cx, signal)
    }
}

/// Fault-injection stage: poisons every signal that carries arguments.
pub struct CorruptSignalInterceptor {
    sentinel: Payload,
    next: Arc<dyn SignalHandler>,
}

impl CorruptSignalInterceptor {
    pub fn new(sentinel: Payload, next: Arc<dyn SignalHandler>) -> Self {
        Self { sentinel, next }
    }

    /// Factory that installs this stage in front of any handler.
    pub fn factory(sentinel: Payload) -> InterceptorFactory {
        Arc::new(move |next| {
            Arc::new(Self::new(sentinel.clone(), next)) as Arc<dyn SignalHandler>
        })
    }
}

impl SignalHandler for CorruptSignalInterceptor {
    fn handle_signal(&self, cx: &SignalContext<'_>, mut signal: Signal) -> SignalResult<()> {
        if !signal.args.is_empty() {
            debug!(
                workflow_id = %cx.workflow_id(),
                signal = %signal.name,
                "corrupting signal payload"
            );
            signal.args = vec![self.sentinel.clone()];
            cx.mark_corrupted();
        }
        self.next.handle_signal(cx, signal)
    }
}
