//! flowgrid-interceptor — ordered interception of inbound workflow signals.
//!
//! # Architecture
//!
//! ```text
//! Worker startup
//!   └── InterceptorFactory(DispatchToWorkflow) → pipeline (built once, shared)
//!
//! Signal delivery
//!   pipeline.handle_signal(&SignalContext, Signal)
//!     ├── stage 1 … stage N   (may rewrite name/args, emit metrics, reject)
//!     └── DispatchToWorkflow  → SignalTarget (execution inbox)
//! ```
//!
//! A stage that returns an error ends the delivery: nothing after it runs.

pub mod chain;
pub mod error;
pub mod signal;
pub mod stages;

#[cfg(test)]
mod test_support;

pub use chain::{build_pipeline, identity, InterceptorChain, InterceptorFactory};
pub use error::{SignalError, SignalResult};
pub use signal::{
    handler_fn, DispatchToWorkflow, Payload, Signal, SignalContext, SignalHandler, SignalTarget,
};
pub use stages::{CorruptSignalInterceptor, SignalInterceptor};
