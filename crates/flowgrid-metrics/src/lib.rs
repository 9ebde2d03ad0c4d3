//! flowgrid-metrics — execution-scoped metrics for FlowGrid workers.
//!
//! Counters and timers are emitted into tagged scopes, accumulated in
//! memory, and handed to a pluggable [`StatsReporter`] on a fixed interval.
//!
//! # Architecture
//!
//! ```text
//! RootScope (reporter, clock, flush loop)
//!   └── Scope {domain}
//!         └── Scope {domain, task-list}
//!               └── Scope {domain, task-list, workflow-type}
//!                     ├── counter(name).inc(n)      ← atomic add, no I/O
//!                     └── timer(name).start().stop() ← one sample per stop
//!
//! flush tick → every live scope → report_counter / report_timer
//! ```
//!
//! Tags merge down the tree with the child winning on key collisions. The
//! merged set is computed once when a scope is created.

pub mod clock;
pub mod config;
pub mod error;
pub mod names;
pub mod reporter;
pub mod root;
pub mod scope;
pub mod tags;
pub mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MetricsConfig;
pub use error::{MetricsError, MetricsResult};
pub use reporter::{StatsReporter, TracingReporter};
pub use root::{RootScope, RootScopeBuilder};
pub use scope::{Counter, FlushStats, Scope, Stopwatch, Timer};
pub use tags::TagSet;
