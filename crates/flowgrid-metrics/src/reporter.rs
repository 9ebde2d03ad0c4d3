//! Reporter sinks that receive flushed metrics.

use std::time::Duration;

use tracing::info;

use crate::tags::TagSet;

/// Receives accumulated metrics from the flush path.
///
/// Called only from [`RootScope`](crate::RootScope) flushes, never from the
/// emitting call. A failed call is logged and that record is dropped; the
/// next tick is unaffected.
pub trait StatsReporter: Send + Sync {
    /// Report the counter delta accumulated since the previous flush.
    fn report_counter(&self, name: &str, tags: &TagSet, delta: u64) -> anyhow::Result<()>;

    /// Report a single timer sample.
    fn report_timer(&self, name: &str, tags: &TagSet, duration: Duration) -> anyhow::Result<()>;

    /// Called once at the end of every flush.
    fn flush(&self) {}
}

/// Reporter that emits each metric as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl StatsReporter for TracingReporter {
    fn report_counter(&self, name: &str, tags: &TagSet, delta: u64) -> anyhow::Result<()> {
        info!(target: "flowgrid::metrics", metric = %name, tags = %tags, delta, "counter");
        Ok(())
    }

    fn report_timer(&self, name: &str, tags: &TagSet, duration: Duration) -> anyhow::Result<()> {
        info!(
            target: "flowgrid::metrics",
            metric = %name,
            tags = %tags,
            duration_ms = duration.as_secs_f64() * 1000.0,
            "timer"
        );
        Ok(())
    }
}
