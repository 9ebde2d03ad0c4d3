//! In-memory reporter for tests.
//!
//! [`RecordingReporter`] keeps a log of every call it receives so tests can
//! assert on call counts and arguments after a flush.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::reporter::StatsReporter;
use crate::tags::TagSet;

/// One call received by a [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Counter {
        name: String,
        tags: TagSet,
        delta: u64,
    },
    Timer {
        name: String,
        tags: TagSet,
        duration: Duration,
    },
}

/// Reporter that records calls instead of forwarding them.
#[derive(Debug, Default)]
pub struct RecordingReporter {
    calls: Mutex<Vec<RecordedCall>>,
    flushes: AtomicUsize,
    /// Number of upcoming calls to reject.
    fail_remaining: AtomicUsize,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `n` report calls with an error.
    pub fn fail_next(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Every accepted call, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// `(tags, delta)` for each accepted counter report named `name`.
    pub fn counter_calls(&self, name: &str) -> Vec<(TagSet, u64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Counter {
                    name: n,
                    tags,
                    delta,
                } if n == name => Some((tags, delta)),
                _ => None,
            })
            .collect()
    }

    /// `(tags, duration)` for each accepted timer report named `name`.
    pub fn timer_calls(&self, name: &str) -> Vec<(TagSet, Duration)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Timer {
                    name: n,
                    tags,
                    duration,
                } if n == name => Some((tags, duration)),
                _ => None,
            })
            .collect()
    }

    /// Number of completed flush passes.
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn record(&self, call: RecordedCall) -> anyhow::Result<()> {
        let rejected = self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            anyhow::bail!("recording reporter configured to fail");
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        Ok(())
    }
}

impl StatsReporter for RecordingReporter {
    fn report_counter(&self, name: &str, tags: &TagSet, delta: u64) -> anyhow::Result<()> {
        self.record(RecordedCall::Counter {
            name: name.to_string(),
            tags: tags.clone(),
            delta,
        })
    }

    fn report_timer(&self, name: &str, tags: &TagSet, duration: Duration) -> anyhow::Result<()> {
        self.record(RecordedCall::Timer {
            name: name.to_string(),
            tags: tags.clone(),
            duration,
        })
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }
}
