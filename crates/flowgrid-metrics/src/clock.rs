//! Logical clock used by stopwatches and workflow sleeps.
//!
//! Production code uses [`SystemClock`], which reads tokio's monotonic clock.
//! Under a paused tokio runtime (`#[tokio::test(start_paused = true)]`) that
//! same clock auto-advances whenever every task is idle, giving accelerated
//! time with real ordering. [`ManualClock`] is the fully explicit variant:
//! time only moves when [`ManualClock::advance`] is called.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;

/// Future returned by [`Clock::sleep`].
pub type Sleep<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Source of logical time.
///
/// `sleep` must suspend only the calling task, resume no earlier than
/// `duration` of logical time later, and `now` must observe that advance.
pub trait Clock: Send + Sync {
    /// Logical time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Suspend until at least `duration` of logical time has passed.
    fn sleep(&self, duration: Duration) -> Sleep<'_>;
}

/// Monotonic clock backed by `tokio::time`.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: tokio::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        tokio::time::Instant::now().saturating_duration_since(self.origin)
    }

    fn sleep(&self, duration: Duration) -> Sleep<'_> {
        Box::pin(tokio::time::sleep(duration))
    }
}

struct ManualState {
    now: Duration,
    next_id: u64,
    /// Pending sleepers keyed by (deadline, registration order).
    sleepers: BTreeMap<(Duration, u64), oneshot::Sender<()>>,
}

impl ManualState {
    /// Forget sleepers whose future was dropped before its deadline.
    fn prune_abandoned(&mut self) {
        self.sleepers.retain(|_, waker| !waker.is_closed());
    }
}

/// Clock whose time moves only when advanced explicitly.
pub struct ManualClock {
    state: Mutex<ManualState>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: Duration::ZERO,
                next_id: 0,
                sleepers: BTreeMap::new(),
            }),
        }
    }

    /// Move time forward by `by`, waking sleepers in deadline order.
    ///
    /// Sleepers with equal deadlines wake in the order they went to sleep.
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let target = state.now + by;
        state.prune_abandoned();
        while let Some(entry) = state.sleepers.first_entry() {
            let (deadline, _) = *entry.key();
            if deadline > target {
                break;
            }
            let waker = entry.remove();
            state.now = deadline;
            let _ = waker.send(());
        }
        state.now = target;
    }

    /// Number of sleepers still waiting. Dropped sleeps are not counted.
    pub fn pending_sleepers(&self) -> usize {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.prune_abandoned();
        state.sleepers.len()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).now
    }

    fn sleep(&self, duration: Duration) -> Sleep<'_> {
        if duration.is_zero() {
            return Box::pin(std::future::ready(()));
        }
        let rx = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.prune_abandoned();
            let (tx, rx) = oneshot::channel();
            let id = state.next_id;
            state.next_id += 1;
            let deadline = state.now + duration;
            state.sleepers.insert((deadline, id), tx);
            rx
        };
        Box::pin(async move {
            let _ = rx.await;
        })
    }
}
