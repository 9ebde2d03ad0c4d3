//! Per-execution state: signal inbox and event history.
//!
//! [`SignalInbox`] is a bounded queue per signal name. Signals that arrive
//! before the workflow asks for them are buffered; when a name's queue is
//! full the oldest pending signal is dropped.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use flowgrid_interceptor::{Payload, Signal, SignalError, SignalResult, SignalTarget};
use flowgrid_metrics::{Clock, Scope};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// A signal waiting to be received by workflow code.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSignal {
    pub args: Vec<Payload>,
    /// Already counted as corrupted by an interceptor.
    pub corrupted: bool,
}

#[derive(Default)]
struct InboxState {
    closed: bool,
    pending: HashMap<String, VecDeque<PendingSignal>>,
}

/// Bounded per-name signal queues for one execution.
pub struct SignalInbox {
    capacity: usize,
    state: Mutex<InboxState>,
    notify: Notify,
}

impl SignalInbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(InboxState::default()),
            notify: Notify::new(),
        }
    }

    /// Enqueue a signal. Fails once the inbox is closed.
    pub fn push(&self, name: String, pending: PendingSignal) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            return false;
        }
        let queue = state.pending.entry(name).or_default();
        if queue.len() >= self.capacity {
            let dropped = queue.pop_front();
            warn!(
                dropped_args = dropped.map(|d| d.args.len()).unwrap_or(0),
                capacity = self.capacity,
                "signal inbox full, dropped oldest signal"
            );
        }
        queue.push_back(pending);
        drop(state);
        self.notify.notify_waiters();
        true
    }

    /// Take the oldest pending signal named `name`, if any.
    pub fn try_take(&self, name: &str) -> Option<PendingSignal> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.pending.get_mut(name)?.pop_front()
    }

    /// Wait for the next signal named `name`. Returns `None` once the inbox
    /// is closed.
    pub async fn next(&self, name: &str) -> Option<PendingSignal> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
                if state.closed {
                    return None;
                }
                if let Some(pending) = state.pending.get_mut(name).and_then(VecDeque::pop_front) {
                    return Some(pending);
                }
            }
            notified.await;
        }
    }

    /// Number of buffered signals across all names.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .values()
            .map(VecDeque::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Refuse further signals and discard anything still buffered.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.closed = true;
        state.pending.clear();
        drop(state);
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }
}

/// One entry in an execution's history.
#[derive(Debug, Clone, PartialEq)]
pub enum HistoryEvent {
    Started {
        args: Vec<Payload>,
    },
    SignalReceived {
        name: String,
        args: Vec<Payload>,
        corrupted: bool,
    },
    Completed {
        result: Payload,
    },
    Failed {
        error: String,
    },
}

impl fmt::Display for HistoryEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryEvent::Started { args } => write!(f, "Started args={}", render(args)),
            HistoryEvent::SignalReceived {
                name,
                args,
                corrupted,
            } => {
                write!(f, "SignalReceived name={name} args={}", render(args))?;
                if *corrupted {
                    f.write_str(" corrupted")?;
                }
                Ok(())
            }
            HistoryEvent::Completed { result } => write!(f, "Completed result={result}"),
            HistoryEvent::Failed { error } => write!(f, "Failed error={error}"),
        }
    }
}

fn render(args: &[Payload]) -> String {
    serde_json::to_string(args).unwrap_or_else(|_| "<unrenderable>".to_string())
}

/// Time-stamped event log of one execution.
#[derive(Default)]
pub struct History {
    events: Mutex<Vec<(Duration, HistoryEvent)>>,
}

impl History {
    pub fn record(&self, at: Duration, event: HistoryEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((at, event));
    }

    pub fn events(&self) -> Vec<HistoryEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, e)| e.clone())
            .collect()
    }

    /// Signals in delivery order, as the workflow's handlers saw them.
    pub fn signals(&self) -> Vec<Signal> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                HistoryEvent::SignalReceived { name, args, .. } => Some(Signal { name, args }),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn render_into(&self, out: &mut String) {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        for (at, event) in events.iter() {
            out.push_str(&format!("  {:>8}ms  {event}\n", at.as_millis()));
        }
    }
}

/// A running (or finished) workflow execution.
pub struct Execution {
    pub(crate) id: String,
    pub(crate) workflow_type: String,
    pub(crate) scope: Scope,
    pub(crate) inbox: SignalInbox,
    pub(crate) history: History,
    clock: std::sync::Arc<dyn Clock>,
}

impl Execution {
    pub(crate) fn new(
        id: String,
        workflow_type: String,
        scope: Scope,
        signal_buffer: usize,
    ) -> Self {
        let clock = scope.clock();
        Self {
            id,
            workflow_type,
            scope,
            inbox: SignalInbox::new(signal_buffer),
            history: History::default(),
            clock,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub(crate) fn record(&self, event: HistoryEvent) {
        self.history.record(self.clock.now(), event);
    }
}

impl SignalTarget for Execution {
    fn accept(&self, signal: Signal, corrupted: bool) -> SignalResult<()> {
        let event = HistoryEvent::SignalReceived {
            name: signal.name.clone(),
            args: signal.args.clone(),
            corrupted,
        };
        let accepted = self.inbox.push(
            signal.name,
            PendingSignal {
                args: signal.args,
                corrupted,
            },
        );
        if !accepted {
            return Err(SignalError::Closed(self.id.clone()));
        }
        self.record(event);
        debug!(workflow_id = %self.id, "signal queued");
        Ok(())
    }
}
