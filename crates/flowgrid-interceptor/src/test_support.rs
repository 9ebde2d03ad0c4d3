//! Shared fixtures for unit tests.

use std::sync::{Arc, Mutex};

use flowgrid_metrics::testing::RecordingReporter;
use flowgrid_metrics::{RootScope, TagSet};

use crate::error::SignalResult;
use crate::signal::{Signal, SignalTarget};

/// Inbox that keeps whatever reaches it.
#[derive(Default)]
pub struct CaptureTarget {
    pub received: Mutex<Vec<(Signal, bool)>>,
}

impl CaptureTarget {
    pub fn signals(&self) -> Vec<Signal> {
        self.received
            .lock()
            .unwrap()
            .iter()
            .map(|(s, _)| s.clone())
            .collect()
    }
}

impl SignalTarget for CaptureTarget {
    fn accept(&self, signal: Signal, corrupted: bool) -> SignalResult<()> {
        self.received.lock().unwrap().push((signal, corrupted));
        Ok(())
    }
}

pub fn root() -> (RootScope, Arc<RecordingReporter>) {
    let reporter = Arc::new(RecordingReporter::new());
    let root = RootScope::builder()
        .reporter(reporter.clone())
        .tags(TagSet::from([("domain", "test-domain"), ("task-list", "tl")]))
        .build()
        .unwrap();
    (root, reporter)
}
