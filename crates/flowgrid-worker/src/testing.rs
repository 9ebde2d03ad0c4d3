//! In-process test environment.
//!
//! [`TestWorkflowEnvironment`] owns a started [`RootScope`] and the workers
//! created from it. Run tests under `#[tokio::test(start_paused = true)]`
//! to get accelerated logical time: workflow sleeps complete as soon as
//! every task is idle, and stopwatches observe the full sleep.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use flowgrid_metrics::config::DEFAULT_REPORTING_INTERVAL;
use flowgrid_metrics::tags::keys;
use flowgrid_metrics::{FlushStats, RootScope, StatsReporter, TagSet};
use tracing::debug;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::worker::{Worker, WorkerOptions};

/// Options for [`TestWorkflowEnvironment::new`].
pub struct TestEnvironmentOptions {
    pub domain: String,
    pub reporter: Arc<dyn StatsReporter>,
    pub report_every: Duration,
    /// Extra root tags, on top of `domain`.
    pub tags: TagSet,
}

impl TestEnvironmentOptions {
    pub fn new(domain: impl Into<String>, reporter: Arc<dyn StatsReporter>) -> Self {
        Self {
            domain: domain.into(),
            reporter,
            report_every: DEFAULT_REPORTING_INTERVAL,
            tags: TagSet::new(),
        }
    }

    pub fn report_every(mut self, interval: Duration) -> Self {
        self.report_every = interval;
        self
    }

    pub fn tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }
}

/// Root scope plus workers, torn down together.
pub struct TestWorkflowEnvironment {
    domain: String,
    root: RootScope,
    workers: Mutex<Vec<Arc<Worker>>>,
}

impl TestWorkflowEnvironment {
    /// Build and start the root scope. Must be called inside a tokio runtime.
    pub fn new(options: TestEnvironmentOptions) -> WorkerResult<Self> {
        let tags = options
            .tags
            .merge(&TagSet::from([(keys::DOMAIN, options.domain.as_str())]));
        let root = RootScope::builder()
            .reporter(options.reporter)
            .report_every(options.report_every)
            .tags(tags)
            .build()?;
        root.start()?;
        debug!(domain = %options.domain, "test environment started");
        Ok(Self {
            domain: options.domain,
            root,
            workers: Mutex::new(Vec::new()),
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn root(&self) -> &RootScope {
        &self.root
    }

    /// Create a worker polling `task_list` in this environment's domain.
    ///
    /// The worker still needs workflows registered and `start()` called.
    pub fn new_worker(&self, task_list: &str, options: WorkerOptions) -> WorkerResult<Arc<Worker>> {
        let worker = Arc::new(Worker::new(
            &self.root,
            WorkerConfig::new(self.domain.clone(), task_list),
            options,
        )?);
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(worker.clone());
        Ok(worker)
    }

    /// Flush accumulated metrics to the reporter now.
    pub fn flush(&self) -> FlushStats {
        self.root.flush()
    }

    /// Execution histories of every worker in this environment.
    pub fn diagnostics(&self) -> String {
        let workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = String::new();
        for worker in workers.iter() {
            out.push_str(&worker.diagnostics());
        }
        out
    }

    /// Shut down every worker, then stop the root with a final flush.
    pub async fn close(self) -> FlushStats {
        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for worker in &workers {
            worker.shutdown();
        }
        self.root.stop().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgrid_interceptor::Payload;
    use flowgrid_metrics::names::WORKFLOW_STARTED_COUNTER;
    use flowgrid_metrics::testing::RecordingReporter;

    #[tokio::test]
    async fn workers_inherit_the_environment_domain() {
        let reporter = Arc::new(RecordingReporter::new());
        let env = TestWorkflowEnvironment::new(
            TestEnvironmentOptions::new("orders", reporter.clone())
                .tags(TagSet::from([("region", "eu")])),
        )
        .unwrap();
        let worker = env.new_worker("main", WorkerOptions::new()).unwrap();
        assert_eq!(worker.metrics_scope().tags().get(keys::DOMAIN), Some("orders"));
        assert_eq!(worker.metrics_scope().tags().get("region"), Some("eu"));
        assert!(env.root().is_running());
        env.close().await;
    }

    #[tokio::test]
    async fn close_performs_final_flush() {
        let reporter = Arc::new(RecordingReporter::new());
        let env = TestWorkflowEnvironment::new(TestEnvironmentOptions::new(
            "orders",
            reporter.clone(),
        ))
        .unwrap();
        let worker = env.new_worker("main", WorkerOptions::new()).unwrap();
        worker
            .register_workflow("Noop", |_cx, _| async { Ok(Payload::Null) })
            .unwrap();
        worker.start().unwrap();
        worker.execute("Noop", vec![]).unwrap().result().await.unwrap();

        assert!(env.diagnostics().contains("Noop-1 (Noop) on main"));
        let stats = env.close().await;
        assert_eq!(
            reporter.counter_calls(WORKFLOW_STARTED_COUNTER).len(),
            1,
            "{stats:?}"
        );
    }
}
