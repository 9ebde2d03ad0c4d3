//! Root scope — owns the reporter, the clock, and the flush loop.
//!
//! # Lifecycle
//!
//! ```text
//! RootScope::builder().reporter(r).report_every(d).build()?
//!   ├── scope().tagged(..) → child scopes for domains / task lists / executions
//!   ├── start()            → spawns the periodic flush loop
//!   ├── flush()            → synchronous flush, for tests and shutdown hooks
//!   └── stop().await       → stops the loop after one final flush
//! ```

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::clock::{Clock, SystemClock};
use crate::config::{validate_interval, MetricsConfig, DEFAULT_REPORTING_INTERVAL};
use crate::error::{MetricsError, MetricsResult};
use crate::reporter::StatsReporter;
use crate::scope::{FlushStats, Registry, Scope};
use crate::tags::TagSet;

/// Builder for [`RootScope`].
pub struct RootScopeBuilder {
    reporter: Option<Arc<dyn StatsReporter>>,
    interval: Duration,
    tags: TagSet,
    clock: Option<Arc<dyn Clock>>,
}

impl RootScopeBuilder {
    /// Sink that receives every flush. Required.
    pub fn reporter(mut self, reporter: Arc<dyn StatsReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Flush period of the background loop.
    pub fn report_every(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Base tags of the root scope.
    pub fn tags(mut self, tags: TagSet) -> Self {
        self.tags = tags;
        self
    }

    /// Clock used by stopwatches. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> MetricsResult<RootScope> {
        let reporter = self.reporter.ok_or(MetricsError::MissingReporter)?;
        let interval = validate_interval(self.interval)?;
        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);
        let registry = Registry::new(reporter, clock);
        let scope = registry.root_scope(self.tags);
        Ok(RootScope {
            scope,
            registry,
            interval,
            flush_loop: Mutex::new(None),
        })
    }
}

struct FlushLoop {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Top of a scope tree plus the background loop that flushes it.
pub struct RootScope {
    scope: Scope,
    registry: Arc<Registry>,
    interval: Duration,
    flush_loop: Mutex<Option<FlushLoop>>,
}

impl RootScope {
    pub fn builder() -> RootScopeBuilder {
        RootScopeBuilder {
            reporter: None,
            interval: DEFAULT_REPORTING_INTERVAL,
            tags: TagSet::new(),
            clock: None,
        }
    }

    /// Build a root scope from parsed configuration.
    pub fn from_config(
        config: &MetricsConfig,
        reporter: Arc<dyn StatsReporter>,
    ) -> MetricsResult<Self> {
        Self::builder()
            .reporter(reporter)
            .report_every(config.interval()?)
            .tags(config.tags.clone())
            .build()
    }

    /// The root of the scope tree.
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of scopes currently registered, the root included.
    pub fn live_scopes(&self) -> usize {
        self.registry.live_scopes()
    }

    /// Spawn the flush loop on the current tokio runtime.
    pub fn start(&self) -> MetricsResult<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MetricsError::NoRuntime)?;
        let mut slot = self.flush_loop.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(MetricsError::AlreadyStarted);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let registry = self.registry.clone();
        let interval = self.interval;
        let handle = runtime.spawn(async move {
            run_flush_loop(registry, interval, shutdown_rx).await;
        });
        *slot = Some(FlushLoop {
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.flush_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Flush everything accumulated so far and wait for the reporter calls
    /// to complete.
    ///
    /// Runs the reporter on the calling thread. From async code prefer
    /// letting the loop or [`stop`](Self::stop) flush, which keep reporter
    /// calls off the runtime's worker threads.
    pub fn flush(&self) -> FlushStats {
        self.registry.flush()
    }

    /// Stop the flush loop, performing one final flush.
    ///
    /// Safe to call when the loop was never started or already stopped; the
    /// final flush happens either way.
    pub async fn stop(&self) -> FlushStats {
        let running = self
            .flush_loop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(flush_loop) = running {
            let _ = flush_loop.shutdown_tx.send(true);
            if let Err(e) = flush_loop.handle.await {
                error!(error = %e, "metrics flush loop terminated abnormally");
            }
        }
        flush_off_runtime(self.registry.clone()).await
    }
}

impl Drop for RootScope {
    fn drop(&mut self) {
        let slot = self
            .flush_loop
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(flush_loop) = slot {
            // The loop flushes once more when it sees the signal.
            let _ = flush_loop.shutdown_tx.send(true);
        }
    }
}

/// Run one flush on the blocking pool. Reporter calls may block for as
/// long as they like without stalling tasks on the runtime.
async fn flush_off_runtime(registry: Arc<Registry>) -> FlushStats {
    match tokio::task::spawn_blocking(move || registry.flush()).await {
        Ok(stats) => stats,
        Err(e) => {
            error!(error = %e, "metrics flush task failed");
            FlushStats::default()
        }
    }
}

async fn run_flush_loop(
    registry: Arc<Registry>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_ms = interval.as_millis() as u64,
        "metrics flush loop started"
    );
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                flush_off_runtime(registry.clone()).await;
            }
            _ = shutdown.changed() => {
                debug!("metrics flush loop shutting down");
                flush_off_runtime(registry.clone()).await;
                break;
            }
        }
    }
    info!("metrics flush loop stopped");
}
