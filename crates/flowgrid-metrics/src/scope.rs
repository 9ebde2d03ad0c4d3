//! Metrics scopes — tagged accumulators arranged as a tree.
//!
//! Every [`Scope`] carries its effective tag set (ancestor tags merged with
//! its own, computed once at creation) and private accumulators. Emission
//! only touches those accumulators: counters are atomics, timer samples sit
//! behind a per-timer mutex held for a push. The flush path swaps them out
//! and talks to the reporter without holding any emission lock.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::Clock;
use crate::error::{MetricsError, MetricsResult};
use crate::reporter::StatsReporter;
use crate::tags::TagSet;

/// Accumulators and tags owned by one scope.
pub(crate) struct ScopeCore {
    tags: TagSet,
    parent: Option<Weak<ScopeCore>>,
    counters: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    timers: RwLock<BTreeMap<String, Arc<TimerCell>>>,
}

#[derive(Default)]
struct TimerCell {
    samples: Mutex<Vec<Duration>>,
}

impl ScopeCore {
    fn new(tags: TagSet, parent: Option<Weak<ScopeCore>>) -> Self {
        Self {
            tags,
            parent,
            counters: RwLock::new(BTreeMap::new()),
            timers: RwLock::new(BTreeMap::new()),
        }
    }

    fn counter_cell(&self, name: &str) -> Arc<AtomicU64> {
        {
            let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cell) = counters.get(name) {
                return cell.clone();
            }
        }
        let mut counters = self.counters.write().unwrap_or_else(PoisonError::into_inner);
        counters.entry(name.to_string()).or_default().clone()
    }

    fn timer_cell(&self, name: &str) -> Arc<TimerCell> {
        {
            let timers = self.timers.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cell) = timers.get(name) {
                return cell.clone();
            }
        }
        let mut timers = self.timers.write().unwrap_or_else(PoisonError::into_inner);
        timers.entry(name.to_string()).or_default().clone()
    }

    /// Swap out everything accumulated since the last drain.
    fn drain(&self, out: &mut Vec<FlushRecord>) {
        let counters: Vec<(String, Arc<AtomicU64>)> = self
            .counters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, cell)| (name.clone(), cell.clone()))
            .collect();
        for (name, cell) in counters {
            let delta = cell.swap(0, Ordering::AcqRel);
            if delta > 0 {
                out.push(FlushRecord::Counter {
                    name,
                    tags: self.tags.clone(),
                    delta,
                });
            }
        }

        let timers: Vec<(String, Arc<TimerCell>)> = self
            .timers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, cell)| (name.clone(), cell.clone()))
            .collect();
        for (name, cell) in timers {
            let samples = std::mem::take(
                &mut *cell.samples.lock().unwrap_or_else(PoisonError::into_inner),
            );
            for duration in samples {
                out.push(FlushRecord::Timer {
                    name: name.clone(),
                    tags: self.tags.clone(),
                    duration,
                });
            }
        }
    }
}

/// One metric materialized for a single reporter call.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum FlushRecord {
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

/// Outcome of one flush pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushStats {
    /// Counter records delivered.
    pub counters: usize,
    /// Timer samples delivered.
    pub timers: usize,
    /// Records the reporter rejected (dropped).
    pub failures: usize,
    /// Scopes released after their last metrics were flushed.
    pub pruned: usize,
}

#[derive(Default)]
struct ScopeTable {
    next_seq: u64,
    /// Live scopes in creation order.
    scopes: BTreeMap<u64, Arc<ScopeCore>>,
    /// Effective tags → sequence number in `scopes`.
    by_tags: HashMap<TagSet, u64>,
}

/// State shared by every scope of one tree.
pub(crate) struct Registry {
    reporter: Arc<dyn StatsReporter>,
    clock: Arc<dyn Clock>,
    table: Mutex<ScopeTable>,
    /// Serializes flushes so a tick and a manual flush never interleave.
    flush_lock: Mutex<()>,
}

impl Registry {
    pub(crate) fn new(reporter: Arc<dyn StatsReporter>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            reporter,
            clock,
            table: Mutex::new(ScopeTable::default()),
            flush_lock: Mutex::new(()),
        })
    }

    /// Return the scope for `tags`, creating it under `parent` if needed.
    fn scope_for(&self, tags: TagSet, parent: Option<&Arc<ScopeCore>>) -> Arc<ScopeCore> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(core) = table.by_tags.get(&tags).and_then(|seq| table.scopes.get(seq)) {
            return core.clone();
        }
        let core = Arc::new(ScopeCore::new(tags.clone(), parent.map(Arc::downgrade)));
        let seq = table.next_seq;
        table.next_seq += 1;
        table.scopes.insert(seq, core.clone());
        table.by_tags.insert(tags, seq);
        core
    }

    pub(crate) fn root_scope(self: &Arc<Self>, tags: TagSet) -> Scope {
        let core = self.scope_for(tags, None);
        Scope {
            core,
            registry: self.clone(),
        }
    }

    pub(crate) fn live_scopes(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .scopes
            .len()
    }

    /// Walk every live scope, hand its accumulated metrics to the reporter,
    /// and release scopes nobody holds any more.
    pub(crate) fn flush(&self) -> FlushStats {
        let _guard = self.flush_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let scopes: Vec<(u64, Arc<ScopeCore>)> = {
            let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table
                .scopes
                .iter()
                .map(|(seq, core)| (*seq, core.clone()))
                .collect()
        };

        let mut records = Vec::new();
        for (_, core) in &scopes {
            core.drain(&mut records);
        }

        let mut stats = FlushStats::default();
        for record in records {
            let result = match &record {
                FlushRecord::Counter { name, tags, delta } => {
                    stats.counters += 1;
                    self.reporter.report_counter(name, tags, *delta)
                }
                FlushRecord::Timer {
                    name,
                    tags,
                    duration,
                } => {
                    stats.timers += 1;
                    self.reporter.report_timer(name, tags, *duration)
                }
            };
            if let Err(e) = result {
                stats.failures += 1;
                warn!(record = ?record, error = %e, "reporter rejected metric, dropping");
            }
        }
        self.reporter.flush();

        // Our local clones plus the table's entry: anything above two is held
        // by a caller and may still emit.
        let idle: Vec<u64> = scopes
            .iter()
            .filter(|(_, core)| Arc::strong_count(core) == 2)
            .map(|(seq, _)| *seq)
            .collect();
        drop(scopes);
        if !idle.is_empty() {
            let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            for seq in idle {
                let Some(core) = table.scopes.get(&seq) else {
                    continue;
                };
                if Arc::strong_count(core) != 1 || core.has_pending() {
                    continue;
                }
                if let Some(core) = table.scopes.remove(&seq) {
                    table.by_tags.remove(&core.tags);
                    stats.pruned += 1;
                }
            }
        }

        debug!(
            counters = stats.counters,
            timers = stats.timers,
            failures = stats.failures,
            pruned = stats.pruned,
            "metrics flushed"
        );
        stats
    }
}

impl ScopeCore {
    fn has_pending(&self) -> bool {
        let counters = self.counters.read().unwrap_or_else(PoisonError::into_inner);
        if counters.values().any(|c| c.load(Ordering::Acquire) > 0) {
            return true;
        }
        let timers = self.timers.read().unwrap_or_else(PoisonError::into_inner);
        timers.values().any(|t| {
            !t.samples
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .is_empty()
        })
    }
}

/// Handle to a node in the scope tree.
///
/// Cloning is cheap. A scope stays registered until it has been flushed
/// with no handle (scope, counter, timer, or stopwatch) left pointing at it.
#[derive(Clone)]
pub struct Scope {
    core: Arc<ScopeCore>,
    registry: Arc<Registry>,
}

impl Scope {
    /// Effective tags: every ancestor's tags overridden by this scope's own.
    pub fn tags(&self) -> &TagSet {
        &self.core.tags
    }

    /// The scope this one was first derived from, if it is still alive.
    ///
    /// Scopes are shared by effective tag set, so a scope reached along
    /// several derivation paths reports the parent of whichever path
    /// registered it first. Once that parent has been released this returns
    /// `None`, even if another path's parent is still held.
    pub fn parent(&self) -> Option<Scope> {
        let parent = self.core.parent.as_ref()?.upgrade()?;
        Some(Scope {
            core: parent,
            registry: self.registry.clone(),
        })
    }

    /// Derive a child scope carrying `extra` on top of this scope's tags.
    ///
    /// The receiver is unchanged. Deriving the same effective tag set twice
    /// returns the same underlying scope. Fails if `extra` has an empty key
    /// or would change a reserved key already present.
    pub fn tagged(&self, extra: TagSet) -> MetricsResult<Scope> {
        self.core.tags.check_extension(&extra)?;
        let tags = self.core.tags.merge(&extra);
        if tags == self.core.tags {
            return Ok(self.clone());
        }
        let core = self.registry.scope_for(tags, Some(&self.core));
        Ok(Scope {
            core,
            registry: self.registry.clone(),
        })
    }

    /// Counter named `name` in this scope.
    pub fn counter(&self, name: &str) -> Counter {
        Counter {
            cell: self.core.counter_cell(name),
            _scope: self.core.clone(),
        }
    }

    /// Timer named `name` in this scope.
    pub fn timer(&self, name: &str) -> Timer {
        Timer {
            name: Arc::from(name),
            cell: self.core.timer_cell(name),
            clock: self.registry.clock.clone(),
            _scope: self.core.clone(),
        }
    }

    /// The clock stopwatches in this tree measure against.
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.registry.clock.clone()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scope").field("tags", &self.core.tags).finish()
    }
}

/// Monotonic counter; increments are batched until the next flush.
#[derive(Clone)]
pub struct Counter {
    cell: Arc<AtomicU64>,
    _scope: Arc<ScopeCore>,
}

impl Counter {
    /// Add `delta`. Zero is a no-op.
    pub fn inc(&self, delta: u64) {
        if delta == 0 {
            return;
        }
        self.cell.fetch_add(delta, Ordering::AcqRel);
    }

    /// Delta accumulated since the last flush.
    pub fn pending(&self) -> u64 {
        self.cell.load(Ordering::Acquire)
    }
}

/// Timer; every recorded sample is reported individually.
#[derive(Clone)]
pub struct Timer {
    name: Arc<str>,
    cell: Arc<TimerCell>,
    clock: Arc<dyn Clock>,
    _scope: Arc<ScopeCore>,
}

impl Timer {
    pub fn record(&self, duration: Duration) {
        self.cell
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
    }

    /// Start measuring from the current logical time.
    pub fn start(&self) -> Stopwatch {
        Stopwatch {
            started_at: self.clock.now(),
            timer: self.clone(),
            stopped: AtomicBool::new(false),
        }
    }

    /// Samples recorded since the last flush.
    pub fn pending(&self) -> usize {
        self.cell
            .samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Live measurement started by [`Timer::start`].
pub struct Stopwatch {
    timer: Timer,
    started_at: Duration,
    stopped: AtomicBool,
}

impl Stopwatch {
    /// Record the elapsed logical time as one timer sample.
    ///
    /// Returns the recorded duration. A stopwatch can be stopped once.
    pub fn stop(&self) -> MetricsResult<Duration> {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return Err(MetricsError::StopwatchStopped(self.timer.name.to_string()));
        }
        let elapsed = self.timer.clock.now().saturating_sub(self.started_at);
        self.timer.record(elapsed);
        Ok(elapsed)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::tags::keys;
    use crate::testing::{RecordedCall, RecordingReporter};

    fn tree() -> (Arc<Registry>, Arc<RecordingReporter>, Arc<ManualClock>, Scope) {
        let reporter = Arc::new(RecordingReporter::new());
        let clock = Arc::new(ManualClock::new());
        let registry = Registry::new(reporter.clone(), clock.clone());
        let root = registry.root_scope(TagSet::from([("service", "orders")]));
        (registry, reporter, clock, root)
    }

    #[test]
    fn increments_batch_into_one_report() {
        let (registry, reporter, _, root) = tree();
        let counter = root.counter("requests");
        counter.inc(1);
        counter.inc(4);
        counter.inc(0);
        counter.inc(2);
        assert_eq!(counter.pending(), 7);

        registry.flush();
        assert_eq!(reporter.counter_calls("requests"), vec![(root.tags().clone(), 7)]);
        assert_eq!(counter.pending(), 0);

        // Nothing new: no second report.
        registry.flush();
        assert_eq!(reporter.counter_calls("requests").len(), 1);
    }

    #[test]
    fn each_stop_is_a_separate_sample() {
        let (registry, reporter, clock, root) = tree();
        let timer = root.timer("latency");

        let first = timer.start();
        clock.advance(Duration::from_millis(40));
        assert_eq!(first.stop().unwrap(), Duration::from_millis(40));

        let second = timer.start();
        clock.advance(Duration::from_millis(15));
        second.stop().unwrap();

        registry.flush();
        let durations: Vec<Duration> = reporter
            .timer_calls("latency")
            .into_iter()
            .map(|(_, d)| d)
            .collect();
        assert_eq!(
            durations,
            vec![Duration::from_millis(40), Duration::from_millis(15)]
        );
    }

    #[test]
    fn stopping_twice_is_an_error() {
        let (_, _, _, root) = tree();
        let sw = root.timer("t").start();
        sw.stop().unwrap();
        assert!(sw.is_stopped());
        assert!(matches!(sw.stop(), Err(MetricsError::StopwatchStopped(name)) if name == "t"));
        assert_eq!(root.timer("t").pending(), 1);
    }

    #[test]
    fn tags_inherit_through_three_levels() {
        let (_, _, _, root) = tree();
        let a = root
            .tagged(TagSet::from([("zone", "a"), ("tier", "1")]))
            .unwrap();
        let b = a.tagged(TagSet::from([("tier", "2"), ("host", "h")])).unwrap();
        let c = b.tagged(TagSet::from([("host", "h2")])).unwrap();

        let expected = TagSet::from([
            ("service", "orders"),
            ("zone", "a"),
            ("tier", "2"),
            ("host", "h2"),
        ]);
        assert_eq!(c.tags(), &expected);
        assert_eq!(a.tags().get("tier"), Some("1"));
        assert_eq!(c.parent().unwrap().tags(), b.tags());
    }

    #[test]
    fn same_tags_share_one_scope() {
        let (registry, reporter, _, root) = tree();
        let one = root.tagged(TagSet::from([("k", "v")])).unwrap();
        let two = root.tagged(TagSet::from([("k", "v")])).unwrap();
        one.counter("c").inc(1);
        two.counter("c").inc(1);
        registry.flush();
        assert_eq!(reporter.counter_calls("c"), vec![(one.tags().clone(), 2)]);
    }

    #[test]
    fn shared_scope_keeps_its_first_parent() {
        let (registry, _, _, root) = tree();
        let a = root.tagged(TagSet::from([("a", "1")])).unwrap();
        let b = root.tagged(TagSet::from([("b", "2")])).unwrap();

        let via_a = a.tagged(TagSet::from([("b", "2")])).unwrap();
        let via_b = b.tagged(TagSet::from([("a", "1")])).unwrap();
        assert_eq!(via_a.tags(), via_b.tags());
        assert_eq!(registry.live_scopes(), 4);

        assert_eq!(via_a.parent().unwrap().tags(), a.tags());
        assert_eq!(via_b.parent().unwrap().tags(), a.tags());

        drop(a);
        registry.flush();
        assert!(via_b.parent().is_none());
        assert_eq!(b.tags().get("b"), Some("2"));
    }

    #[test]
    fn tagged_with_nothing_new_returns_self() {
        let (registry, _, _, root) = tree();
        let same = root.tagged(TagSet::new()).unwrap();
        assert_eq!(same.tags(), root.tags());
        assert_eq!(registry.live_scopes(), 1);
    }

    #[test]
    fn reserved_retag_rejected() {
        let (_, _, _, root) = tree();
        let domain = root
            .tagged(TagSet::from([(keys::DOMAIN, "orders")]))
            .unwrap();
        let err = domain
            .tagged(TagSet::from([(keys::DOMAIN, "billing")]))
            .unwrap_err();
        assert!(matches!(err, MetricsError::ReservedTag { .. }));
    }

    #[test]
    fn dropped_scope_flushes_then_prunes() {
        let (registry, reporter, _, root) = tree();
        {
            let exec = root.tagged(TagSet::from([("run", "1")])).unwrap();
            exec.counter("done").inc(1);
        }
        assert_eq!(registry.live_scopes(), 2);

        let stats = registry.flush();
        assert_eq!(stats.counters, 1);
        assert_eq!(stats.pruned, 1);
        assert_eq!(registry.live_scopes(), 1);
        assert_eq!(reporter.counter_calls("done").len(), 1);
    }

    #[test]
    fn held_counter_keeps_scope_alive() {
        let (registry, reporter, _, root) = tree();
        let counter = root
            .tagged(TagSet::from([("run", "2")]))
            .unwrap()
            .counter("late");
        registry.flush();
        assert_eq!(registry.live_scopes(), 2);

        counter.inc(3);
        drop(counter);
        registry.flush();
        assert_eq!(reporter.counter_calls("late").len(), 1);
        assert_eq!(registry.live_scopes(), 1);
    }

    #[test]
    fn reporter_failure_drops_only_that_tick() {
        let (registry, reporter, _, root) = tree();
        let counter = root.counter("flaky");

        reporter.fail_next(1);
        counter.inc(5);
        let stats = registry.flush();
        assert_eq!(stats.failures, 1);
        assert!(reporter.counter_calls("flaky").is_empty());

        counter.inc(2);
        registry.flush();
        assert_eq!(reporter.counter_calls("flaky"), vec![(root.tags().clone(), 2)]);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let (registry, reporter, _, root) = tree();
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let counter = root.counter("hits");
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.inc(1);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        registry.flush();
        assert_eq!(reporter.counter_calls("hits"), vec![(root.tags().clone(), 8000)]);
    }

    #[test]
    fn flush_reports_in_scope_creation_order() {
        let (registry, reporter, _, root) = tree();
        let child = root.tagged(TagSet::from([("x", "1")])).unwrap();
        child.counter("b").inc(1);
        root.counter("a").inc(1);
        registry.flush();

        let names: Vec<String> = reporter
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                RecordedCall::Counter { name, .. } => Some(name),
                RecordedCall::Timer { .. } => None,
            })
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
