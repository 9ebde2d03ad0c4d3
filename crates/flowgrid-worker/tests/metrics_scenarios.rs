//! End-to-end metrics scenarios run inside a `TestWorkflowEnvironment`.
//!
//! - Parent and child workflows emitting counters and a timer around a 3s sleep
//! - Corrupted signal payloads counted once per delivery, whichever layer
//!   notices the corruption
//! - Periodic flushing without explicit flush calls
//! - Workflows keep their pace while a slow reporter is being flushed

use std::sync::Arc;
use std::time::Duration;

use flowgrid_interceptor::{
    CorruptSignalInterceptor, InterceptorChain, InterceptorFactory, Payload, SignalHandler,
    SignalInterceptor,
};
use flowgrid_metrics::names::CORRUPTED_SIGNALS_COUNTER;
use flowgrid_metrics::tags::keys;
use flowgrid_metrics::testing::RecordingReporter;
use flowgrid_metrics::{StatsReporter, TagSet};
use flowgrid_worker::{TestEnvironmentOptions, TestWorkflowEnvironment, WorkerOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;

const DOMAIN: &str = "UnitTest";
const TASK_LIST: &str = "metrics-test";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

fn environment() -> (TestWorkflowEnvironment, Arc<RecordingReporter>) {
    init_tracing();
    let reporter = Arc::new(RecordingReporter::new());
    let env = TestWorkflowEnvironment::new(
        TestEnvironmentOptions::new(DOMAIN, reporter.clone())
            .report_every(Duration::from_millis(10)),
    )
    .unwrap();
    (env, reporter)
}

// ── Parent / child workflow metrics ─────────────────────────────────

#[tokio::test(start_paused = true)]
async fn parent_and_child_counters_and_sleep_timer() {
    let (env, reporter) = environment();
    let worker = env.new_worker(TASK_LIST, WorkerOptions::new()).unwrap();

    worker
        .register_workflow("TestWorkflow", |cx, _| async move {
            cx.metrics_scope().counter("test-started").inc(1);
            let child = cx.start_child("TestChildWorkflow", vec![json!(1), json!(2)])?;
            let result = child.result().await?;
            cx.metrics_scope().counter("test-done").inc(1);
            Ok(result)
        })
        .unwrap();
    worker
        .register_workflow("TestChildWorkflow", |cx, args| async move {
            cx.metrics_scope().counter("test-child-started").inc(1);
            let stopwatch = cx.metrics_scope().timer("test-timer").start();
            cx.sleep(Duration::from_millis(3000)).await;
            stopwatch.stop()?;
            cx.metrics_scope().counter("test-child-done").inc(1);
            let sum: i64 = args.iter().filter_map(Payload::as_i64).sum();
            Ok(json!(sum))
        })
        .unwrap();
    worker.start().unwrap();

    let result = worker
        .execute("TestWorkflow", vec![])
        .unwrap()
        .result()
        .await
        .unwrap();
    assert_eq!(result, json!(3));

    env.close().await;

    for name in [
        "test-started",
        "test-done",
        "test-child-started",
        "test-child-done",
    ] {
        let calls = reporter.counter_calls(name);
        assert_eq!(calls.len(), 1, "{name}: {calls:?}");
        let (tags, delta) = &calls[0];
        assert_eq!(*delta, 1, "{name}");
        assert_eq!(tags.get(keys::DOMAIN), Some(DOMAIN));
        assert_eq!(tags.get(keys::TASK_LIST), Some(TASK_LIST));
    }
    assert_eq!(
        reporter.counter_calls("test-started")[0].0.get(keys::WORKFLOW_TYPE),
        Some("TestWorkflow")
    );
    assert_eq!(
        reporter.counter_calls("test-child-done")[0].0.get(keys::WORKFLOW_TYPE),
        Some("TestChildWorkflow")
    );

    let timers = reporter.timer_calls("test-timer");
    assert_eq!(timers.len(), 1);
    let slept = timers[0].1;
    assert!(slept >= Duration::from_millis(3000), "{slept:?}");
    assert!(slept < Duration::from_millis(3100), "{slept:?}");
}

// ── Corrupted signals ───────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct SignalObject {
    value: String,
}

const SIGNAL_NAME: &str = "testSignal";

/// Parent sends two object signals to a child that collects what decodes.
async fn run_corrupted_signal_scenario(factory: InterceptorFactory) -> Arc<RecordingReporter> {
    let (env, reporter) = environment();
    let worker = env
        .new_worker(TASK_LIST, WorkerOptions::new().interceptor_factory(factory))
        .unwrap();

    worker
        .register_workflow("SendSignalObject", |cx, _| async move {
            let child = cx.start_child("ReceiveSignalObject", vec![])?;
            for value in ["Hello", "World"] {
                let payload = serde_json::to_value(SignalObject {
                    value: value.to_string(),
                })?;
                cx.signal_workflow(child.id(), SIGNAL_NAME, vec![payload])?;
            }
            Ok(child.result().await?)
        })
        .unwrap();
    worker
        .register_workflow("ReceiveSignalObject", |cx, _| async move {
            let mut received = Vec::new();
            for _ in 0..2 {
                if let Some(signal) = cx
                    .receive_signal_timeout::<SignalObject>(SIGNAL_NAME, Duration::from_secs(5))
                    .await?
                {
                    received.push(signal.value);
                }
            }
            Ok(json!(received))
        })
        .unwrap();
    worker.start().unwrap();

    let result = worker
        .execute("SendSignalObject", vec![])
        .unwrap()
        .result()
        .await
        .unwrap();
    assert_eq!(result, json!([]), "no signal should survive corruption");

    let history = env.diagnostics();
    assert_eq!(history.matches("SignalReceived").count(), 2, "{history}");

    env.close().await;
    reporter
}

fn assert_two_corrupted_signals(reporter: &RecordingReporter) {
    let calls = reporter.counter_calls(CORRUPTED_SIGNALS_COUNTER);
    assert_eq!(calls.len(), 1, "{calls:?}");
    let (tags, delta) = &calls[0];
    assert_eq!(*delta, 2);
    assert_eq!(tags.get(keys::DOMAIN), Some(DOMAIN));
    assert_eq!(tags.get(keys::TASK_LIST), Some(TASK_LIST));
}

#[tokio::test(start_paused = true)]
async fn corrupting_interceptor_counts_each_delivery() {
    let reporter =
        run_corrupted_signal_scenario(CorruptSignalInterceptor::factory(json!("Corrupted Signal")))
            .await;
    assert_two_corrupted_signals(&reporter);
}

#[tokio::test(start_paused = true)]
async fn undecodable_payload_counts_without_interceptor_help() {
    let factory = InterceptorChain::new()
        .stage(|next| {
            Arc::new(SignalInterceptor::new(next).map_args(|args| {
                if args.is_empty() {
                    args
                } else {
                    vec![json!("Corrupted Signal")]
                }
            })) as Arc<dyn SignalHandler>
        })
        .into_factory();
    let reporter = run_corrupted_signal_scenario(factory).await;
    assert_two_corrupted_signals(&reporter);
}

// ── Flush loop ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn flush_loop_reports_without_explicit_flush() {
    let (env, reporter) = environment();
    let worker = env.new_worker(TASK_LIST, WorkerOptions::new()).unwrap();
    worker.metrics_scope().counter("heartbeat").inc(4);

    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(reporter.counter_calls("heartbeat").len(), 1);
    assert_eq!(reporter.counter_calls("heartbeat")[0].1, 4);

    tokio::time::sleep(Duration::from_millis(25)).await;
    assert_eq!(
        reporter.counter_calls("heartbeat").len(),
        1,
        "zero deltas are not re-reported"
    );
    assert!(reporter.flushes() >= 4);

    env.close().await;
}

struct SlowReporter {
    delay: Duration,
    inner: RecordingReporter,
}

impl StatsReporter for SlowReporter {
    fn report_counter(&self, name: &str, tags: &TagSet, delta: u64) -> anyhow::Result<()> {
        std::thread::sleep(self.delay);
        self.inner.report_counter(name, tags, delta)
    }

    fn report_timer(&self, name: &str, tags: &TagSet, duration: Duration) -> anyhow::Result<()> {
        std::thread::sleep(self.delay);
        self.inner.report_timer(name, tags, duration)
    }
}

#[tokio::test]
async fn slow_reporter_does_not_delay_workflows() {
    init_tracing();
    let reporter = Arc::new(SlowReporter {
        delay: Duration::from_millis(200),
        inner: RecordingReporter::new(),
    });
    let env = TestWorkflowEnvironment::new(
        TestEnvironmentOptions::new(DOMAIN, reporter.clone())
            .report_every(Duration::from_millis(10)),
    )
    .unwrap();
    let worker = env.new_worker(TASK_LIST, WorkerOptions::new()).unwrap();
    worker
        .register_workflow("Ticker", |cx, _| async move {
            for _ in 0..5 {
                cx.metrics_scope().counter("tick").inc(1);
                cx.sleep(Duration::from_millis(10)).await;
            }
            Ok(Payload::Null)
        })
        .unwrap();
    worker.start().unwrap();

    let began = std::time::Instant::now();
    worker
        .execute("Ticker", vec![])
        .unwrap()
        .result()
        .await
        .unwrap();
    let elapsed = began.elapsed();
    assert!(elapsed < Duration::from_millis(300), "{elapsed:?}");

    env.close().await;
    let ticks: u64 = reporter
        .inner
        .counter_calls("tick")
        .into_iter()
        .map(|(_, delta)| delta)
        .sum();
    assert_eq!(ticks, 5);
}
