//! Worker: registered workflow types, running executions, signal delivery.
//!
//! ```text
//! Worker::new(&root, config, options)
//!   ├── register_workflow("Type", f)   (before start)
//!   ├── start()                        → compiles the signal pipeline once
//!   ├── execute("Type", args)          → spawns an execution, returns a handle
//!   ├── signal(id, name, args)         → pipeline → execution inbox
//!   └── shutdown()                     → closes inboxes, aborts executions
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use flowgrid_interceptor::{
    build_pipeline, identity, InterceptorFactory, Payload, Signal, SignalContext, SignalHandler,
};
use flowgrid_metrics::names::{
    WORKFLOW_COMPLETED_COUNTER, WORKFLOW_E2E_LATENCY, WORKFLOW_FAILED_COUNTER,
    WORKFLOW_STARTED_COUNTER,
};
use flowgrid_metrics::{RootScope, Scope};
use tokio::runtime::Handle;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::attribution::{execution_scope, task_list_scope, ExecutionType};
use crate::config::WorkerConfig;
use crate::context::WorkflowContext;
use crate::error::{WorkerError, WorkerResult};
use crate::execution::{Execution, HistoryEvent};

/// Future produced by a workflow function.
pub type WorkflowFuture = Pin<Box<dyn Future<Output = anyhow::Result<Payload>> + Send>>;

type WorkflowFn = Arc<dyn Fn(WorkflowContext, Vec<Payload>) -> WorkflowFuture + Send + Sync>;

/// Options that shape a worker beyond its [`WorkerConfig`].
#[derive(Clone)]
pub struct WorkerOptions {
    interceptor_factory: InterceptorFactory,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            interceptor_factory: identity(),
        }
    }
}

impl WorkerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap every signal delivery on this worker in `factory`'s stages.
    pub fn interceptor_factory(mut self, factory: InterceptorFactory) -> Self {
        self.interceptor_factory = factory;
        self
    }
}

impl fmt::Debug for WorkerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerOptions").finish_non_exhaustive()
    }
}

struct Running {
    execution: Arc<Execution>,
    abort: AbortHandle,
}

pub(crate) struct WorkerShared {
    config: WorkerConfig,
    scope: Scope,
    factory: InterceptorFactory,
    pipeline: OnceLock<Arc<dyn SignalHandler>>,
    workflows: Mutex<HashMap<String, WorkflowFn>>,
    running: Mutex<HashMap<String, Running>>,
    /// Most recent finished executions, oldest first.
    finished: Mutex<VecDeque<Arc<Execution>>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl WorkerShared {
    pub(crate) fn execute(
        self: &Arc<Self>,
        workflow_type: &str,
        args: Vec<Payload>,
    ) -> WorkerResult<WorkflowHandle> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(WorkerError::ShutDown);
        }
        if self.pipeline.get().is_none() {
            return Err(WorkerError::NotStarted);
        }
        let runtime = Handle::try_current().map_err(|_| WorkerError::NoRuntime)?;
        let workflow = self
            .workflows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(workflow_type)
            .cloned()
            .ok_or_else(|| WorkerError::UnknownWorkflowType(workflow_type.to_string()))?;

        let scope = execution_scope(
            &self.scope,
            &ExecutionType::Workflow(workflow_type.to_string()),
        )?;
        let seq = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("{workflow_type}-{seq}");
        let execution = Arc::new(Execution::new(
            id.clone(),
            workflow_type.to_string(),
            scope,
            self.config.signal_buffer,
        ));
        execution.record(HistoryEvent::Started { args: args.clone() });
        execution.scope.counter(WORKFLOW_STARTED_COUNTER).inc(1);
        info!(workflow_id = %id, workflow_type, task_list = %self.config.task_list, "workflow started");

        let cx = WorkflowContext::new(execution.clone(), self.clone());
        let shared = self.clone();
        let exec = execution.clone();

        // The task removes itself from `running`; holding the lock across the
        // spawn keeps that removal ordered after the insert.
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let task: JoinHandle<Result<Payload, String>> = runtime.spawn(async move {
            let stopwatch = exec.scope.timer(WORKFLOW_E2E_LATENCY).start();
            let outcome = workflow(cx, args).await;
            if let Err(e) = stopwatch.stop() {
                warn!(error = %e, "end-to-end stopwatch already stopped");
            }
            let outcome = match outcome {
                Ok(result) => {
                    exec.record(HistoryEvent::Completed {
                        result: result.clone(),
                    });
                    exec.scope.counter(WORKFLOW_COMPLETED_COUNTER).inc(1);
                    info!(workflow_id = %exec.id, "workflow completed");
                    Ok(result)
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    exec.record(HistoryEvent::Failed {
                        error: message.clone(),
                    });
                    exec.scope.counter(WORKFLOW_FAILED_COUNTER).inc(1);
                    warn!(workflow_id = %exec.id, error = %message, "workflow failed");
                    Err(message)
                }
            };
            shared.retire(&exec.id);
            outcome
        });
        running.insert(
            id.clone(),
            Running {
                execution,
                abort: task.abort_handle(),
            },
        );
        drop(running);

        Ok(WorkflowHandle {
            id,
            shared: self.clone(),
            task,
        })
    }

    fn retire(&self, id: &str) {
        let removed = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if let Some(running) = removed {
            running.execution.inbox.close();
            self.retain_finished([running.execution]);
        }
    }

    /// Keep finished executions for diagnostics, evicting the oldest past
    /// `retained_executions`.
    fn retain_finished(&self, executions: impl IntoIterator<Item = Arc<Execution>>) {
        let cap = self.config.retained_executions;
        let mut finished = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
        finished.extend(executions);
        while finished.len() > cap {
            finished.pop_front();
        }
    }

    /// Run `signal` through the pipeline into execution `id`'s inbox.
    pub(crate) fn deliver(&self, id: &str, name: &str, args: Vec<Payload>) -> WorkerResult<()> {
        let pipeline = self.pipeline.get().ok_or(WorkerError::NotStarted)?;
        let execution = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .map(|r| r.execution.clone())
            .ok_or_else(|| WorkerError::ExecutionNotFound(id.to_string()))?;

        let cx = SignalContext::new(
            &execution.id,
            &execution.workflow_type,
            &execution.scope,
            execution.as_ref(),
        );
        debug!(workflow_id = %id, signal = name, "delivering signal");
        pipeline.handle_signal(&cx, Signal::new(name, args))?;
        Ok(())
    }

    fn executions(&self) -> Vec<Arc<Execution>> {
        let mut all: Vec<Arc<Execution>> = self
            .finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect();
        all.extend(
            self.running
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .values()
                .map(|r| r.execution.clone()),
        );
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }
}

/// Runs workflow executions for one domain and task list.
pub struct Worker {
    shared: Arc<WorkerShared>,
}

impl Worker {
    pub fn new(root: &RootScope, config: WorkerConfig, options: WorkerOptions) -> WorkerResult<Self> {
        config.validate()?;
        let scope = task_list_scope(root.scope(), &config.domain, &config.task_list)?;
        Ok(Self {
            shared: Arc::new(WorkerShared {
                config,
                scope,
                factory: options.interceptor_factory,
                pipeline: OnceLock::new(),
                workflows: Mutex::new(HashMap::new()),
                running: Mutex::new(HashMap::new()),
                finished: Mutex::new(VecDeque::new()),
                next_id: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn domain(&self) -> &str {
        &self.shared.config.domain
    }

    pub fn task_list(&self) -> &str {
        &self.shared.config.task_list
    }

    /// Scope tagged with this worker's domain and task list.
    pub fn metrics_scope(&self) -> &Scope {
        &self.shared.scope
    }

    /// Register a workflow function under `workflow_type`.
    pub fn register_workflow<F, Fut>(&self, workflow_type: &str, f: F) -> WorkerResult<()>
    where
        F: Fn(WorkflowContext, Vec<Payload>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Payload>> + Send + 'static,
    {
        if self.shared.pipeline.get().is_some() {
            return Err(WorkerError::AlreadyStarted);
        }
        let mut workflows = self
            .shared
            .workflows
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if workflows.contains_key(workflow_type) {
            return Err(WorkerError::DuplicateWorkflowType(workflow_type.to_string()));
        }
        let f: WorkflowFn = Arc::new(move |cx: WorkflowContext, args: Vec<Payload>| {
            Box::pin(f(cx, args)) as WorkflowFuture
        });
        workflows.insert(workflow_type.to_string(), f);
        debug!(workflow_type, "registered workflow");
        Ok(())
    }

    /// Compile the signal pipeline and begin accepting executions.
    pub fn start(&self) -> WorkerResult<()> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            return Err(WorkerError::ShutDown);
        }
        let pipeline = build_pipeline(&self.shared.factory);
        self.shared
            .pipeline
            .set(pipeline)
            .map_err(|_| WorkerError::AlreadyStarted)?;
        info!(
            domain = %self.shared.config.domain,
            task_list = %self.shared.config.task_list,
            workflows = self.shared.workflows.lock().unwrap_or_else(PoisonError::into_inner).len(),
            "worker started"
        );
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.shared.pipeline.get().is_some()
    }

    /// Start a new execution of `workflow_type`.
    pub fn execute(&self, workflow_type: &str, args: Vec<Payload>) -> WorkerResult<WorkflowHandle> {
        self.shared.execute(workflow_type, args)
    }

    /// Send a signal to a running execution.
    pub fn signal(&self, workflow_id: &str, name: &str, args: Vec<Payload>) -> WorkerResult<()> {
        self.shared.deliver(workflow_id, name, args)
    }

    /// Number of executions still running.
    pub fn running(&self) -> usize {
        self.shared
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Histories of running executions plus the most recent finished ones,
    /// ordered by id.
    pub fn diagnostics(&self) -> String {
        let mut out = String::new();
        for execution in self.shared.executions() {
            out.push_str(&format!(
                "{} ({}) on {}\n",
                execution.id, execution.workflow_type, self.shared.config.task_list
            ));
            execution.history.render_into(&mut out);
        }
        out
    }

    /// Refuse new work and cancel running executions.
    pub fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let running: Vec<Running> = self
            .shared
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, r)| r)
            .collect();
        let cancelled = running.len();
        let mut stopped = Vec::with_capacity(cancelled);
        for r in running {
            r.execution.inbox.close();
            r.abort.abort();
            stopped.push(r.execution);
        }
        self.shared.retain_finished(stopped);
        info!(task_list = %self.shared.config.task_list, cancelled, "worker shut down");
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Handle to one execution started by [`Worker::execute`] or
/// [`WorkflowContext::start_child`].
pub struct WorkflowHandle {
    id: String,
    shared: Arc<WorkerShared>,
    task: JoinHandle<Result<Payload, String>>,
}

impl WorkflowHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn signal(&self, name: &str, args: Vec<Payload>) -> WorkerResult<()> {
        self.shared.deliver(&self.id, name, args)
    }

    /// Wait for the execution to finish.
    pub async fn result(self) -> WorkerResult<Payload> {
        match self.task.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(message)) => Err(WorkerError::WorkflowFailed {
                id: self.id,
                message,
            }),
            Err(e) if e.is_cancelled() => Err(WorkerError::Cancelled(self.id)),
            Err(e) => Err(WorkerError::WorkflowFailed {
                id: self.id,
                message: e.to_string(),
            }),
        }
    }
}

impl fmt::Debug for WorkflowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowHandle").field("id", &self.id).finish()
    }
}
