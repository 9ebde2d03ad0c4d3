//! Worker configuration.
//!
//! ```toml
//! domain = "orders"
//! task_list = "orders-main"
//! signal_buffer = 32
//! retained_executions = 100
//!
//! [metrics]
//! reporting_interval = "1s"
//! ```

use std::path::Path;
use std::sync::Arc;

use flowgrid_metrics::{MetricsConfig, RootScope, StatsReporter};
use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};

/// Default number of undelivered signals buffered per signal name.
pub const DEFAULT_SIGNAL_BUFFER: usize = 64;

/// Default number of finished executions kept for diagnostics.
pub const DEFAULT_RETAINED_EXECUTIONS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub domain: String,
    pub task_list: String,
    /// Pending signals kept per name before the oldest is dropped.
    #[serde(default = "default_signal_buffer")]
    pub signal_buffer: usize,
    /// Finished executions whose history is kept. Older ones are released
    /// along with their metrics scopes.
    #[serde(default = "default_retained_executions")]
    pub retained_executions: usize,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_signal_buffer() -> usize {
    DEFAULT_SIGNAL_BUFFER
}

fn default_retained_executions() -> usize {
    DEFAULT_RETAINED_EXECUTIONS
}

impl WorkerConfig {
    pub fn new(domain: impl Into<String>, task_list: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            task_list: task_list.into(),
            signal_buffer: DEFAULT_SIGNAL_BUFFER,
            retained_executions: DEFAULT_RETAINED_EXECUTIONS,
            metrics: MetricsConfig::default(),
        }
    }

    pub fn from_toml_str(content: &str) -> WorkerResult<Self> {
        let config: WorkerConfig =
            toml::from_str(content).map_err(|e| WorkerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> WorkerResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| WorkerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> WorkerResult<()> {
        if self.domain.is_empty() {
            return Err(WorkerError::Config("domain must not be empty".to_string()));
        }
        if self.task_list.is_empty() {
            return Err(WorkerError::Config("task_list must not be empty".to_string()));
        }
        if self.signal_buffer == 0 {
            return Err(WorkerError::Config(
                "signal_buffer must be at least 1".to_string(),
            ));
        }
        self.metrics.interval()?;
        Ok(())
    }

    /// Build the root scope described by the `[metrics]` table. The caller
    /// starts it and passes it to [`Worker::new`](crate::Worker::new).
    pub fn root_scope(&self, reporter: Arc<dyn StatsReporter>) -> WorkerResult<RootScope> {
        Ok(RootScope::from_config(&self.metrics, reporter)?)
    }
}
