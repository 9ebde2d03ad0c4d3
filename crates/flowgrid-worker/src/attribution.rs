//! Scope hierarchy for execution attribution.
//!
//! ```text
//! root ─► {domain} ─► {domain, task-list} ─► {…, workflow-type | activity-type}
//! ```

use flowgrid_metrics::tags::keys;
use flowgrid_metrics::{MetricsResult, Scope, TagSet};

/// What kind of code an execution scope attributes metrics to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionType {
    Workflow(String),
    Activity(String),
}

impl ExecutionType {
    fn tags(&self) -> TagSet {
        match self {
            ExecutionType::Workflow(name) => TagSet::from([(keys::WORKFLOW_TYPE, name.as_str())]),
            ExecutionType::Activity(name) => TagSet::from([(keys::ACTIVITY_TYPE, name.as_str())]),
        }
    }
}

/// Scope shared by every execution polled from one task list.
pub fn task_list_scope(root: &Scope, domain: &str, task_list: &str) -> MetricsResult<Scope> {
    root.tagged(TagSet::from([(keys::DOMAIN, domain)]))?
        .tagged(TagSet::from([(keys::TASK_LIST, task_list)]))
}

/// Scope for a single workflow or activity execution.
pub fn execution_scope(task_list_scope: &Scope, kind: &ExecutionType) -> MetricsResult<Scope> {
    task_list_scope.tagged(kind.tags())
}
