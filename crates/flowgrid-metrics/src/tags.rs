//! Immutable tag sets and the reserved tag keys.
//!
//! A [`TagSet`] is a cheap-to-clone, immutable `key → value` map. Keys are
//! kept sorted so equality, hashing, and rendering are stable regardless of
//! insertion order.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, MetricsResult};

/// Tag keys with a fixed meaning for external dashboards.
pub mod keys {
    /// Domain the execution belongs to.
    pub const DOMAIN: &str = "domain";
    /// Task list (task queue) the execution was polled from.
    pub const TASK_LIST: &str = "task-list";
    /// Workflow type of a workflow execution.
    pub const WORKFLOW_TYPE: &str = "workflow-type";
    /// Activity type of an activity execution.
    pub const ACTIVITY_TYPE: &str = "activity-type";

    /// Keys that may be introduced once along a scope chain and never
    /// re-tagged with a different value.
    pub const RESERVED: [&str; 2] = [DOMAIN, TASK_LIST];
}

/// Immutable mapping of tag name to tag value.
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct TagSet {
    inner: Arc<BTreeMap<String, String>>,
}

impl TagSet {
    /// The empty tag set.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.inner.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterate tags in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Return a new set with `other` layered on top of `self`.
    ///
    /// Keys present in both take the value from `other`. Neither input is
    /// modified.
    pub fn merge(&self, other: &TagSet) -> TagSet {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }
        let mut merged = (*self.inner).clone();
        for (key, value) in other.inner.iter() {
            merged.insert(key.clone(), value.clone());
        }
        TagSet::from(merged)
    }

    /// Check that `extra` may be layered on top of `self`.
    ///
    /// Rejects empty keys, and rejects a reserved key whose value would
    /// change once set.
    pub fn check_extension(&self, extra: &TagSet) -> MetricsResult<()> {
        for (key, value) in extra.iter() {
            if key.is_empty() {
                return Err(MetricsError::EmptyTagKey);
            }
            if !keys::RESERVED.contains(&key) {
                continue;
            }
            if let Some(existing) = self.get(key) {
                if existing != value {
                    return Err(MetricsError::ReservedTag {
                        key: key.to_string(),
                        existing: existing.to_string(),
                        attempted: value.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl From<BTreeMap<String, String>> for TagSet {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self {
            inner: Arc::new(map),
        }
    }
}

impl From<TagSet> for BTreeMap<String, String> {
    fn from(tags: TagSet) -> Self {
        Arc::unwrap_or_clone(tags.inner)
    }
}

impl<K, V, const N: usize> From<[(K, V); N]> for TagSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

impl<K, V> FromIterator<(K, V)> for TagSet
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map: BTreeMap<String, String> = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        TagSet::from(map)
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in self.iter() {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{key}={value}")?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}
