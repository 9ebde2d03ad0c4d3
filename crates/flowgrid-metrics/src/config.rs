//! Root scope configuration.
//!
//! ```toml
//! reporting_interval = "300ms"
//!
//! [tags]
//! service = "orders"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, MetricsResult};
use crate::tags::TagSet;

/// Flush period used when none is configured.
pub const DEFAULT_REPORTING_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Flush period, e.g. `"300ms"`, `"1s"`, `"2m"`.
    #[serde(default = "default_interval")]
    pub reporting_interval: String,
    /// Base tags of the root scope.
    #[serde(default)]
    pub tags: TagSet,
}

fn default_interval() -> String {
    "1s".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            reporting_interval: default_interval(),
            tags: TagSet::new(),
        }
    }
}

impl MetricsConfig {
    pub fn from_toml_str(content: &str) -> MetricsResult<Self> {
        let config: MetricsConfig =
            toml::from_str(content).map_err(|e| MetricsError::Config(e.to_string()))?;
        config.interval()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> MetricsResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| MetricsError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// The parsed, validated flush period.
    pub fn interval(&self) -> MetricsResult<Duration> {
        let interval = parse_duration(&self.reporting_interval)?;
        validate_interval(interval)
    }
}

pub(crate) fn validate_interval(interval: Duration) -> MetricsResult<Duration> {
    if interval.is_zero() {
        return Err(MetricsError::InvalidInterval(
            "reporting interval must be greater than zero".to_string(),
        ));
    }
    Ok(interval)
}

/// Parse `"<n>ms"`, `"<n>s"`, or `"<n>m"`.
pub fn parse_duration(s: &str) -> MetricsResult<Duration> {
    let s = s.trim();
    let invalid = || MetricsError::InvalidInterval(format!("cannot parse {s:?}"));
    let (digits, unit): (&str, fn(u64) -> Duration) = if let Some(ms) = s.strip_suffix("ms") {
        (ms, Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        (secs, Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        (mins, |m| Duration::from_secs(m.saturating_mul(60)))
    } else {
        return Err(invalid());
    };
    digits.trim().parse::<u64>().map(unit).map_err(|_| invalid())
}
