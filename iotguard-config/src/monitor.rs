//! Anomaly monitor cadence.
//!
//! Per-device thresholds and the enable flag are operator data held in the
//! device registry; this section only controls how often and how hard the
//! monitor looks.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Monitoring loop parameters.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct MonitorConfig {
    /// Delay between poll cycles (seconds).
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Delay after a cycle that failed as a whole (seconds).
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Length of the evidence capture taken on every anomaly (seconds).
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_evidence_capture")]
    pub evidence_capture_secs: u64,

    /// Rate samples older than this are ignored (seconds).
    #[validate(range(min = 1, max = 86400))]
    #[serde(default = "default_rate_max_age")]
    pub rate_max_age_secs: u64,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_error_backoff() -> u64 {
    10
}
fn default_evidence_capture() -> u64 {
    10
}
fn default_rate_max_age() -> u64 {
    60
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            error_backoff_secs: default_error_backoff(),
            evidence_capture_secs: default_evidence_capture(),
            rate_max_age_secs: default_rate_max_age(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn evidence_capture(&self) -> Duration {
        Duration::from_secs(self.evidence_capture_secs)
    }

    pub fn rate_max_age(&self) -> Duration {
        Duration::from_secs(self.rate_max_age_secs)
    }
}
