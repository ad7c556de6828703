//! Append-only IPS audit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::device::MacAddr;

/// One monitoring or response action. Never mutated once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpsEvent {
    pub mac: MacAddr,
    pub timestamp: DateTime<Utc>,
    /// Observed rate in KB/s, `0.0` for events that are not about a rate.
    pub rate: f64,
    pub action: String,
}

impl IpsEvent {
    pub fn now(mac: MacAddr, rate: f64, action: impl Into<String>) -> Self {
        Self {
            mac,
            timestamp: Utc::now(),
            rate,
            action: action.into(),
        }
    }
}
