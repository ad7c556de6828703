//! Contracts for the collaborators the core consumes.
//!
//! The store crate provides SQLite-backed implementations; `memory` and
//! `rates` provide in-process ones.

use chrono::{DateTime, Utc};

use crate::device::{Device, IpsSettings, MacAddr, Threshold};
use crate::error::IpsError;
use crate::event::IpsEvent;
use crate::rates::RateSample;

/// Read-only view of operator-managed devices and settings.
pub trait DeviceRegistry: Send + Sync {
    /// All threshold records. Read fresh on every poll.
    fn list_thresholds(&self) -> Result<Vec<Threshold>, IpsError>;

    /// Current IPS settings. Failures surface as `ConfigUnavailable`.
    fn ips_config(&self) -> Result<IpsSettings, IpsError>;

    fn device(&self, mac: &MacAddr) -> Result<Option<Device>, IpsError>;
}

/// Durable, append-only audit trail.
pub trait EventStore: Send + Sync {
    fn append(&self, event: &IpsEvent) -> Result<(), IpsError>;

    /// Newest-first listing, for operator tooling only.
    fn recent(&self, limit: usize) -> Result<Vec<IpsEvent>, IpsError>;
}

/// Receives realized capture rates.
pub trait RateSink: Send + Sync {
    fn record(&self, mac: &MacAddr, kbps: f64, at: DateTime<Utc>) -> Result<(), IpsError>;
}

/// Produces the latest throughput sample for a device.
pub trait RateSource: Send + Sync {
    fn latest(&self, mac: &MacAddr) -> Result<Option<RateSample>, IpsError>;
}
