use thiserror::Error;

use crate::device::MacAddr;

/// Failures raised by the IPS core and its collaborators.
///
/// None of these are fatal to the monitor: callers convert them into audit
/// events and keep going.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum IpsError {
    #[error("capture already running for {0}")]
    AlreadyCapturing(MacAddr),

    #[error("no active capture session for {0}")]
    NoActiveSession(MacAddr),

    #[error("traffic shaper failure: {0}")]
    ShaperFailure(String),

    #[error("failed to spawn packet sniffer: {0}")]
    SnifferSpawnFailure(String),

    #[error("notification delivery failed: {0}")]
    NotificationFailure(String),

    #[error("IPS configuration unavailable: {0}")]
    ConfigUnavailable(String),

    #[error("event store failure: {0}")]
    StoreFailure(String),

    #[error("invalid MAC address: {0:?}")]
    InvalidMac(String),
}
