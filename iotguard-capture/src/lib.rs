//! iotguard‑capture
//!
//! Per-device traffic captures driven by an external sniffer process.
//! Each finished capture yields a realized data rate for the monitor.

pub mod capture;
pub mod rate;
pub mod sniffer;

pub use capture::{
    CaptureManager, CaptureOptions, CaptureOutcome, CapturePurpose, CaptureReport, CaptureTicket,
    SessionInfo,
};
pub use rate::realized_rate_kbps;
pub use sniffer::{Sniffer, TsharkSniffer};
