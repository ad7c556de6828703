//! # IoT Guardian Engine
//!
//! The anomaly monitor, its response sequence, and the production wiring the
//! frontends share.

pub mod error;
pub mod monitor;
pub mod response;
pub mod runtime;

#[cfg(test)]
mod testing;

pub use error::EngineError;
pub use monitor::{AnomalyMonitor, MonitorSettings, PollOutcome};
pub use response::{Responder, ResponseReport};
pub use runtime::{run_manual_capture, run_production_mode, Guardian};
