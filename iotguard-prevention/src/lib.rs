//! # IoT Guardian Prevention
//!
//! Temporary per-device rate limits backed by an external traffic shaper,
//! each with a single auto-expiry timer.

pub mod shaper;
pub mod throttle;

pub use shaper::{CommandShaper, ShaperError, ShaperScope, TrafficShaper};
pub use throttle::{ThrottleController, ThrottleInfo};
