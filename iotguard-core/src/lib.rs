//! # iotguard-core
//!
//! Domain layer shared by every IoT Guardian crate.
//!
//! ### Key Submodules:
//! - `device`: MAC addresses, device records, thresholds and live IPS settings
//! - `event`: append-only IPS audit records
//! - `registry`: collaborator contracts (device registry, event store, rate source/sink)
//! - `audit`: fault-tolerant event recording used by every response step
//! - `rates`: in-memory rate measurement table
//! - `memory`: in-memory registry and event store

pub mod audit;
pub mod device;
pub mod error;
pub mod event;
pub mod memory;
pub mod rates;
pub mod registry;

pub mod prelude {
    pub use crate::audit::AuditLog;
    pub use crate::device::*;
    pub use crate::error::*;
    pub use crate::event::IpsEvent;
    pub use crate::rates::{RateSample, RateTable};
    pub use crate::registry::*;
}

pub use error::IpsError;
