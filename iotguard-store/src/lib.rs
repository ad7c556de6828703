//! # IoT Guardian Store
//!
//! SQLite persistence for devices, thresholds, IPS settings, the audit trail
//! and per-device rate history.

pub mod sqlite;

pub use sqlite::SqliteStore;
