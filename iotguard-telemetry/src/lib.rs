//! # IoT Guardian Telemetry
//!
//! Crate for logging, metrics, and alerting functionalities.

pub mod alerts;
pub mod logging;
pub mod metrics;

pub use alerts::{AlertMessage, NotificationChannel, Notifier, NotifyOutcome, SmtpChannel};
pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
