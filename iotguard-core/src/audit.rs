//! Audit trail glue.
//!
//! Every response step reports its outcome here. Recording never fails from
//! the caller's point of view: a store error is logged and swallowed so the
//! monitor keeps making progress.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::device::MacAddr;
use crate::event::IpsEvent;
use crate::registry::EventStore;

#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn EventStore>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Appends an event describing a completed action.
    pub fn record(&self, mac: &MacAddr, rate: f64, action: impl Into<String>) {
        let event = IpsEvent::now(mac.clone(), rate, action);
        info!(mac = %event.mac, rate = event.rate, "{}", event.action);
        self.append(&event);
    }

    /// Appends an event describing a failed action.
    pub fn record_failure(&self, mac: &MacAddr, rate: f64, action: impl Into<String>) {
        let event = IpsEvent::now(mac.clone(), rate, action);
        warn!(mac = %event.mac, rate = event.rate, "{}", event.action);
        self.append(&event);
    }

    fn append(&self, event: &IpsEvent) {
        if let Err(e) = self.store.append(event) {
            error!(mac = %event.mac, "Failed to persist IPS event: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IpsError;
    use crate::memory::MemoryEventStore;
    use tracing_test::traced_test;

    struct BrokenStore;

    impl EventStore for BrokenStore {
        fn append(&self, _event: &IpsEvent) -> Result<(), IpsError> {
            Err(IpsError::StoreFailure("disk full".into()))
        }

        fn recent(&self, _limit: usize) -> Result<Vec<IpsEvent>, IpsError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn records_are_appended_in_order() {
        let store = Arc::new(MemoryEventStore::new());
        let audit = AuditLog::new(store.clone());
        let mac = MacAddr::parse("00:11:22:33:44:55").unwrap();

        audit.record(&mac, 75.0, "first");
        audit.record_failure(&mac, 0.0, "second");

        let actions: Vec<_> = store.events().into_iter().map(|e| e.action).collect();
        assert_eq!(actions, ["first", "second"]);
    }

    #[traced_test]
    #[test]
    fn store_failure_is_logged_not_propagated() {
        let audit = AuditLog::new(Arc::new(BrokenStore));
        let mac = MacAddr::parse("00:11:22:33:44:55").unwrap();

        audit.record(&mac, 1.0, "Throttle removed");

        assert!(logs_contain("Failed to persist IPS event"));
    }
}
