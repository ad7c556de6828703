//! In-process registry and event store.
//!
//! Used when no database is configured and throughout the test suites.

use std::collections::HashMap;

use parking_lot::{Mutex, RwLock};

use crate::device::{Device, IpsSettings, MacAddr, Threshold};
use crate::error::IpsError;
use crate::event::IpsEvent;
use crate::registry::{DeviceRegistry, EventStore};

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    thresholds: RwLock<Vec<Threshold>>,
    settings: RwLock<Option<IpsSettings>>,
    devices: RwLock<HashMap<MacAddr, Device>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces the threshold record for `threshold.mac`.
    pub fn set_threshold(&self, threshold: Threshold) {
        let mut thresholds = self.thresholds.write();
        match thresholds.iter_mut().find(|t| t.mac == threshold.mac) {
            Some(existing) => *existing = threshold,
            None => thresholds.push(threshold),
        }
    }

    pub fn remove_threshold(&self, mac: &MacAddr) {
        self.thresholds.write().retain(|t| t.mac != *mac);
    }

    pub fn set_settings(&self, settings: IpsSettings) {
        *self.settings.write() = Some(settings);
    }

    /// Makes subsequent `ips_config` calls fail, as a broken database would.
    pub fn clear_settings(&self) {
        *self.settings.write() = None;
    }

    pub fn save_device(&self, device: Device) {
        self.devices.write().insert(device.mac.clone(), device);
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn list_thresholds(&self) -> Result<Vec<Threshold>, IpsError> {
        Ok(self.thresholds.read().clone())
    }

    fn ips_config(&self) -> Result<IpsSettings, IpsError> {
        self.settings
            .read()
            .clone()
            .ok_or_else(|| IpsError::ConfigUnavailable("no IPS settings stored".into()))
    }

    fn device(&self, mac: &MacAddr) -> Result<Option<Device>, IpsError> {
        Ok(self.devices.read().get(mac).cloned())
    }
}

#[derive(Debug, Default)]
pub struct MemoryEventStore {
    events: Mutex<Vec<IpsEvent>>,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot in append order.
    pub fn events(&self) -> Vec<IpsEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, mac: &MacAddr) -> Vec<IpsEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| &e.mac == mac)
            .cloned()
            .collect()
    }
}

impl EventStore for MemoryEventStore {
    fn append(&self, event: &IpsEvent) -> Result<(), IpsError> {
        self.events.lock().push(event.clone());
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<IpsEvent>, IpsError> {
        Ok(self.events.lock().iter().rev().take(limit).cloned().collect())
    }
}
