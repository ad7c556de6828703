//! In-memory rate measurement table.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::device::MacAddr;
use crate::error::IpsError;
use crate::registry::{RateSink, RateSource};

/// A throughput measurement in KB/s and when it was taken.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateSample {
    pub kbps: f64,
    pub taken_at: DateTime<Utc>,
}

/// Keeps the most recent sample per device.
#[derive(Debug, Default)]
pub struct RateTable {
    samples: RwLock<HashMap<MacAddr, RateSample>>,
}

impl RateTable {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateSink for RateTable {
    fn record(&self, mac: &MacAddr, kbps: f64, at: DateTime<Utc>) -> Result<(), IpsError> {
        let mut samples = self.samples.write();
        let newer = samples.get(mac).map_or(true, |prev| prev.taken_at <= at);
        if newer {
            samples.insert(mac.clone(), RateSample { kbps, taken_at: at });
        }
        Ok(())
    }
}

impl RateSource for RateTable {
    fn latest(&self, mac: &MacAddr) -> Result<Option<RateSample>, IpsError> {
        Ok(self.samples.read().get(mac).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn keeps_newest_sample() {
        let table = RateTable::new();
        let mac = MacAddr::parse("00:11:22:33:44:55").unwrap();
        let now = Utc::now();

        table.record(&mac, 12.0, now).unwrap();
        table.record(&mac, 99.0, now - Duration::seconds(30)).unwrap();

        let sample = table.latest(&mac).unwrap().unwrap();
        assert_eq!(sample.kbps, 12.0);
        assert_eq!(sample.taken_at, now);
    }

    #[test]
    fn unknown_device_has_no_sample() {
        let table = RateTable::new();
        let mac = MacAddr::parse("00:11:22:33:44:55").unwrap();
        assert!(table.latest(&mac).unwrap().is_none());
    }
}
