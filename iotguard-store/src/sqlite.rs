use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use iotguard_core::device::{DEFAULT_MAX_RATE, DEFAULT_MIN_RATE, DEFAULT_THROTTLE_MINUTES};
use iotguard_core::prelude::{
    Device, DeviceRegistry, EventStore, IpsError, IpsEvent, IpsSettings, MacAddr, RateSample,
    RateSink, RateSource, Threshold,
};

/// SQLite-backed registry, audit trail and rate history.
///
/// One connection guarded by a mutex; every call is a short statement.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn failure(what: &str, e: rusqlite::Error) -> IpsError {
    IpsError::StoreFailure(format!("failed {what}: {e}"))
}

fn parse_mac(raw: String) -> rusqlite::Result<MacAddr> {
    MacAddr::parse(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, IpsError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                IpsError::StoreFailure(format!(
                    "failed creating store directory {}: {e}",
                    parent.display()
                ))
            })?;
        }
        let conn = Connection::open(path)
            .map_err(|e| failure(&format!("opening sqlite store {}", path.display()), e))?;
        info!(path = %path.display(), "Opened IoT Guardian store");
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, IpsError> {
        let conn = Connection::open_in_memory().map_err(|e| failure("opening sqlite store", e))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, IpsError> {
        conn.execute_batch(&format!(
            "
            CREATE TABLE IF NOT EXISTS devices (
                mac TEXT PRIMARY KEY,
                name TEXT,
                ipv4 TEXT,
                vendor TEXT,
                description TEXT,
                last_seen TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            CREATE TABLE IF NOT EXISTS device_thresholds (
                mac TEXT PRIMARY KEY,
                max_data_rate REAL DEFAULT {DEFAULT_MAX_RATE:?},
                min_data_rate REAL DEFAULT {DEFAULT_MIN_RATE:?}
            );
            CREATE TABLE IF NOT EXISTS ips_config (
                id INTEGER PRIMARY KEY,
                enabled BOOLEAN DEFAULT 1,
                throttle_minutes INTEGER DEFAULT {DEFAULT_THROTTLE_MINUTES},
                notification_email TEXT,
                notification_phone TEXT
            );
            CREATE TABLE IF NOT EXISTS ips_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mac TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                detected_rate REAL NOT NULL,
                action_taken TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_ips_events_timestamp ON ips_events(timestamp DESC);
            CREATE TABLE IF NOT EXISTS device_data_rates (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                mac TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                data_rate REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_device_data_rates_mac ON device_data_rates(mac, timestamp);
            INSERT OR IGNORE INTO ips_config (id, enabled, throttle_minutes)
                VALUES (1, 1, {DEFAULT_THROTTLE_MINUTES});
            "
        ))
        .map_err(|e| failure("initializing sqlite schema", e))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Inserts or replaces the threshold record for `threshold.mac`.
    pub fn set_threshold(&self, threshold: &Threshold) -> Result<(), IpsError> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO device_thresholds (mac, max_data_rate, min_data_rate)
                 VALUES (?1, ?2, ?3)",
                params![threshold.mac.as_str(), threshold.max_rate, threshold.min_rate],
            )
            .map_err(|e| failure("saving threshold", e))?;
        Ok(())
    }

    pub fn update_ips_config(&self, settings: &IpsSettings) -> Result<(), IpsError> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO ips_config
                     (id, enabled, throttle_minutes, notification_email, notification_phone)
                 VALUES (1, ?1, ?2, ?3, ?4)",
                params![
                    settings.enabled,
                    settings.throttle_minutes,
                    settings.notification_email,
                    settings.notification_phone
                ],
            )
            .map_err(|e| failure("saving IPS configuration", e))?;
        Ok(())
    }

    pub fn save_device(&self, device: &Device) -> Result<(), IpsError> {
        self.conn
            .lock()
            .execute(
                "INSERT OR REPLACE INTO devices (mac, name, ipv4, vendor, description)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    device.mac.as_str(),
                    device.name,
                    device.ipv4.map(|ip| ip.to_string()),
                    device.vendor,
                    device.description
                ],
            )
            .map_err(|e| failure("saving device", e))?;
        Ok(())
    }

    pub fn list_devices(&self) -> Result<Vec<Device>, IpsError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT mac, name, ipv4, vendor, description FROM devices
                 ORDER BY last_seen DESC, mac",
            )
            .map_err(|e| failure("preparing device listing", e))?;
        let rows = stmt
            .query_map([], device_from_row)
            .map_err(|e| failure("listing devices", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| failure("reading device rows", e))
    }

    /// Samples for `mac` from the last `days` days, oldest first.
    pub fn history(&self, mac: &MacAddr, days: u32) -> Result<Vec<RateSample>, IpsError> {
        let since = Utc::now() - Duration::days(i64::from(days));
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT data_rate, timestamp FROM device_data_rates
                 WHERE mac = ?1 AND timestamp >= ?2
                 ORDER BY timestamp, id",
            )
            .map_err(|e| failure("preparing rate history", e))?;
        let rows = stmt
            .query_map(params![mac.as_str(), since], sample_from_row)
            .map_err(|e| failure("querying rate history", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| failure("reading rate history", e))
    }

    /// Deletes rate samples older than `retention_days`. Returns the number removed.
    pub fn prune_rates(&self, retention_days: u32) -> Result<usize, IpsError> {
        let cutoff: DateTime<Utc> = Utc::now() - Duration::days(i64::from(retention_days));
        let removed = self
            .conn
            .lock()
            .execute(
                "DELETE FROM device_data_rates WHERE timestamp < ?1",
                params![cutoff],
            )
            .map_err(|e| failure("pruning rate history", e))?;
        debug!(removed, retention_days, "Pruned rate history");
        Ok(removed)
    }
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    let mut device = Device::new(parse_mac(row.get(0)?)?);
    device.name = row.get(1)?;
    device.ipv4 = row
        .get::<_, Option<String>>(2)?
        .and_then(|ip| ip.parse().ok());
    device.vendor = row.get(3)?;
    device.description = row.get(4)?;
    Ok(device)
}

fn sample_from_row(row: &Row<'_>) -> rusqlite::Result<RateSample> {
    Ok(RateSample {
        kbps: row.get(0)?,
        taken_at: row.get(1)?,
    })
}

impl DeviceRegistry for SqliteStore {
    fn list_thresholds(&self) -> Result<Vec<Threshold>, IpsError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT mac,
                        COALESCE(max_data_rate, {DEFAULT_MAX_RATE:?}),
                        COALESCE(min_data_rate, {DEFAULT_MIN_RATE:?})
                 FROM device_thresholds ORDER BY mac"
            ))
            .map_err(|e| failure("preparing threshold listing", e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(Threshold::new(
                    parse_mac(row.get(0)?)?,
                    row.get(1)?,
                    row.get(2)?,
                ))
            })
            .map_err(|e| failure("listing thresholds", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| failure("reading threshold rows", e))
    }

    fn ips_config(&self) -> Result<IpsSettings, IpsError> {
        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT enabled, throttle_minutes, notification_email, notification_phone
                 FROM ips_config WHERE id = 1",
                [],
                |row| {
                    Ok(IpsSettings {
                        enabled: row.get::<_, Option<bool>>(0)?.unwrap_or(true),
                        throttle_minutes: row
                            .get::<_, Option<u32>>(1)?
                            .unwrap_or(DEFAULT_THROTTLE_MINUTES),
                        notification_email: row.get(2)?,
                        notification_phone: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(|e| IpsError::ConfigUnavailable(e.to_string()))?;
        Ok(row.unwrap_or_default())
    }

    fn device(&self, mac: &MacAddr) -> Result<Option<Device>, IpsError> {
        self.conn
            .lock()
            .query_row(
                "SELECT mac, name, ipv4, vendor, description FROM devices WHERE mac = ?1",
                params![mac.as_str()],
                device_from_row,
            )
            .optional()
            .map_err(|e| failure("reading device", e))
    }
}

impl EventStore for SqliteStore {
    fn append(&self, event: &IpsEvent) -> Result<(), IpsError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO ips_events (mac, timestamp, detected_rate, action_taken)
                 VALUES (?1, ?2, ?3, ?4)",
                params![event.mac.as_str(), event.timestamp, event.rate, event.action],
            )
            .map_err(|e| failure("inserting IPS event", e))?;
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<IpsEvent>, IpsError> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(
                "SELECT mac, timestamp, detected_rate, action_taken FROM ips_events
                 ORDER BY timestamp DESC, id DESC LIMIT ?1",
            )
            .map_err(|e| failure("preparing event listing", e))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(IpsEvent {
                    mac: parse_mac(row.get(0)?)?,
                    timestamp: row.get(1)?,
                    rate: row.get(2)?,
                    action: row.get(3)?,
                })
            })
            .map_err(|e| failure("listing IPS events", e))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| failure("reading IPS event rows", e))
    }
}

impl RateSink for SqliteStore {
    fn record(&self, mac: &MacAddr, kbps: f64, at: DateTime<Utc>) -> Result<(), IpsError> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO device_data_rates (mac, timestamp, data_rate) VALUES (?1, ?2, ?3)",
                params![mac.as_str(), at, kbps],
            )
            .map_err(|e| failure("recording data rate", e))?;
        Ok(())
    }
}

impl RateSource for SqliteStore {
    fn latest(&self, mac: &MacAddr) -> Result<Option<RateSample>, IpsError> {
        self.conn
            .lock()
            .query_row(
                "SELECT data_rate, timestamp FROM device_data_rates
                 WHERE mac = ?1 ORDER BY timestamp DESC, id DESC LIMIT 1",
                params![mac.as_str()],
                sample_from_row,
            )
            .optional()
            .map_err(|e| failure("reading latest data rate", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn mac(last: u8) -> MacAddr {
        MacAddr::parse(&format!("00:11:22:33:44:{last:02x}")).unwrap()
    }

    #[test]
    fn fresh_store_has_default_settings_and_no_thresholds() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.ips_config().unwrap(), IpsSettings::default());
        assert!(store.list_thresholds().unwrap().is_empty());
    }

    #[test]
    fn threshold_upsert_keeps_one_record_per_device() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set_threshold(&Threshold::new(mac(1), 50.0, 5.0)).unwrap();
        store.set_threshold(&Threshold::new(mac(1), 80.0, 8.0)).unwrap();
        store.set_threshold(&Threshold::with_defaults(mac(2))).unwrap();

        let thresholds = store.list_thresholds().unwrap();
        assert_eq!(
            thresholds,
            vec![
                Threshold::new(mac(1), 80.0, 8.0),
                Threshold::new(mac(2), 100.0, 10.0)
            ]
        );
    }

    #[test]
    fn null_rates_fall_back_to_defaults() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO device_thresholds (mac, max_data_rate, min_data_rate) VALUES (?1, NULL, NULL)",
                params![mac(3).as_str()],
            )
            .unwrap();
        assert_eq!(
            store.list_thresholds().unwrap(),
            vec![Threshold::with_defaults(mac(3))]
        );
    }

    #[test]
    fn settings_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let settings = IpsSettings {
            enabled: false,
            throttle_minutes: 15,
            notification_email: Some("ops@example.com".into()),
            notification_phone: None,
        };
        store.update_ips_config(&settings).unwrap();
        assert_eq!(store.ips_config().unwrap(), settings);
    }

    #[test]
    fn events_are_listed_newest_first() {
        let store = SqliteStore::open_in_memory().unwrap();
        let base = Utc::now();
        for (i, action) in ["first", "second", "third"].into_iter().enumerate() {
            store
                .append(&IpsEvent {
                    mac: mac(1),
                    timestamp: base + Duration::seconds(i as i64),
                    rate: i as f64,
                    action: action.into(),
                })
                .unwrap();
        }

        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, "third");
        assert_eq!(recent[1].action, "second");
        assert_eq!(recent[0].mac, mac(1));
    }

    #[test]
    fn device_lookup() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.device(&mac(1)).unwrap(), None);

        let mut device = Device::new(mac(1));
        device.name = Some("Camera".into());
        device.ipv4 = Some(Ipv4Addr::new(192, 168, 2, 10));
        store.save_device(&device).unwrap();

        assert_eq!(store.device(&mac(1)).unwrap(), Some(device.clone()));
        assert_eq!(store.list_devices().unwrap(), vec![device]);
    }

    #[test]
    fn latest_rate_and_history() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.record(&mac(1), 5.0, now - Duration::days(10)).unwrap();
        store.record(&mac(1), 7.0, now - Duration::seconds(30)).unwrap();
        store.record(&mac(1), 9.0, now).unwrap();
        store.record(&mac(2), 1.0, now).unwrap();

        let latest = store.latest(&mac(1)).unwrap().unwrap();
        assert_eq!(latest.kbps, 9.0);
        assert_eq!(latest.taken_at, now);
        assert_eq!(store.latest(&mac(9)).unwrap(), None);

        let week: Vec<f64> = store
            .history(&mac(1), 7)
            .unwrap()
            .into_iter()
            .map(|s| s.kbps)
            .collect();
        assert_eq!(week, vec![7.0, 9.0]);
    }

    #[test]
    fn prune_drops_only_expired_samples() {
        let store = SqliteStore::open_in_memory().unwrap();
        let now = Utc::now();
        store.record(&mac(1), 5.0, now - Duration::days(45)).unwrap();
        store.record(&mac(1), 6.0, now - Duration::days(31)).unwrap();
        store.record(&mac(1), 7.0, now - Duration::days(2)).unwrap();

        assert_eq!(store.prune_rates(30).unwrap(), 2);
        assert_eq!(store.history(&mac(1), 365).unwrap().len(), 1);
    }

    #[test]
    fn open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("iot_guardian.db");
        let store = SqliteStore::open(&path).unwrap();
        store.set_threshold(&Threshold::with_defaults(mac(1))).unwrap();
        drop(store);

        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.list_thresholds().unwrap().len(), 1);
    }
}
