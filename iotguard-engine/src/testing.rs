//! In-process collaborators for monitor and runtime tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::process::Command;

use iotguard_capture::{CaptureManager, CaptureOptions, Sniffer};
use iotguard_core::memory::{MemoryEventStore, MemoryRegistry};
use iotguard_core::prelude::{
    AuditLog, IpsError, MacAddr, RateSample, RateSource, RateTable,
};
use iotguard_prevention::{ShaperScope, ThrottleController, TrafficShaper};
use iotguard_telemetry::{AlertMessage, MetricsRecorder, NotificationChannel, Notifier};

use crate::monitor::{AnomalyMonitor, MonitorSettings};
use crate::response::Responder;

/// Writes an empty artifact and exits. Remembers every request.
#[derive(Default)]
pub struct InstantSniffer {
    requests: Mutex<Vec<(MacAddr, Option<Duration>, PathBuf)>>,
}

impl InstantSniffer {
    pub fn requests(&self) -> Vec<(MacAddr, Option<Duration>, PathBuf)> {
        self.requests.lock().clone()
    }
}

impl Sniffer for InstantSniffer {
    fn command(&self, mac: &MacAddr, duration: Option<Duration>, output: &Path) -> Command {
        self.requests
            .lock()
            .push((mac.clone(), duration, output.to_path_buf()));
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(r#": > "$0""#).arg(output);
        cmd
    }
}

pub struct FakeShaper {
    fail: bool,
    applied: Mutex<Vec<(String, f64)>>,
}

impl FakeShaper {
    pub fn new(fail: bool) -> Self {
        Self {
            fail,
            applied: Mutex::new(Vec::new()),
        }
    }

    pub fn applied(&self) -> Vec<(String, f64)> {
        self.applied.lock().clone()
    }
}

#[async_trait]
impl TrafficShaper for FakeShaper {
    fn scope(&self) -> ShaperScope {
        ShaperScope::Global
    }

    async fn apply(&self, mac: &MacAddr, rate_kbps: f64) -> Result<(), IpsError> {
        if self.fail {
            return Err(IpsError::ShaperFailure("dnctl: operation not permitted".into()));
        }
        self.applied.lock().push((mac.to_string(), rate_kbps));
        Ok(())
    }

    async fn remove(&self, _mac: &MacAddr) -> Result<(), IpsError> {
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<(String, AlertMessage)>>,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<(String, AlertMessage)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    fn kind(&self) -> &'static str {
        "email"
    }

    async fn send(&self, destination: &str, message: &AlertMessage) -> Result<(), IpsError> {
        self.sent
            .lock()
            .push((destination.to_string(), message.clone()));
        Ok(())
    }
}

/// Fails for one device, reports a fresh fixed rate for every other one.
pub struct FlakyRates {
    broken: MacAddr,
    kbps: f64,
}

impl FlakyRates {
    pub fn failing_for(broken: MacAddr, kbps: f64) -> Self {
        Self { broken, kbps }
    }
}

impl RateSource for FlakyRates {
    fn latest(&self, mac: &MacAddr) -> Result<Option<RateSample>, IpsError> {
        if *mac == self.broken {
            return Err(IpsError::StoreFailure("database is locked".into()));
        }
        Ok(Some(RateSample {
            kbps: self.kbps,
            taken_at: Utc::now(),
        }))
    }
}

pub struct Harness {
    pub registry: Arc<MemoryRegistry>,
    /// Feeds the monitor.
    pub rates: Arc<RateTable>,
    /// Receives rates from evidence captures.
    pub captured: Arc<RateTable>,
    pub store: Arc<MemoryEventStore>,
    pub sniffer: Arc<InstantSniffer>,
    pub shaper: Arc<FakeShaper>,
    pub channel: Arc<RecordingChannel>,
    pub captures: CaptureManager,
    pub throttle: ThrottleController,
    pub metrics: MetricsRecorder,
    pub monitor: AnomalyMonitor,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None, false)
    }

    pub fn with_failing_shaper() -> Self {
        Self::build(None, true)
    }

    pub fn with_rates(rates: Arc<dyn RateSource>) -> Self {
        Self::build(Some(rates), false)
    }

    fn build(source: Option<Arc<dyn RateSource>>, fail_shaper: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(MemoryRegistry::new());
        let rates = Arc::new(RateTable::new());
        let captured = Arc::new(RateTable::new());
        let store = Arc::new(MemoryEventStore::new());
        let audit = AuditLog::new(store.clone());
        let metrics = MetricsRecorder::new().unwrap();

        let sniffer = Arc::new(InstantSniffer::default());
        let captures = CaptureManager::new(
            sniffer.clone(),
            captured.clone(),
            audit.clone(),
            CaptureOptions {
                output_dir: dir.path().to_path_buf(),
                ..CaptureOptions::default()
            },
        );
        let shaper = Arc::new(FakeShaper::new(fail_shaper));
        let throttle = ThrottleController::new(shaper.clone(), audit.clone());
        let channel = Arc::new(RecordingChannel::default());
        let notifier = Notifier::new("IoT Guardian IPS Alert", audit.clone())
            .with_email(channel.clone());

        let responder = Responder::new(
            captures.clone(),
            throttle.clone(),
            Arc::new(notifier),
            registry.clone(),
            audit.clone(),
            metrics.clone(),
            Duration::from_secs(10),
        );
        let monitor = AnomalyMonitor::new(
            registry.clone(),
            source.unwrap_or_else(|| rates.clone() as Arc<dyn RateSource>),
            responder,
            audit,
            metrics.clone(),
            MonitorSettings::default(),
        );

        Self {
            registry,
            rates,
            captured,
            store,
            sniffer,
            shaper,
            channel,
            captures,
            throttle,
            metrics,
            monitor,
            _dir: dir,
        }
    }

    pub fn actions(&self) -> Vec<String> {
        self.store.events().into_iter().map(|e| e.action).collect()
    }

    /// Waits until every evidence capture has been released.
    pub async fn wait_for_captures(&self) {
        for _ in 0..500 {
            if self.captures.active_sessions().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("captures still running");
    }
}
