//! ## iotguard-engine::monitor
//! **Periodic threshold checks driving the response sequence**
//!
//! One background task polls the registry on a fixed interval. A cycle that
//! fails as a whole (settings or thresholds unreadable) widens the next wait
//! to the error backoff; a failure for one device is recorded and the cycle
//! moves on to the next device.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use iotguard_config::MonitorConfig;
use iotguard_core::prelude::{AuditLog, DeviceRegistry, IpsError, MacAddr, RateSource};
use iotguard_telemetry::{EventLogger, MetricsRecorder};

use crate::response::{Responder, ResponseReport};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    /// Samples older than this count as no sample.
    pub rate_max_age: Duration,
}

impl From<&MonitorConfig> for MonitorSettings {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            error_backoff: config.error_backoff(),
            rate_max_age: config.rate_max_age(),
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

/// Result of one poll cycle.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// False when IPS was disabled and no device was looked at.
    pub enabled: bool,
    pub checked: usize,
    pub responses: Vec<JoinHandle<ResponseReport>>,
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Inner {
    registry: Arc<dyn DeviceRegistry>,
    rates: Arc<dyn RateSource>,
    responder: Responder,
    audit: AuditLog,
    metrics: MetricsRecorder,
    settings: MonitorSettings,
    /// Timestamp of the last sample evaluated per device.
    evaluated: Mutex<HashMap<MacAddr, DateTime<Utc>>>,
    running: Mutex<Option<Running>>,
}

#[derive(Clone)]
pub struct AnomalyMonitor {
    inner: Arc<Inner>,
}

impl AnomalyMonitor {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        rates: Arc<dyn RateSource>,
        responder: Responder,
        audit: AuditLog,
        metrics: MetricsRecorder,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                rates,
                responder,
                audit,
                metrics,
                settings,
                evaluated: Mutex::new(HashMap::new()),
                running: Mutex::new(None),
            }),
        }
    }

    /// Spawns the poll loop. Returns false if it was already running.
    pub fn start(&self) -> bool {
        let mut running = self.inner.running.lock();
        if running.is_some() {
            debug!("Monitor already running");
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run(cancel.clone()));
        *running = Some(Running { cancel, handle });
        info!(interval = ?self.inner.settings.poll_interval, "IPS monitor started");
        true
    }

    /// Signals the loop and waits until it has returned. Responses already
    /// dispatched keep running.
    pub async fn stop(&self) {
        let Some(Running { cancel, handle }) = self.inner.running.lock().take() else {
            return;
        };
        cancel.cancel();
        if let Err(e) = handle.await {
            error!("Monitor loop ended abnormally: {e}");
        }
        info!("IPS monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.lock().is_some()
    }

    #[instrument(level = "info", name = "ips_monitor", skip_all)]
    async fn run(self, cancel: CancellationToken) {
        EventLogger::log_event(
            "monitor_started",
            vec![KeyValue::new(
                "poll_interval_secs",
                self.inner.settings.poll_interval.as_secs() as i64,
            )],
        )
        .await;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            let pause = match self.poll_once().await {
                Ok(outcome) => {
                    if !outcome.responses.is_empty() {
                        debug!(responses = outcome.responses.len(), "Responses dispatched");
                    }
                    self.inner.settings.poll_interval
                }
                Err(e) => {
                    self.inner.metrics.poll_errors.inc();
                    warn!("IPS monitoring error: {e}");
                    self.inner.settings.error_backoff
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = sleep(pause) => {}
            }
        }

        EventLogger::log_event("monitor_stopped", Vec::new()).await;
    }

    /// Runs a single cycle. Responses are dispatched, not awaited.
    pub async fn poll_once(&self) -> Result<PollOutcome, IpsError> {
        let started = Instant::now();
        let settings = self.inner.registry.ips_config()?;
        if !settings.enabled {
            debug!("IPS disabled, skipping device checks");
            return Ok(PollOutcome::default());
        }

        let thresholds = self.inner.registry.list_thresholds()?;
        let watched: HashSet<MacAddr> = thresholds.iter().map(|t| t.mac.clone()).collect();
        let mut outcome = PollOutcome {
            enabled: true,
            ..PollOutcome::default()
        };
        for threshold in thresholds {
            outcome.checked += 1;
            let rate = match self.fresh_rate(&threshold.mac) {
                Ok(Some(rate)) => rate,
                Ok(None) => continue,
                Err(e) => {
                    self.inner.audit.record_failure(
                        &threshold.mac,
                        0.0,
                        format!("Failed to read data rate: {e}"),
                    );
                    continue;
                }
            };

            if threshold.is_exceeded_by(rate) {
                let response = self
                    .inner
                    .responder
                    .dispatch(threshold, rate, settings.clone());
                outcome.responses.push(response);
            }
        }

        // forget devices whose threshold was deleted
        self.inner
            .evaluated
            .lock()
            .retain(|mac, _| watched.contains(mac));

        self.inner.metrics.polls.inc();
        self.inner
            .metrics
            .poll_duration
            .observe(started.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// Latest sample for `mac` if it is recent and has not been evaluated yet.
    fn fresh_rate(&self, mac: &MacAddr) -> Result<Option<f64>, IpsError> {
        let Some(sample) = self.inner.rates.latest(mac)? else {
            return Ok(None);
        };

        let stale = (Utc::now() - sample.taken_at)
            .to_std()
            .map_or(false, |age| age > self.inner.settings.rate_max_age);
        if stale {
            debug!(%mac, taken_at = %sample.taken_at, "Ignoring stale rate sample");
            return Ok(None);
        }

        let mut evaluated = self.inner.evaluated.lock();
        if evaluated
            .get(mac)
            .is_some_and(|seen| *seen >= sample.taken_at)
        {
            return Ok(None);
        }
        evaluated.insert(mac.clone(), sample.taken_at);
        Ok(Some(sample.kbps))
    }
}
