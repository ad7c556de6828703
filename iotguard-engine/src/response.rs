//! The response sequence run for one threshold violation.
//!
//! Evidence capture is dispatched and left running on its own. Throttle and
//! notification run as a task group; each step reports its own failures as
//! audit events and a step that dies unexpectedly is recorded too.

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, instrument};

use iotguard_capture::{CaptureManager, CapturePurpose, CaptureReport};
use iotguard_core::prelude::{
    AuditLog, Device, DeviceRegistry, IpsError, IpsSettings, MacAddr, Threshold,
};
use iotguard_prevention::ThrottleController;
use iotguard_telemetry::{EventLogger, MetricsRecorder, Notifier, NotifyOutcome};

/// What a response sequence achieved.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseReport {
    pub mac: MacAddr,
    pub rate: f64,
    pub capture_started: bool,
    pub throttled: bool,
    pub notified: NotifyOutcome,
}

enum Step {
    Throttle(bool),
    Notify(NotifyOutcome),
}

#[derive(Clone)]
pub struct Responder {
    captures: CaptureManager,
    throttle: ThrottleController,
    notifier: Arc<Notifier>,
    registry: Arc<dyn DeviceRegistry>,
    audit: AuditLog,
    metrics: MetricsRecorder,
    evidence_duration: Duration,
}

impl Responder {
    pub fn new(
        captures: CaptureManager,
        throttle: ThrottleController,
        notifier: Arc<Notifier>,
        registry: Arc<dyn DeviceRegistry>,
        audit: AuditLog,
        metrics: MetricsRecorder,
        evidence_duration: Duration,
    ) -> Self {
        Self {
            captures,
            throttle,
            notifier,
            registry,
            audit,
            metrics,
            evidence_duration,
        }
    }

    /// Runs the response in the background and returns immediately.
    pub fn dispatch(
        &self,
        threshold: Threshold,
        rate: f64,
        settings: IpsSettings,
    ) -> JoinHandle<ResponseReport> {
        tokio::spawn(self.clone().respond(threshold, rate, settings))
    }

    #[instrument(level = "debug", skip_all, fields(mac = %threshold.mac, rate = rate))]
    async fn respond(self, threshold: Threshold, rate: f64, settings: IpsSettings) -> ResponseReport {
        let mac = threshold.mac.clone();
        self.audit.record(
            &mac,
            rate,
            format!("Data rate exceeded threshold ({} KB/s)", threshold.max_rate),
        );
        self.metrics.anomalies.inc();
        EventLogger::log_event(
            "anomaly_detected",
            vec![
                KeyValue::new("mac", mac.to_string()),
                KeyValue::new("rate_kbps", rate),
                KeyValue::new("max_rate_kbps", threshold.max_rate),
            ],
        )
        .await;

        let capture_started = self.start_evidence_capture(&mac, rate);

        let mut steps = JoinSet::new();
        {
            let this = self.clone();
            let threshold = threshold.clone();
            let minutes = settings.throttle_minutes;
            steps.spawn(async move {
                Step::Throttle(this.throttle_step(&threshold, minutes).await)
            });
        }
        {
            let this = self.clone();
            let threshold = threshold.clone();
            let settings = settings.clone();
            steps.spawn(async move {
                Step::Notify(this.notify_step(&threshold, rate, &settings).await)
            });
        }

        let mut report = ResponseReport {
            mac: mac.clone(),
            rate,
            capture_started,
            throttled: false,
            notified: NotifyOutcome::default(),
        };
        while let Some(joined) = steps.join_next().await {
            match joined {
                Ok(Step::Throttle(applied)) => report.throttled = applied,
                Ok(Step::Notify(outcome)) => report.notified = outcome,
                Err(e) => self
                    .audit
                    .record_failure(&mac, rate, format!("Response step aborted: {e}")),
            }
        }
        report
    }

    fn start_evidence_capture(&self, mac: &MacAddr, rate: f64) -> bool {
        match self
            .captures
            .start(mac, self.evidence_duration, CapturePurpose::Evidence)
        {
            Ok(ticket) => {
                self.metrics.captures_started.inc();
                self.supervise_capture(mac.clone(), ticket.completion);
                true
            }
            Err(IpsError::AlreadyCapturing(_)) => {
                debug!(%mac, "Capture already running, using it as evidence");
                false
            }
            Err(e) => {
                self.audit.record_failure(
                    mac,
                    rate,
                    format!("Failed to start evidence capture: {e}"),
                );
                false
            }
        }
    }

    fn supervise_capture(&self, mac: MacAddr, completion: JoinHandle<CaptureReport>) {
        let audit = self.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = completion.await {
                audit.record_failure(&mac, 0.0, format!("Evidence capture task failed: {e}"));
            }
        });
    }

    async fn throttle_step(&self, threshold: &Threshold, minutes: u32) -> bool {
        match self
            .throttle
            .apply(&threshold.mac, threshold.min_rate, minutes)
            .await
        {
            Ok(()) => {
                self.metrics.throttles_applied.inc();
                true
            }
            Err(_) => {
                // the controller has already recorded the failure
                self.metrics.throttle_failures.inc();
                false
            }
        }
    }

    async fn notify_step(&self, threshold: &Threshold, rate: f64, settings: &IpsSettings) -> NotifyOutcome {
        let device = match self.registry.device(&threshold.mac) {
            Ok(Some(device)) => device,
            Ok(None) => Device::new(threshold.mac.clone()),
            Err(e) => {
                debug!(mac = %threshold.mac, "Device lookup failed, alerting without name: {e}");
                Device::new(threshold.mac.clone())
            }
        };
        let outcome = self.notifier.notify(&device, threshold, rate, settings).await;
        if outcome.failed() > 0 {
            self.metrics
                .notification_failures
                .inc_by(outcome.failed() as f64);
        }
        outcome
    }
}
