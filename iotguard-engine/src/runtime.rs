/*!
# Runtime

Wires the store, capture manager, throttle controller, notifier and monitor
from static configuration, and provides the long-running entry points the CLI
drives: production monitoring and a manual capture.
*/

use std::sync::Arc;
use std::time::Duration;

use opentelemetry::KeyValue;
use tracing::{info, instrument, warn};

use iotguard_capture::{CaptureManager, CaptureOptions, CapturePurpose, CaptureReport, TsharkSniffer};
use iotguard_config::IotGuardConfig;
use iotguard_core::prelude::{AuditLog, MacAddr};
use iotguard_prevention::{CommandShaper, ShaperScope, ThrottleController};
use iotguard_store::SqliteStore;
use iotguard_telemetry::{EventLogger, MetricsRecorder, Notifier, SmtpChannel};

use crate::error::EngineError;
use crate::monitor::{AnomalyMonitor, MonitorSettings};
use crate::response::Responder;

/// Every long-lived component, built once per process.
pub struct Guardian {
    pub store: Arc<SqliteStore>,
    pub audit: AuditLog,
    pub captures: CaptureManager,
    pub throttle: ThrottleController,
    pub monitor: AnomalyMonitor,
    pub metrics: MetricsRecorder,
}

impl Guardian {
    pub fn from_config(config: &IotGuardConfig) -> Result<Self, EngineError> {
        let store = Arc::new(SqliteStore::open(&config.store.path)?);
        let audit = AuditLog::new(store.clone());
        let metrics = MetricsRecorder::new()?;

        let sniffer = TsharkSniffer::new(&config.capture.program, &config.capture.interface);
        let captures = CaptureManager::new(
            Arc::new(sniffer),
            store.clone(),
            audit.clone(),
            CaptureOptions {
                output_dir: config.capture.output_dir.clone(),
                stop_grace: config.capture.stop_grace(),
                deadline_slack: config.capture.deadline_slack(),
            },
        );

        let scope = if config.prevention.is_per_device() {
            ShaperScope::PerDevice
        } else {
            ShaperScope::Global
        };
        let shaper = CommandShaper::new(
            config.prevention.apply_command.clone(),
            config.prevention.remove_command.clone(),
            scope,
        )
        .with_timeout(config.prevention.command_timeout());
        let throttle = ThrottleController::new(Arc::new(shaper), audit.clone());

        let smtp = SmtpChannel::new(
            &config.notify.smtp_host,
            config.notify.smtp_port,
            &config.notify.from,
        )?;
        let notifier = Notifier::new(config.notify.subject.clone(), audit.clone())
            .with_email(Arc::new(smtp));

        let responder = Responder::new(
            captures.clone(),
            throttle.clone(),
            Arc::new(notifier),
            store.clone(),
            audit.clone(),
            metrics.clone(),
            config.monitor.evidence_capture(),
        );
        let monitor = AnomalyMonitor::new(
            store.clone(),
            store.clone(),
            responder,
            audit.clone(),
            metrics.clone(),
            MonitorSettings::from(&config.monitor),
        );

        Ok(Self {
            store,
            audit,
            captures,
            throttle,
            monitor,
            metrics,
        })
    }
}

/// Runs the anomaly monitor until Ctrl-C.
#[instrument(level = "info", name = "run_production_mode", skip_all)]
pub async fn run_production_mode(config: IotGuardConfig) -> Result<(), EngineError> {
    let guardian = Guardian::from_config(&config)?;

    let pruned = guardian.store.prune_rates(config.store.rate_retention_days)?;
    info!(pruned, "Pruned rate history older than {} days", config.store.rate_retention_days);

    guardian.monitor.start();
    EventLogger::log_event(
        "ips_started",
        vec![
            KeyValue::new("interface", config.capture.interface.clone()),
            KeyValue::new("store", config.store.path.display().to_string()),
        ],
    )
    .await;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    guardian.monitor.stop().await;

    for throttle in guardian.throttle.active() {
        warn!(mac = %throttle.mac, until = %throttle.until, "Throttle still active at shutdown, lifting");
        if let Err(e) = guardian.throttle.remove(&throttle.mac).await {
            warn!(mac = %throttle.mac, "Failed to lift throttle: {e}");
        }
    }

    info!("Metrics at shutdown:\n{}", guardian.metrics.gather_metrics()?);
    Ok(())
}

/// Captures `mac` on operator request. A zero `duration` runs until Ctrl-C.
#[instrument(level = "info", name = "run_manual_capture", skip(config))]
pub async fn run_manual_capture(
    config: IotGuardConfig,
    mac: MacAddr,
    duration: Duration,
) -> Result<CaptureReport, EngineError> {
    let guardian = Guardian::from_config(&config)?;
    let ticket = guardian
        .captures
        .start(&mac, duration, CapturePurpose::Manual)?;
    guardian.metrics.captures_started.inc();
    info!(file = %ticket.output.display(), "Capturing, press Ctrl-C to stop");

    let mut completion = ticket.completion;
    let report = tokio::select! {
        report = &mut completion => report?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            guardian.captures.stop(&mac).await?;
            completion.await?
        }
    };
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotguard_core::prelude::{DeviceRegistry, EventStore, IpsSettings};

    fn config(dir: &tempfile::TempDir) -> IotGuardConfig {
        let mut config = IotGuardConfig::default();
        config.store.path = dir.path().join("iot_guardian.db");
        config.capture.output_dir = dir.path().join("captures");
        config
    }

    #[tokio::test]
    async fn guardian_wires_sqlite_store() {
        let dir = tempfile::tempdir().unwrap();
        let guardian = Guardian::from_config(&config(&dir)).unwrap();

        assert_eq!(guardian.store.ips_config().unwrap(), IpsSettings::default());
        assert!(!guardian.monitor.is_running());

        let outcome = guardian.monitor.poll_once().await.unwrap();
        assert!(outcome.enabled);
        assert_eq!(outcome.checked, 0);
        assert!(guardian.store.recent(50).unwrap().is_empty());
    }

    #[tokio::test]
    async fn manual_capture_with_missing_sniffer_fails_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(&dir);
        config.capture.program = dir.path().join("no-such-tshark");
        let mac = MacAddr::parse("00:11:22:33:44:55").unwrap();

        let result = run_manual_capture(config, mac, Duration::from_secs(1)).await;
        assert!(matches!(
            result,
            Err(EngineError::Ips(iotguard_core::IpsError::SnifferSpawnFailure(_)))
        ));
    }
}
