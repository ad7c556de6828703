//! ## iotguard-telemetry::alerts
//! **Best-effort operator notification for detected anomalies**
//!
//! The `Notifier` formats a fixed alert and hands it to whichever channels
//! have a destination in the live IPS settings. Delivery problems become audit
//! events; they are never returned to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{header::ContentType, Mailbox};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use iotguard_core::prelude::{AuditLog, Device, IpsError, IpsSettings, Threshold};

const SMTP_TIMEOUT: Duration = Duration::from_secs(10);

/// A rendered alert.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertMessage {
    pub subject: String,
    pub body: String,
}

impl AlertMessage {
    pub fn anomaly(
        subject: &str,
        device: &Device,
        threshold: &Threshold,
        observed_rate: f64,
        settings: &IpsSettings,
    ) -> Self {
        let body = format!(
            "IoT Guardian Alert!\n\n\
             Device {} ({}) exceeded data rate threshold.\n\
             Current rate: {:.2} KB/s\n\
             Threshold: {} KB/s\n\
             Action taken: Throttled to {} KB/s for {} minutes.",
            device.display_name(),
            device.mac,
            observed_rate,
            threshold.max_rate,
            threshold.min_rate,
            settings.throttle_minutes,
        );
        Self {
            subject: subject.to_string(),
            body,
        }
    }
}

/// An external delivery mechanism (mail relay, SMS gateway).
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn send(&self, destination: &str, message: &AlertMessage) -> Result<(), IpsError>;
}

/// Mail delivery through an SMTP relay.
pub struct SmtpChannel {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpChannel {
    /// Plain SMTP to a local relay, as a stock MTA on `localhost:25` expects.
    pub fn new(host: &str, port: u16, from: &str) -> Result<Self, IpsError> {
        let from = from
            .parse::<Mailbox>()
            .map_err(|e| IpsError::NotificationFailure(format!("invalid sender {from}: {e}")))?;
        let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
            .port(port)
            .timeout(Some(SMTP_TIMEOUT))
            .build();
        Ok(Self { transport, from })
    }
}

#[async_trait]
impl NotificationChannel for SmtpChannel {
    fn kind(&self) -> &'static str {
        "email"
    }

    async fn send(&self, destination: &str, message: &AlertMessage) -> Result<(), IpsError> {
        let to = destination.parse::<Mailbox>().map_err(|e| {
            IpsError::NotificationFailure(format!("invalid recipient {destination}: {e}"))
        })?;
        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(message.subject.clone())
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| IpsError::NotificationFailure(e.to_string()))?;

        self.transport
            .send(email)
            .await
            .map_err(|e| IpsError::NotificationFailure(e.to_string()))?;
        Ok(())
    }
}

/// How a single `notify` call went.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct NotifyOutcome {
    pub attempted: usize,
    pub delivered: usize,
}

impl NotifyOutcome {
    pub fn failed(&self) -> usize {
        self.attempted - self.delivered
    }
}

pub struct Notifier {
    email: Option<Arc<dyn NotificationChannel>>,
    sms: Option<Arc<dyn NotificationChannel>>,
    subject: String,
    audit: AuditLog,
}

impl Notifier {
    pub fn new(subject: impl Into<String>, audit: AuditLog) -> Self {
        Self {
            email: None,
            sms: None,
            subject: subject.into(),
            audit,
        }
    }

    pub fn with_email(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.email = Some(channel);
        self
    }

    pub fn with_sms(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.sms = Some(channel);
        self
    }

    /// Sends the anomaly alert to every configured destination.
    ///
    /// No destination is a no-op, not a failure.
    pub async fn notify(
        &self,
        device: &Device,
        threshold: &Threshold,
        observed_rate: f64,
        settings: &IpsSettings,
    ) -> NotifyOutcome {
        let message =
            AlertMessage::anomaly(&self.subject, device, threshold, observed_rate, settings);
        let mut outcome = NotifyOutcome::default();

        let routes = [
            (settings.email(), self.email.as_ref()),
            (settings.phone(), self.sms.as_ref()),
        ];
        for (destination, channel) in routes {
            let Some(destination) = destination else {
                continue;
            };
            let Some(channel) = channel else {
                debug!(mac = %device.mac, "No channel wired for {destination}, skipping");
                continue;
            };

            outcome.attempted += 1;
            match channel.send(destination, &message).await {
                Ok(()) => {
                    outcome.delivered += 1;
                    info!(mac = %device.mac, "Alert sent via {} to {destination}", channel.kind());
                }
                Err(e) => self.audit.record_failure(
                    &device.mac,
                    observed_rate,
                    format!("Failed to send {} notification: {e}", channel.kind()),
                ),
            }
        }

        if outcome.attempted == 0 {
            debug!(mac = %device.mac, "No notification destination configured");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iotguard_core::memory::MemoryEventStore;
    use iotguard_core::prelude::MacAddr;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        sent: Mutex<Vec<(String, AlertMessage)>>,
        fail: bool,
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
            if self.fail {
                return Err(IpsError::NotificationFailure("relay refused".into()));
            }
            Ok(())
        }
    }

    fn fixture() -> (Device, Threshold) {
        let mac = MacAddr::parse("00:11:22:33:44:55").unwrap();
        let mut device = Device::new(mac.clone());
        device.name = Some("Thermostat".into());
        (device, Threshold::new(mac, 50.0, 5.0))
    }

    fn settings(email: Option<&str>) -> IpsSettings {
        IpsSettings {
            notification_email: email.map(String::from),
            ..IpsSettings::default()
        }
    }

    #[test]
    fn alert_template() {
        let (device, threshold) = fixture();
        let msg = AlertMessage::anomaly("Subject", &device, &threshold, 75.0, &settings(None));
        assert_eq!(
            msg.body,
            "IoT Guardian Alert!\n\n\
             Device Thermostat (00:11:22:33:44:55) exceeded data rate threshold.\n\
             Current rate: 75.00 KB/s\n\
             Threshold: 50 KB/s\n\
             Action taken: Throttled to 5 KB/s for 5 minutes."
        );
    }

    #[tokio::test]
    async fn no_destination_means_no_attempt() {
        let store = Arc::new(MemoryEventStore::new());
        let channel = Arc::new(RecordingChannel::default());
        let notifier =
            Notifier::new("s", AuditLog::new(store.clone())).with_email(channel.clone());
        let (device, threshold) = fixture();

        let outcome = notifier
            .notify(&device, &threshold, 75.0, &settings(Some("   ")))
            .await;

        assert_eq!(outcome, NotifyOutcome::default());
        assert!(channel.sent.lock().is_empty());
        assert!(store.events().is_empty());
    }

    #[tokio::test]
    async fn delivers_to_configured_email() {
        let store = Arc::new(MemoryEventStore::new());
        let channel = Arc::new(RecordingChannel::default());
        let notifier =
            Notifier::new("s", AuditLog::new(store.clone())).with_email(channel.clone());
        let (device, threshold) = fixture();

        let outcome = notifier
            .notify(&device, &threshold, 75.0, &settings(Some("ops@example.com")))
            .await;

        assert_eq!(outcome.delivered, 1);
        assert_eq!(channel.sent.lock()[0].0, "ops@example.com");
    }

    #[tokio::test]
    async fn delivery_failure_becomes_event() {
        let store = Arc::new(MemoryEventStore::new());
        let channel = Arc::new(RecordingChannel {
            fail: true,
            ..RecordingChannel::default()
        });
        let notifier = Notifier::new("s", AuditLog::new(store.clone())).with_email(channel);
        let (device, threshold) = fixture();

        let outcome = notifier
            .notify(&device, &threshold, 75.0, &settings(Some("ops@example.com")))
            .await;

        assert_eq!(outcome.failed(), 1);
        let events = store.events();
        assert_eq!(events.len(), 1);
        assert!(events[0].action.contains("relay refused"));
    }

    #[tokio::test]
    async fn phone_without_sms_channel_is_skipped() {
        let store = Arc::new(MemoryEventStore::new());
        let notifier = Notifier::new("s", AuditLog::new(store.clone()));
        let (device, threshold) = fixture();
        let settings = IpsSettings {
            notification_phone: Some("+4670000000".into()),
            ..IpsSettings::default()
        };

        let outcome = notifier.notify(&device, &threshold, 75.0, &settings).await;

        assert_eq!(outcome.attempted, 0);
        assert!(store.events().is_empty());
    }

    #[test]
    fn smtp_channel_rejects_bad_sender() {
        assert!(matches!(
            SmtpChannel::new("localhost", 25, "not an address"),
            Err(IpsError::NotificationFailure(_))
        ));
    }
}
