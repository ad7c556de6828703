//! Alert delivery configuration.
//!
//! Destinations (email address, phone number) are operator data and live in
//! the IPS settings; this section only describes the outgoing relay.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct NotifyConfig {
    /// SMTP relay host.
    #[validate(length(min = 1, max = 253))]
    #[serde(default = "default_smtp_host")]
    pub smtp_host: String,

    #[validate(range(min = 1, max = 65535))]
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Sender mailbox.
    #[validate(email)]
    #[serde(default = "default_from")]
    pub from: String,

    #[validate(length(min = 1, max = 200))]
    #[serde(default = "default_subject")]
    pub subject: String,
}

fn default_smtp_host() -> String {
    "localhost".into()
}
fn default_smtp_port() -> u16 {
    25
}
fn default_from() -> String {
    "iot-guardian@localhost.localdomain".into()
}
fn default_subject() -> String {
    "IoT Guardian IPS Alert".into()
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            smtp_host: default_smtp_host(),
            smtp_port: default_smtp_port(),
            from: default_from(),
            subject: default_subject(),
        }
    }
}
