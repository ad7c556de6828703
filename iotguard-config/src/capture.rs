//! Packet sniffer configuration.
//!
//! Captures are taken by an external sniffer process (tshark by default)
//! writing pcap artifacts into `output_dir`.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Packet capture configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct CaptureConfig {
    /// Sniffer executable.
    #[serde(default = "default_program")]
    pub program: PathBuf,

    /// Interface the sniffer listens on.
    #[validate(custom(function = validation::validate_interface))]
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Directory receiving capture artifacts.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// How long an explicit stop waits for the sniffer to exit (milliseconds).
    #[validate(range(min = 100, max = 60000))]
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,

    /// Extra time granted past the requested duration before the sniffer is
    /// terminated by force (seconds).
    #[validate(range(min = 1, max = 600))]
    #[serde(default = "default_deadline_slack")]
    pub deadline_slack_secs: u64,
}

fn default_program() -> PathBuf {
    "tshark".into()
}

fn default_interface() -> String {
    "bridge100".into()
}

fn default_output_dir() -> PathBuf {
    "captures".into()
}

fn default_stop_grace() -> u64 {
    3000
}

fn default_deadline_slack() -> u64 {
    5
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            interface: default_interface(),
            output_dir: default_output_dir(),
            stop_grace_ms: default_stop_grace(),
            deadline_slack_secs: default_deadline_slack(),
        }
    }
}

impl CaptureConfig {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn deadline_slack(&self) -> Duration {
        Duration::from_secs(self.deadline_slack_secs)
    }
}
