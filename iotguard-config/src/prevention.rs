//! Prevention system configuration.
//!
//! The traffic shaper is driven through two argv templates. `{rate}` expands
//! to the limit in KB/s and `{mac}` to the device address.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Traffic shaper configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct PreventionConfig {
    /// `global` when the shaper limits all traffic at once, `per_device` when
    /// the templates install device-scoped rules.
    #[validate(custom(function = validation::validate_scope))]
    #[serde(default = "default_scope")]
    pub scope: String,

    /// Command installing the limit.
    #[validate(custom(function = validation::validate_apply_command))]
    #[serde(default = "default_apply_command")]
    pub apply_command: Vec<String>,

    /// Command clearing the limit.
    #[validate(custom(function = validation::validate_command))]
    #[serde(default = "default_remove_command")]
    pub remove_command: Vec<String>,

    /// Seconds a shaper command may run before it is killed.
    #[validate(range(min = 1, max = 600))]
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_scope() -> String {
    "global".into()
}

fn default_apply_command() -> Vec<String> {
    ["sudo", "dnctl", "pipe", "config", "1", "bw={rate}KByte/s"]
        .map(String::from)
        .to_vec()
}

fn default_remove_command() -> Vec<String> {
    ["sudo", "dnctl", "-q", "flush"].map(String::from).to_vec()
}

fn default_command_timeout_secs() -> u64 {
    30
}

impl Default for PreventionConfig {
    fn default() -> Self {
        Self {
            scope: default_scope(),
            apply_command: default_apply_command(),
            remove_command: default_remove_command(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

impl PreventionConfig {
    pub fn is_per_device(&self) -> bool {
        self.scope == "per_device"
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
