//! Persistent store location and retention.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct StoreConfig {
    /// SQLite database file.
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Days of rate history kept by `prune`.
    #[validate(range(min = 1, max = 3650))]
    #[serde(default = "default_retention")]
    pub rate_retention_days: u32,
}

fn default_path() -> PathBuf {
    "iot_guardian.db".into()
}

fn default_retention() -> u32 {
    30
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            rate_retention_days: default_retention(),
        }
    }
}
