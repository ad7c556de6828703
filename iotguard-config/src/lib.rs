//! # IoT Guardian Configuration System
//!
//! Static configuration for the IPS daemon and its tooling.
//!
//! ## Features
//! - **Unified Configuration**: one document covering monitor cadence, capture,
//!   prevention, alert delivery, storage and telemetry
//! - **Validation**: every section is checked with `validator` before use
//! - **Environment Awareness**: per-environment overlays and `IOTGUARD_*` overrides
//!
//! Operator-edited settings (thresholds, enable flag, throttle duration,
//! notification destinations) are NOT configured here: they live in the device
//! registry and are re-read on every poll cycle.

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod capture;
mod error;
mod monitor;
mod notify;
mod prevention;
mod store;
mod telemetry;
mod validation;

pub use capture::CaptureConfig;
pub use error::ConfigError;
pub use monitor::MonitorConfig;
pub use notify::NotifyConfig;
pub use prevention::PreventionConfig;
pub use store::StoreConfig;
pub use telemetry::TelemetryConfig;

const BASE_FILE: &str = "config/iotguard.yaml";
const ENV_PREFIX: &str = "IOTGUARD_";

/// Top‑level configuration container for all IoT Guardian components.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone)]
pub struct IotGuardConfig {
    /// Poll cadence and evidence capture length.
    #[validate(nested)]
    #[serde(default)]
    pub monitor: MonitorConfig,

    /// Packet sniffer parameters.
    #[validate(nested)]
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Traffic shaper commands.
    #[validate(nested)]
    #[serde(default)]
    pub prevention: PreventionConfig,

    /// Alert relay.
    #[validate(nested)]
    #[serde(default)]
    pub notify: NotifyConfig,

    /// Database location and retention.
    #[validate(nested)]
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging parameters.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl IotGuardConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/iotguard.yaml` - Base settings. If missing, defaults are used.
    /// 3. `config/<IOTGUARD_ENV>.yaml` - Environment‑specific overrides.
    /// 4. `IOTGUARD_*` environment variables (`__` separates sections).
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(IotGuardConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        }

        let env = std::env::var("IOTGUARD_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract(figment)
    }

    /// Load configuration from a specific path, still honouring environment overrides.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment = Figment::from(Serialized::defaults(IotGuardConfig::default()))
            .merge(Yaml::file(path));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}
