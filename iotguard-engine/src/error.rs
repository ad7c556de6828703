use thiserror::Error;
use tokio::task::JoinError;

use iotguard_config::ConfigError;
use iotguard_core::IpsError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IPS error: {0}")]
    Ips(#[from] IpsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<JoinError> for EngineError {
    fn from(err: JoinError) -> Self {
        EngineError::Task(err.to_string())
    }
}
