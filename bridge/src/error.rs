use thiserror::Error;
use w100_common::ConfigError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("unknown device {0}")]
    UnknownDevice(String),
    #[error("device {0} is already bound")]
    DeviceExists(String),
    #[error("{0} is not a thermostat owned by this bridge")]
    NotOwned(String),
    #[error("communication error: {0}")]
    Communication(String),
    #[error("registry error: {0}")]
    Registry(String),
    #[error("failed to remove {} thermostat(s)", .failed.len())]
    Cleanup { failed: Vec<(String, String)> },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
