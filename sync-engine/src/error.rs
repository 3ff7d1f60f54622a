use fleet_upstream::FetchError;
use state_store::StoreError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or starting the engine
///
/// Failures inside the running loops never surface here; they are logged and
/// the affected device or subscriber is skipped.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    #[error("upstream client error: {0}")]
    Upstream(#[from] FetchError),

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("engine already started")]
    AlreadyStarted,
}

pub type Result<T> = std::result::Result<T, EngineError>;
