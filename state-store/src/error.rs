use thiserror::Error;

/// Errors raised while building a store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("at least one device must be configured")]
    NoDevices,

    #[error("device {0} is configured more than once")]
    DuplicateDevice(String),

    #[error("device id must not be blank")]
    BlankDevice,
}

pub type Result<T> = std::result::Result<T, StoreError>;
