//! Backend error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("No audio device found")]
    NoDevice,

    #[error("Device error: {0}")]
    DeviceError(String),

    #[error("Audio server unavailable: {0}")]
    ServerUnavailable(String),
}

pub type BackendResult<T> = Result<T, BackendError>;
