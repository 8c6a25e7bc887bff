//! File I/O error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid audio file: {0}")]
    InvalidFile(String),

    #[error("Failed to decode audio: {0}")]
    DecodeError(String),

    #[error("Failed to encode FLAC: {0}")]
    EncodeError(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type FileResult<T> = Result<T, FileError>;
