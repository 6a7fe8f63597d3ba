//! Error types for avsync-player
//!
//! Lower layers return these; the reader thread is the final aggregation
//! point that decides between tearing the session down and continuing with
//! one stream closed.

use avsync_common::events::ErrorCode;
use thiserror::Error;

/// Main error type for avsync-player
#[derive(Error, Debug)]
pub enum Error {
    /// Input could not be opened or probed
    #[error("Open error: {0}")]
    Open(String),

    /// No usable audio or video stream
    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    /// Seek rejected by the demuxer
    #[error("Seek error: {0}")]
    Seek(String),

    /// Codec failure
    #[error("Decode error: {0}")]
    Decode(String),

    /// Unrecoverable read error
    #[error("Read error: {0}")]
    Io(#[from] std::io::Error),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Host notification could not be delivered
    #[error("Notification error: {0}")]
    Notification(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] avsync_common::Error),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A blocking call was released by abort/unblock
    #[error("Aborted")]
    Aborted,
}

impl Error {
    /// Host-facing error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Open(_) | Error::Config(_) => ErrorCode::OpenFailed,
            Error::StreamNotFound(_) => ErrorCode::StreamNotFound,
            Error::Seek(_) => ErrorCode::SeekFailed,
            Error::Decode(_) => ErrorCode::DecodeFailed,
            Error::Io(_) => ErrorCode::ReadFailed,
            Error::AudioOutput(_) => ErrorCode::AudioDeviceFailed,
            Error::Notification(_) => ErrorCode::NotificationFailed,
            Error::InvalidState(_) | Error::Aborted => ErrorCode::Internal,
        }
    }
}

/// Convenience Result type using avsync-player Error
pub type Result<T> = std::result::Result<T, Error>;
