//! Kino Core - on-demand video transcoding for HTTP streaming
//!
//! This crate turns a library video into a live MP4, WebM or Matroska byte
//! stream: it builds the encoder command line for the requested container,
//! resolution and hardware, guards source files with per-path read/write
//! locks, and supervises the encoder process for the lifetime of a request.

pub mod config;
pub mod ffmpeg;
pub mod library;
pub mod locking;
pub mod tracing_setup;
pub mod transcode;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::{KinoConfig, TranscodeConfig, TranscodeSettings};
pub use ffmpeg::{ProcessError, StreamFormat};
pub use library::{LibraryError, MediaLibrary, VideoFile, VideoFileProvider};
pub use locking::{LockContext, LockError, LockManager};
pub use transcode::{StreamManager, StreamingResolution, TranscodeError, TranscodeOptions};

/// Errors that can bubble up from any Kino subsystem.
///
/// This is the error a request handler sees before the first byte of a
/// stream is sent; later failures are only logged and counted.
#[derive(Debug, thiserror::Error)]
pub enum KinoError {
    /// Lock wait or encoder start failed
    #[error("Transcode error: {0}")]
    Transcode(#[from] TranscodeError),

    /// Unknown video or unreadable source file
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    /// Lock wait was cancelled
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Request parameters that cannot be honoured, such as an unknown resolution label
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// Server configuration is unusable
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    /// File system failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl KinoError {
    /// Returns a message suitable for showing to a client.
    pub fn user_message(&self) -> String {
        match self {
            KinoError::Transcode(TranscodeError::Process(e)) => e.to_string(),
            KinoError::Transcode(TranscodeError::Lock(_)) | KinoError::Lock(_) => {
                "Request cancelled while waiting for the file".to_string()
            }
            KinoError::Library(LibraryError::NotFound { id }) => format!("Video {id} not found"),
            KinoError::Library(_) => "Could not read video file".to_string(),
            KinoError::InvalidRequest { reason } => reason.clone(),
            KinoError::Configuration { reason } => format!("Configuration error: {reason}"),
            KinoError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error was caused by the request rather than the server.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            KinoError::Library(LibraryError::NotFound { .. }) | KinoError::InvalidRequest { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, KinoError>;
