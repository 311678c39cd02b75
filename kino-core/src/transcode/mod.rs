//! On-demand transcoding of library files into live HTTP streams.
//!
//! The [`StreamManager`] is the one service the HTTP layer talks to. For each
//! request it takes a read lock on the source file, negotiates codec and
//! filter, assembles the encoder command line and starts the encoder. The
//! resulting [`TranscodeStream`] carries the lock and the process with it.

pub mod manager;
pub mod resolution;
pub mod stats;
pub mod stream;

pub use manager::StreamManager;
pub use resolution::StreamingResolution;
pub use stats::{StreamStats, StreamStatsSnapshot};
pub use stream::TranscodeStream;
use thiserror::Error;

use crate::ffmpeg::{AudioCodecStatus, ProcessError, StreamFormat};
use crate::library::VideoFile;
use crate::locking::LockError;

/// Per-request transcode parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeOptions {
    /// Output container
    pub format: StreamFormat,
    /// Source file
    pub video_file: VideoFile,
    /// Resolution cap requested by the client; the configured cap applies
    /// when absent
    pub resolution: Option<StreamingResolution>,
    /// Seek offset in seconds
    pub start_time: f64,
}

impl TranscodeOptions {
    /// Creates options for streaming `video_file` from the start.
    pub fn new(format: StreamFormat, video_file: VideoFile) -> Self {
        Self {
            format,
            video_file,
            resolution: None,
            start_time: 0.0,
        }
    }

    /// Sets the requested resolution cap.
    pub fn with_resolution(mut self, resolution: StreamingResolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    /// Sets the seek offset. Negative and non-finite values start from zero.
    pub fn with_start_time(mut self, seconds: f64) -> Self {
        self.start_time = if seconds.is_finite() && seconds > 0.0 {
            seconds
        } else {
            0.0
        };
        self
    }

    /// Returns true when the output carries no audio track.
    pub fn video_only(&self) -> bool {
        self.video_file.audio_status() == AudioCodecStatus::MissingUnsupported
    }
}

/// Errors that stop a transcode before any bytes are streamed.
#[derive(Debug, Error)]
pub enum TranscodeError {
    /// The read lock on the source could not be acquired.
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// The encoder could not be started.
    #[error("Encoder error: {0}")]
    Process(#[from] ProcessError),
}
