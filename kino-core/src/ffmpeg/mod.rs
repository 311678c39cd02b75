//! Encoder command construction and process management.

pub mod args;
pub mod codec;
pub mod filter;
pub mod format;
pub mod hardware;
pub mod process;

pub use args::{Args, Format, LogLevel};
pub use codec::{AudioCodec, AudioCodecStatus, HardwareFamily, VideoCodec, probe_audio_codec};
pub use filter::{ScaleDimensions, VideoFilter, scale_max};
pub use format::{StreamFormat, codec_init};
pub use hardware::{
    DeviceSettings, FfmpegHardwareProber, HardwareNegotiator, HardwareProber, Negotiation,
    SoftwareOnlyProber, software_codec,
};
pub use process::{
    Encoder, FailureReport, OutcomeHandle, ProcessError, ProcessOutcome, RunningProcess,
};
