//! Video and audio codec vocabulary.

use std::fmt;

use serde::Serialize;

/// Video encoder selected for a stream.
///
/// Chosen once per request by the hardware negotiator and never revised
/// while the stream is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum VideoCodec {
    /// Software H.264 (`libx264`)
    LibX264,
    /// Software VP9 (`libvpx-vp9`)
    Vp9,
    /// Pass the source video through untouched
    Copy,
    /// NVIDIA NVENC H.264
    N264,
    /// Intel Quick Sync H.264
    I264,
    /// AMD AMF H.264
    A264,
    /// macOS VideoToolbox H.264
    M264,
    /// VA-API H.264
    V264,
    /// Video4Linux2 mem2mem H.264
    R264,
    /// OpenMAX H.264
    O264,
    /// Intel Quick Sync VP9
    Ivp9,
    /// VA-API VP9
    Vvp9,
}

/// Hardware vendor family of an encoder.
///
/// Scaling for hardware encoders has to happen in the family's memory
/// domain, so filters and device setup are keyed on this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareFamily {
    /// NVIDIA CUDA / NVENC
    Cuda,
    /// Intel Quick Sync
    Qsv,
    /// VA-API (Intel and AMD on Linux)
    Vaapi,
    /// AMD AMF
    Amf,
    /// Apple VideoToolbox
    VideoToolbox,
    /// Video4Linux2 mem2mem
    V4l2,
    /// OpenMAX
    Omx,
}

impl VideoCodec {
    /// Hardware H.264 encoders that can feed an MP4 stream, in preference order.
    pub const MP4_HARDWARE: [VideoCodec; 7] = [
        VideoCodec::N264,
        VideoCodec::I264,
        VideoCodec::V264,
        VideoCodec::A264,
        VideoCodec::M264,
        VideoCodec::O264,
        VideoCodec::R264,
    ];

    /// Hardware VP9 encoders that can feed a WebM stream, in preference order.
    pub const WEBM_HARDWARE: [VideoCodec; 2] = [VideoCodec::Ivp9, VideoCodec::Vvp9];

    /// Returns the encoder name passed to `-c:v`.
    pub fn as_str(self) -> &'static str {
        match self {
            VideoCodec::LibX264 => "libx264",
            VideoCodec::Vp9 => "libvpx-vp9",
            VideoCodec::Copy => "copy",
            VideoCodec::N264 => "h264_nvenc",
            VideoCodec::I264 => "h264_qsv",
            VideoCodec::A264 => "h264_amf",
            VideoCodec::M264 => "h264_videotoolbox",
            VideoCodec::V264 => "h264_vaapi",
            VideoCodec::R264 => "h264_v4l2m2m",
            VideoCodec::O264 => "h264_omx",
            VideoCodec::Ivp9 => "vp9_qsv",
            VideoCodec::Vvp9 => "vp9_vaapi",
        }
    }

    /// Returns the hardware family, or `None` for software encoders and copy.
    pub fn hardware_family(self) -> Option<HardwareFamily> {
        match self {
            VideoCodec::LibX264 | VideoCodec::Vp9 | VideoCodec::Copy => None,
            VideoCodec::N264 => Some(HardwareFamily::Cuda),
            VideoCodec::I264 | VideoCodec::Ivp9 => Some(HardwareFamily::Qsv),
            VideoCodec::V264 | VideoCodec::Vvp9 => Some(HardwareFamily::Vaapi),
            VideoCodec::A264 => Some(HardwareFamily::Amf),
            VideoCodec::M264 => Some(HardwareFamily::VideoToolbox),
            VideoCodec::R264 => Some(HardwareFamily::V4l2),
            VideoCodec::O264 => Some(HardwareFamily::Omx),
        }
    }

    /// Returns true for hardware encoders.
    pub fn is_hardware(self) -> bool {
        self.hardware_family().is_some()
    }

    /// Returns every hardware encoder the negotiator knows about.
    pub fn all_hardware() -> impl Iterator<Item = VideoCodec> {
        Self::MP4_HARDWARE
            .into_iter()
            .chain(Self::WEBM_HARDWARE)
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audio encoder selected for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioCodec {
    /// Advanced Audio Coding
    Aac,
    /// Opus via libopus
    LibOpus,
    /// Pass the source audio through untouched
    Copy,
}

impl AudioCodec {
    /// Returns the encoder name passed to `-c:a`.
    pub fn as_str(self) -> &'static str {
        match self {
            AudioCodec::Aac => "aac",
            AudioCodec::LibOpus => "libopus",
            AudioCodec::Copy => "copy",
        }
    }
}

/// Playback support for a source file's audio track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AudioCodecStatus {
    /// AAC audio
    Aac,
    /// MP3 audio
    Mp3,
    /// Opus audio
    Opus,
    /// Vorbis audio
    Vorbis,
    /// No audio track, or one the stream formats do not carry
    MissingUnsupported,
}

/// Classifies a probed audio codec name.
///
/// Anything outside the supported set is treated as missing, which makes
/// the stream video-only.
pub fn probe_audio_codec(codec_name: &str) -> AudioCodecStatus {
    match codec_name.trim().to_ascii_lowercase().as_str() {
        "aac" => AudioCodecStatus::Aac,
        "mp3" => AudioCodecStatus::Mp3,
        "opus" => AudioCodecStatus::Opus,
        "vorbis" => AudioCodecStatus::Vorbis,
        _ => AudioCodecStatus::MissingUnsupported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_software_codecs_have_no_family() {
        assert!(!VideoCodec::LibX264.is_hardware());
        assert!(!VideoCodec::Vp9.is_hardware());
        assert!(!VideoCodec::Copy.is_hardware());
    }

    #[test]
    fn test_hardware_families() {
        assert_eq!(
            VideoCodec::N264.hardware_family(),
            Some(HardwareFamily::Cuda)
        );
        assert_eq!(
            VideoCodec::Vvp9.hardware_family(),
            Some(HardwareFamily::Vaapi)
        );
        assert_eq!(
            VideoCodec::Ivp9.hardware_family(),
            Some(HardwareFamily::Qsv)
        );
        assert!(VideoCodec::all_hardware().all(VideoCodec::is_hardware));
        assert_eq!(VideoCodec::all_hardware().count(), 9);
    }

    #[test]
    fn test_probe_audio_codec() {
        assert_eq!(probe_audio_codec("aac"), AudioCodecStatus::Aac);
        assert_eq!(probe_audio_codec("MP3"), AudioCodecStatus::Mp3);
        assert_eq!(probe_audio_codec("opus"), AudioCodecStatus::Opus);
        assert_eq!(probe_audio_codec("vorbis"), AudioCodecStatus::Vorbis);
        assert_eq!(probe_audio_codec(""), AudioCodecStatus::MissingUnsupported);
        assert_eq!(
            probe_audio_codec("dts"),
            AudioCodecStatus::MissingUnsupported
        );
    }
}
