//! Output container catalog.
//!
//! Each `StreamFormat` knows its MIME type and how to turn a codec, a filter
//! and the video-only flag into the output half of an encoder command line.
//! Argument generation is pure: identical inputs always give identical lists.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::args::{Args, Format};
use super::codec::{AudioCodec, VideoCodec};
use super::filter::VideoFilter;

/// MIME type of fragmented MP4 streams.
pub const MIME_MP4_VIDEO: &str = "video/mp4";
/// MIME type of WebM streams.
pub const MIME_WEBM_VIDEO: &str = "video/webm";
/// MIME type of Matroska streams.
pub const MIME_MKV_VIDEO: &str = "video/x-matroska";

/// Returns the quality and speed tuning for `codec`, starting with `-c:v`.
pub fn codec_init(codec: VideoCodec) -> Args {
    let args = Args::new().video_codec(codec);

    match codec {
        VideoCodec::LibX264 => args.extend([
            "-pix_fmt",
            "yuv420p",
            "-preset",
            "veryfast",
            "-crf",
            "25",
            "-sc_threshold",
            "0",
        ]),
        VideoCodec::Vp9 => args.extend([
            "-pix_fmt",
            "yuv420p",
            "-deadline",
            "realtime",
            "-cpu-used",
            "5",
            "-row-mt",
            "1",
            "-crf",
            "30",
            "-b:v",
            "0",
        ]),
        VideoCodec::N264 => args.extend(["-rc", "vbr", "-cq", "15"]),
        VideoCodec::I264 | VideoCodec::Ivp9 => {
            args.extend(["-global_quality", "20", "-preset", "faster"])
        }
        VideoCodec::V264 | VideoCodec::Vvp9 => args.extend(["-qp", "20"]),
        VideoCodec::A264 => args.extend(["-quality", "speed"]),
        VideoCodec::M264 => args.extend(["-prio_speed", "1"]),
        VideoCodec::O264 => args.extend(["-preset", "superfast", "-crf", "25"]),
        VideoCodec::R264 | VideoCodec::Copy => args,
    }
}

/// Output container a stream can be served as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StreamFormat {
    /// Fragmented MP4, re-encoded to H.264
    Mp4,
    /// WebM, re-encoded to VP9
    Webm,
    /// Matroska with the source video copied through
    Mkv,
}

impl StreamFormat {
    /// All built-in formats.
    pub const ALL: [StreamFormat; 3] = [StreamFormat::Mp4, StreamFormat::Webm, StreamFormat::Mkv];

    /// Returns the `Content-Type` of the stream.
    pub fn mime_type(self) -> &'static str {
        match self {
            StreamFormat::Mp4 => MIME_MP4_VIDEO,
            StreamFormat::Webm => MIME_WEBM_VIDEO,
            StreamFormat::Mkv => MIME_MKV_VIDEO,
        }
    }

    /// Returns the file extension used in stream URLs.
    pub fn extension(self) -> &'static str {
        match self {
            StreamFormat::Mp4 => "mp4",
            StreamFormat::Webm => "webm",
            StreamFormat::Mkv => "mkv",
        }
    }

    /// Looks a format up by MIME type.
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|format| format.mime_type() == mime_type)
    }

    /// Assembles the output arguments for this container.
    ///
    /// The list holds exactly one codec initialisation, the filter when it is
    /// non-empty, the audio handling and finally the muxer. MP4 and WebM
    /// always re-encode and keep the source audio downmixed to stereo;
    /// Matroska re-encodes audio to Opus and never applies a filter, since its
    /// video is normally copied.
    pub fn build_args(self, codec: VideoCodec, filter: &VideoFilter, video_only: bool) -> Args {
        let args = codec_init(codec);

        match self {
            StreamFormat::Mp4 => {
                let args = args
                    .extend(["-movflags", "frag_keyframe+empty_moov"])
                    .video_filter(filter);
                stereo_or_silent(args, video_only).format(Format::Mp4)
            }
            StreamFormat::Webm => {
                let args = args.video_filter(filter);
                stereo_or_silent(args, video_only).format(Format::Webm)
            }
            StreamFormat::Mkv => {
                let args = if video_only {
                    args.skip_audio()
                } else {
                    args.audio_codec(AudioCodec::LibOpus)
                        .extend(["-b:a", "96k", "-vbr", "on", "-ac", "2"])
                };
                args.format(Format::Matroska)
            }
        }
    }
}

fn stereo_or_silent(args: Args, video_only: bool) -> Args {
    if video_only {
        args.skip_audio()
    } else {
        args.extend(["-ac", "2"])
    }
}

impl fmt::Display for StreamFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for StreamFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mp4" | "video/mp4" => Ok(StreamFormat::Mp4),
            "webm" | "video/webm" => Ok(StreamFormat::Webm),
            "mkv" | "matroska" | "video/x-matroska" => Ok(StreamFormat::Mkv),
            _ => Err(format!("Unsupported stream format: {s}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_init_starts_with_codec() {
        for codec in [VideoCodec::LibX264, VideoCodec::Vp9, VideoCodec::Copy]
            .into_iter()
            .chain(VideoCodec::all_hardware())
        {
            let args = codec_init(codec);
            assert_eq!(&args.as_slice()[..2], &["-c:v", codec.as_str()]);
        }
    }

    #[test]
    fn test_software_tuning() {
        let x264 = codec_init(VideoCodec::LibX264);
        assert_eq!(x264.value_of("-preset"), Some("veryfast"));
        assert_eq!(x264.value_of("-crf"), Some("25"));
        assert_eq!(x264.value_of("-pix_fmt"), Some("yuv420p"));

        let vp9 = codec_init(VideoCodec::Vp9);
        assert_eq!(vp9.value_of("-deadline"), Some("realtime"));
        assert_eq!(vp9.value_of("-b:v"), Some("0"));

        assert_eq!(codec_init(VideoCodec::Copy).len(), 2);
    }

    #[test]
    fn test_every_format_has_one_codec_init() {
        let filter = VideoFilter::from("scale=1280:720");
        for format in StreamFormat::ALL {
            for video_only in [false, true] {
                let args = format.build_args(VideoCodec::LibX264, &filter, video_only);
                assert_eq!(args.count("-c:v"), 1, "{format} video_only={video_only}");
                assert_eq!(args.count("-f"), 1);
                assert!(args.count("-vf") <= 1);
            }
        }
    }

    #[test]
    fn test_mp4_args() {
        let args = StreamFormat::Mp4.build_args(
            VideoCodec::LibX264,
            &VideoFilter::from("scale=1920:1080"),
            false,
        );
        assert_eq!(args.value_of("-movflags"), Some("frag_keyframe+empty_moov"));
        assert_eq!(args.value_of("-vf"), Some("scale=1920:1080"));
        assert_eq!(args.value_of("-ac"), Some("2"));
        assert!(!args.contains("-an"));
        assert_eq!(args.as_slice().last().map(String::as_str), Some("mp4"));
    }

    #[test]
    fn test_webm_video_only() {
        let args = StreamFormat::Webm.build_args(VideoCodec::Vp9, &VideoFilter::none(), true);
        assert!(args.contains("-an"));
        assert!(!args.contains("-ac"));
        assert!(!args.contains("-vf"));
        assert_eq!(args.value_of("-f"), Some("webm"));
    }

    #[test]
    fn test_mkv_audio_and_no_filter() {
        let args = StreamFormat::Mkv.build_args(
            VideoCodec::Copy,
            &VideoFilter::from("scale=1280:720"),
            false,
        );
        assert_eq!(args.value_of("-c:v"), Some("copy"));
        assert_eq!(args.value_of("-c:a"), Some("libopus"));
        assert_eq!(args.value_of("-b:a"), Some("96k"));
        assert_eq!(args.value_of("-ac"), Some("2"));
        assert!(!args.contains("-vf"));
        assert_eq!(args.value_of("-f"), Some("matroska"));

        let silent = StreamFormat::Mkv.build_args(VideoCodec::Copy, &VideoFilter::none(), true);
        assert!(silent.contains("-an"));
        assert!(!silent.contains("-c:a"));
    }

    #[test]
    fn test_build_args_is_deterministic() {
        let filter = VideoFilter::from("scale_vaapi=w=1280:h=720");
        let first = StreamFormat::Mp4.build_args(VideoCodec::V264, &filter, false);
        let second = StreamFormat::Mp4.build_args(VideoCodec::V264, &filter, false);
        assert_eq!(first, second);
    }

    #[test]
    fn test_format_lookup() {
        assert_eq!("mp4".parse::<StreamFormat>(), Ok(StreamFormat::Mp4));
        assert_eq!("MKV".parse::<StreamFormat>(), Ok(StreamFormat::Mkv));
        assert!("avi".parse::<StreamFormat>().is_err());
        assert_eq!(
            StreamFormat::from_mime_type("video/webm"),
            Some(StreamFormat::Webm)
        );
        assert_eq!(StreamFormat::Mkv.mime_type(), "video/x-matroska");
    }
}
