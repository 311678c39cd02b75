//! Source file inspection with ffprobe.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::{LibraryError, VideoFile};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Runs ffprobe against media files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfprobeProber {
    program: PathBuf,
}

impl FfprobeProber {
    /// Creates a prober using `program` as the ffprobe binary.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Probes `path` and builds its descriptor.
    ///
    /// # Errors
    ///
    /// - `LibraryError::Probe` - ffprobe could not be run or rejected the file
    /// - `LibraryError::Decode` - ffprobe output was not the expected JSON
    pub async fn probe(&self, path: &Path) -> Result<VideoFile, LibraryError> {
        debug!("Probing {}", path.display());

        let output = Command::new(&self.program)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LibraryError::Probe {
                path: path.to_path_buf(),
                reason: format!("cannot run {}: {e}", self.program.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(LibraryError::Probe {
                path: path.to_path_buf(),
                reason: if stderr.is_empty() {
                    format!("ffprobe exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        parse_probe_output(path, &output.stdout)
    }
}

/// Builds a descriptor from ffprobe's JSON report.
///
/// Dimensions come from the first video stream and the audio codec from the
/// first audio stream. A file without video is reported with zero
/// dimensions, which disables scaling.
pub fn parse_probe_output(path: &Path, json: &[u8]) -> Result<VideoFile, LibraryError> {
    let report: ProbeOutput = serde_json::from_slice(json).map_err(|source| LibraryError::Decode {
        path: path.to_path_buf(),
        source,
    })?;

    let of_type = |kind: &str| {
        report
            .streams
            .iter()
            .find(|stream| stream.codec_type.as_deref() == Some(kind))
    };

    let (width, height) = of_type("video")
        .map(|stream| (stream.width.unwrap_or(0), stream.height.unwrap_or(0)))
        .unwrap_or((0, 0));
    let audio_codec = of_type("audio").and_then(|stream| stream.codec_name.clone());
    let duration = report
        .format
        .as_ref()
        .and_then(|format| format.duration.as_deref())
        .and_then(|duration| duration.parse::<f64>().ok());

    let mut video = VideoFile::new(path, width, height);
    video.audio_codec = audio_codec;
    video.duration = duration;
    Ok(video)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ffmpeg::AudioCodecStatus;

    #[test]
    fn test_parse_video_with_audio() {
        let json = br#"{
            "streams": [
                {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 3840, "height": 2160},
                {"index": 1, "codec_type": "audio", "codec_name": "aac", "channels": 6}
            ],
            "format": {"duration": "5400.250000", "format_name": "matroska,webm"}
        }"#;

        let video = parse_probe_output(Path::new("/media/movie.mkv"), json).unwrap();
        assert_eq!(video.width, 3840);
        assert_eq!(video.height, 2160);
        assert_eq!(video.audio_codec.as_deref(), Some("aac"));
        assert_eq!(video.audio_status(), AudioCodecStatus::Aac);
        assert_eq!(video.duration, Some(5400.25));
    }

    #[test]
    fn test_parse_without_audio() {
        let json = br#"{"streams": [{"codec_type": "video", "width": 1280, "height": 720}]}"#;
        let video = parse_probe_output(Path::new("/media/clip.mp4"), json).unwrap();
        assert_eq!(video.audio_status(), AudioCodecStatus::MissingUnsupported);
        assert_eq!(video.duration, None);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let result = parse_probe_output(Path::new("/media/clip.mp4"), b"not json");
        assert!(matches!(result, Err(LibraryError::Decode { .. })));
    }

    #[tokio::test]
    async fn test_probe_reports_missing_binary() {
        let prober = FfprobeProber::new("/nonexistent/ffprobe");
        let result = prober.probe(Path::new("/media/clip.mp4")).await;
        assert!(matches!(result, Err(LibraryError::Probe { .. })));
    }
}
