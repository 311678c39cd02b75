//! Typed vocabulary for encoder command lines.
//!
//! `Args` is an ordered list of command-line tokens. Each builder method
//! appends one flag (and its value) and returns the list, so an argument
//! sequence reads top to bottom in the order the encoder will see it.

use std::fmt;
use std::path::Path;

use super::codec::{AudioCodec, VideoCodec};
use super::filter::VideoFilter;

/// Encoder log verbosity passed with `-v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Print nothing at all
    Quiet,
    /// Only print errors
    Error,
    /// Print warnings and errors
    Warning,
    /// Standard informational output
    Info,
}

impl LogLevel {
    /// Returns the token the encoder expects for this level.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
        }
    }
}

/// Output muxer selected with `-f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// MPEG-4 Part 14
    Mp4,
    /// WebM (restricted Matroska)
    Webm,
    /// Matroska
    Matroska,
    /// Discard output, used for capability probing
    Null,
}

impl Format {
    /// Returns the muxer name.
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Mp4 => "mp4",
            Format::Webm => "webm",
            Format::Matroska => "matroska",
            Format::Null => "null",
        }
    }
}

/// Ordered encoder argument list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Args(Vec<String>);

impl Args {
    /// Creates an empty argument list.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a single raw token.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.0.push(arg.into());
        self
    }

    /// Appends raw tokens in order.
    pub fn extend<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.0.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends another argument list.
    pub fn append(mut self, other: Args) -> Self {
        self.0.extend(other.0);
        self
    }

    /// Suppresses the encoder's startup banner.
    pub fn hide_banner(self) -> Self {
        self.arg("-hide_banner")
    }

    /// Sets the log level.
    pub fn log_level(self, level: LogLevel) -> Self {
        self.arg("-v").arg(level.as_str())
    }

    /// Seeks the next input to `seconds` before decoding starts.
    pub fn seek(self, seconds: f64) -> Self {
        self.arg("-ss").arg(format_seconds(seconds))
    }

    /// Adds an input file.
    pub fn input(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.arg("-i").arg(path)
    }

    /// Selects the video codec.
    pub fn video_codec(self, codec: VideoCodec) -> Self {
        self.arg("-c:v").arg(codec.as_str())
    }

    /// Selects the audio codec.
    pub fn audio_codec(self, codec: AudioCodec) -> Self {
        self.arg("-c:a").arg(codec.as_str())
    }

    /// Applies a video filter chain. An empty filter adds nothing.
    pub fn video_filter(self, filter: &VideoFilter) -> Self {
        if filter.is_empty() {
            return self;
        }
        self.arg("-vf").arg(filter.as_str())
    }

    /// Drops the audio track from the output.
    pub fn skip_audio(self) -> Self {
        self.arg("-an")
    }

    /// Sets the output muxer.
    pub fn format(self, format: Format) -> Self {
        self.arg("-f").arg(format.as_str())
    }

    /// Adds the output destination. Use `"pipe:"` to write to stdout.
    pub fn output(self, destination: impl Into<String>) -> Self {
        self.arg(destination)
    }

    /// Returns the tokens as a slice.
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    /// Returns the number of tokens.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no tokens have been added.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns true when `flag` appears as a token.
    pub fn contains(&self, flag: &str) -> bool {
        self.0.iter().any(|arg| arg == flag)
    }

    /// Returns the token following the first occurrence of `flag`.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.0
            .iter()
            .position(|arg| arg == flag)
            .and_then(|index| self.0.get(index + 1))
            .map(String::as_str)
    }

    /// Counts occurrences of `flag`.
    pub fn count(&self, flag: &str) -> usize {
        self.0.iter().filter(|arg| *arg == flag).count()
    }

    /// Consumes the list and returns the tokens.
    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

impl fmt::Display for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" "))
    }
}

impl IntoIterator for Args {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Args {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Vec<String>> for Args {
    fn from(args: Vec<String>) -> Self {
        Self(args)
    }
}

/// Formats a seek offset without trailing zeros (`12.5`, `90`).
fn format_seconds(seconds: f64) -> String {
    let formatted = format!("{seconds:.3}");
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_preserves_order() {
        let args = Args::new()
            .hide_banner()
            .log_level(LogLevel::Error)
            .seek(12.5)
            .input("/media/movie.mkv")
            .video_codec(VideoCodec::LibX264)
            .format(Format::Mp4)
            .output("pipe:");

        assert_eq!(
            args.as_slice(),
            &[
                "-hide_banner",
                "-v",
                "error",
                "-ss",
                "12.5",
                "-i",
                "/media/movie.mkv",
                "-c:v",
                "libx264",
                "-f",
                "mp4",
                "pipe:",
            ]
        );
    }

    #[test]
    fn test_empty_filter_adds_nothing() {
        let args = Args::new().video_filter(&VideoFilter::none());
        assert!(args.is_empty());

        let args = Args::new().video_filter(&VideoFilter::from("scale=1280:720"));
        assert_eq!(args.value_of("-vf"), Some("scale=1280:720"));
    }

    #[test]
    fn test_seek_formatting() {
        assert_eq!(format_seconds(90.0), "90");
        assert_eq!(format_seconds(0.25), "0.25");
        assert_eq!(format_seconds(61.1234), "61.123");
    }

    #[test]
    fn test_lookup_helpers() {
        let args = Args::new().arg("-ac").arg("2").arg("-ac").arg("6");
        assert_eq!(args.count("-ac"), 2);
        assert_eq!(args.value_of("-ac"), Some("2"));
        assert!(!args.contains("-an"));
        assert_eq!(args.to_string(), "-ac 2 -ac 6");
    }
}
