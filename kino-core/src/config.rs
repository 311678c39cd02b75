//! Centralized configuration for Kino.
//!
//! All tunable parameters live here with their defaults. Every value can be
//! overridden from the environment with a `KINO_*` variable.

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::ffmpeg::{DeviceSettings, Encoder};
use crate::transcode::StreamingResolution;

/// Transcoding settings consumed by the stream manager.
pub trait TranscodeSettings: Send + Sync {
    /// Configured cap on the shorter edge of streams.
    fn max_streaming_resolution(&self) -> StreamingResolution;

    /// Whether hardware encoders may be used.
    fn hardware_acceleration_enabled(&self) -> bool;

    /// Arguments inserted before the input.
    fn extra_input_args(&self) -> Vec<String>;

    /// Arguments inserted after the container arguments.
    fn extra_output_args(&self) -> Vec<String>;
}

/// Central configuration for all Kino components.
#[derive(Debug, Clone, Default)]
pub struct KinoConfig {
    pub transcode: TranscodeConfig,
    pub server: ServerConfig,
    pub library: LibraryConfig,
}

/// Encoder binaries and transcode policy.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscodeConfig {
    /// ffmpeg binary
    pub ffmpeg_path: PathBuf,
    /// ffprobe binary
    pub ffprobe_path: PathBuf,
    /// Command the encoder is run through, e.g. `nice -n 10`
    pub encoder_wrapper: Vec<String>,
    /// Cap applied when a request does not ask for one
    pub max_streaming_resolution: StreamingResolution,
    /// Probe for and use hardware encoders
    pub hardware_acceleration: bool,
    /// Arguments placed before the input
    pub extra_input_args: Vec<String>,
    /// Arguments placed after the container arguments
    pub extra_output_args: Vec<String>,
    /// VA-API render node
    pub vaapi_device: PathBuf,
    /// CUDA device index
    pub cuda_device: u32,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        let devices = DeviceSettings::default();
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            encoder_wrapper: Vec::new(),
            max_streaming_resolution: StreamingResolution::Original,
            hardware_acceleration: false,
            extra_input_args: Vec::new(),
            extra_output_args: Vec::new(),
            vaapi_device: devices.vaapi_device,
            cuda_device: devices.cuda_device,
        }
    }
}

impl TranscodeConfig {
    /// Returns the encoder to run transcodes with.
    pub fn encoder(&self) -> Encoder {
        Encoder::new(&self.ffmpeg_path).with_wrapper(self.encoder_wrapper.iter().cloned())
    }

    /// Returns the hardware devices encoders may use.
    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            vaapi_device: self.vaapi_device.clone(),
            cuda_device: self.cuda_device,
        }
    }
}

impl TranscodeSettings for TranscodeConfig {
    fn max_streaming_resolution(&self) -> StreamingResolution {
        self.max_streaming_resolution
    }

    fn hardware_acceleration_enabled(&self) -> bool {
        self.hardware_acceleration
    }

    fn extra_input_args(&self) -> Vec<String> {
        self.extra_input_args.clone()
    }

    fn extra_output_args(&self) -> Vec<String> {
        self.extra_output_args.clone()
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address to bind
    pub host: IpAddr,
    /// Port to bind
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9999,
        }
    }
}

/// Media library location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryConfig {
    /// Directory scanned for video files
    pub root: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
        }
    }
}

impl KinoConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("KINO_FFMPEG") {
            config.transcode.ffmpeg_path = PathBuf::from(path);
        }

        if let Ok(path) = std::env::var("KINO_FFPROBE") {
            config.transcode.ffprobe_path = PathBuf::from(path);
        }

        if let Ok(label) = std::env::var("KINO_MAX_STREAMING_RESOLUTION")
            && let Ok(resolution) = label.parse()
        {
            config.transcode.max_streaming_resolution = resolution;
        }

        if let Ok(enabled) = std::env::var("KINO_HARDWARE_ACCELERATION") {
            config.transcode.hardware_acceleration = enabled.parse().unwrap_or(false);
        }

        if let Ok(args) = std::env::var("KINO_TRANSCODE_INPUT_ARGS") {
            config.transcode.extra_input_args = split_args(&args);
        }

        if let Ok(args) = std::env::var("KINO_TRANSCODE_OUTPUT_ARGS") {
            config.transcode.extra_output_args = split_args(&args);
        }

        if let Ok(wrapper) = std::env::var("KINO_ENCODER_WRAPPER") {
            config.transcode.encoder_wrapper = split_args(&wrapper);
        }

        if let Ok(device) = std::env::var("KINO_VAAPI_DEVICE") {
            config.transcode.vaapi_device = PathBuf::from(device);
        }

        if let Ok(index) = std::env::var("KINO_CUDA_DEVICE")
            && let Ok(index) = index.parse::<u32>()
        {
            config.transcode.cuda_device = index;
        }

        if let Ok(host) = std::env::var("KINO_HOST")
            && let Ok(host) = host.parse::<IpAddr>()
        {
            config.server.host = host;
        }

        if let Ok(port) = std::env::var("KINO_PORT")
            && let Ok(port) = port.parse::<u16>()
        {
            config.server.port = port;
        }

        if let Ok(root) = std::env::var("KINO_LIBRARY") {
            config.library.root = PathBuf::from(root);
        }

        config
    }

    /// Creates a configuration for tests: software encoding, no cap, an
    /// ephemeral port.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                host: IpAddr::V4(Ipv4Addr::LOCALHOST),
                port: 0,
            },
            ..Default::default()
        }
    }
}

fn split_args(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = KinoConfig::default();

        assert_eq!(config.transcode.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(
            config.transcode.max_streaming_resolution,
            StreamingResolution::Original
        );
        assert!(!config.transcode.hardware_acceleration);
        assert!(config.transcode.extra_input_args.is_empty());
        assert_eq!(
            config.transcode.vaapi_device,
            PathBuf::from("/dev/dri/renderD128")
        );
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn test_settings_trait() {
        let config = TranscodeConfig {
            max_streaming_resolution: StreamingResolution::StandardHd,
            hardware_acceleration: true,
            extra_output_args: vec!["-threads".to_string(), "2".to_string()],
            ..TranscodeConfig::default()
        };
        let settings: &dyn TranscodeSettings = &config;

        assert_eq!(settings.max_streaming_resolution().max_resolution(), 720);
        assert!(settings.hardware_acceleration_enabled());
        assert!(settings.extra_input_args().is_empty());
        assert_eq!(settings.extra_output_args(), vec!["-threads", "2"]);
    }

    #[test]
    fn test_encoder_uses_wrapper() {
        let config = TranscodeConfig {
            encoder_wrapper: vec!["nice".to_string(), "-n".to_string(), "10".to_string()],
            ..TranscodeConfig::default()
        };
        let line = config.encoder().command_line(&crate::ffmpeg::Args::new());
        assert_eq!(line, "nice -n 10 ffmpeg");
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("KINO_FFMPEG", "/opt/ffmpeg/bin/ffmpeg");
            std::env::set_var("KINO_MAX_STREAMING_RESOLUTION", "full_hd");
            std::env::set_var("KINO_HARDWARE_ACCELERATION", "true");
            std::env::set_var("KINO_TRANSCODE_INPUT_ARGS", "-re  -fflags +genpts");
            std::env::set_var("KINO_PORT", "8080");
            std::env::set_var("KINO_HOST", "not-an-address");
        }

        let config = KinoConfig::from_env();

        assert_eq!(
            config.transcode.ffmpeg_path,
            PathBuf::from("/opt/ffmpeg/bin/ffmpeg")
        );
        assert_eq!(
            config.transcode.max_streaming_resolution,
            StreamingResolution::FullHd
        );
        assert!(config.transcode.hardware_acceleration);
        assert_eq!(
            config.transcode.extra_input_args,
            vec!["-re", "-fflags", "+genpts"]
        );
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::LOCALHOST));

        // Cleanup
        unsafe {
            std::env::remove_var("KINO_FFMPEG");
            std::env::remove_var("KINO_MAX_STREAMING_RESOLUTION");
            std::env::remove_var("KINO_HARDWARE_ACCELERATION");
            std::env::remove_var("KINO_TRANSCODE_INPUT_ARGS");
            std::env::remove_var("KINO_PORT");
            std::env::remove_var("KINO_HOST");
        }
    }
}
