//! Hardware encoder negotiation.
//!
//! Capability detection runs once, at startup, by asking the encoder to
//! produce a few frames with every hardware codec it knows. Per request the
//! negotiator then picks the preferred working codec for the container,
//! builds the device setup it needs and the scale filter in the matching
//! memory domain. When a device turns out to be missing the request falls
//! back to the software codec instead of failing.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::args::{Args, Format, LogLevel};
use super::codec::{HardwareFamily, VideoCodec};
use super::filter::{VideoFilter, scale_max};
use super::format::StreamFormat;
use super::process::Encoder;

/// Time allowed for one test encode.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Query interface over detected hardware capabilities.
pub trait HardwareProber: Send + Sync {
    /// Returns the preferred working hardware codec for `format`, if any.
    fn hw_codec_for(&self, format: StreamFormat) -> Option<VideoCodec>;

    /// Returns the device setup arguments `codec` needs before the input.
    ///
    /// `None` means the required device is unavailable and the caller must
    /// fall back to software. Codecs that need no setup return an empty list.
    fn hw_device_init_args(&self, codec: VideoCodec) -> Option<Args>;

    /// Returns the scale filter for a `width` x `height` source capped at
    /// `max_dimension`, or an empty filter when no scaling is needed.
    fn hw_scale_filter(
        &self,
        codec: VideoCodec,
        width: u32,
        height: u32,
        max_dimension: u32,
    ) -> VideoFilter {
        scale_max(width, height, max_dimension)
            .map(|dimensions| VideoFilter::scale_for(codec, dimensions))
            .unwrap_or_default()
    }
}

/// Hardware devices the encoder may be pointed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSettings {
    /// VA-API render node
    pub vaapi_device: PathBuf,
    /// CUDA device index
    pub cuda_device: u32,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vaapi_device: PathBuf::from("/dev/dri/renderD128"),
            cuda_device: 0,
        }
    }
}

impl DeviceSettings {
    /// Returns the decode-side setup for `codec`: frames are decoded into the
    /// memory of the encoder's device so the scale filter and encoder can
    /// stay there.
    pub fn device_init_args(&self, codec: VideoCodec) -> Option<Args> {
        let args = Args::new();
        match codec.hardware_family() {
            None => Some(args),
            Some(HardwareFamily::Cuda) => Some(args.extend([
                "-hwaccel".to_string(),
                "cuda".to_string(),
                "-hwaccel_output_format".to_string(),
                "cuda".to_string(),
                "-hwaccel_device".to_string(),
                self.cuda_device.to_string(),
            ])),
            Some(HardwareFamily::Vaapi) => {
                let device = self.vaapi_node()?;
                Some(args.extend([
                    "-hwaccel",
                    "vaapi",
                    "-hwaccel_output_format",
                    "vaapi",
                    "-hwaccel_device",
                    device.as_str(),
                ]))
            }
            Some(HardwareFamily::Qsv) => Some(args.extend([
                "-init_hw_device",
                "qsv=hw",
                "-filter_hw_device",
                "hw",
                "-hwaccel",
                "qsv",
                "-hwaccel_output_format",
                "qsv",
            ])),
            Some(
                HardwareFamily::Amf
                | HardwareFamily::VideoToolbox
                | HardwareFamily::V4l2
                | HardwareFamily::Omx,
            ) => Some(args),
        }
    }

    /// Returns the setup for a synthetic test encode. The test source is
    /// generated in system memory, so frames are uploaded explicitly.
    fn probe_init_args(&self, codec: VideoCodec) -> Option<(Args, VideoFilter)> {
        match codec.hardware_family() {
            Some(HardwareFamily::Vaapi) => {
                let device = self.vaapi_node()?;
                Some((
                    Args::new().arg("-vaapi_device").arg(device),
                    VideoFilter::from("format=nv12,hwupload"),
                ))
            }
            Some(HardwareFamily::Qsv) => Some((
                Args::new().extend(["-init_hw_device", "qsv=hw", "-filter_hw_device", "hw"]),
                VideoFilter::from("format=nv12,hwupload=extra_hw_frames=64,format=qsv"),
            )),
            Some(HardwareFamily::Cuda) => Some((
                Args::new()
                    .arg("-init_hw_device")
                    .arg(format!("cuda=cu:{}", self.cuda_device)),
                VideoFilter::none(),
            )),
            _ => Some((Args::new(), VideoFilter::none())),
        }
    }

    fn vaapi_node(&self) -> Option<String> {
        if self.vaapi_device.exists() {
            Some(self.vaapi_device.to_string_lossy().into_owned())
        } else {
            debug!("VA-API device {} not present", self.vaapi_device.display());
            None
        }
    }
}

/// Capabilities established by test encodes.
#[derive(Debug, Clone)]
pub struct FfmpegHardwareProber {
    supported: Vec<VideoCodec>,
    devices: DeviceSettings,
}

impl FfmpegHardwareProber {
    /// Builds a prober with a known set of working codecs.
    pub fn with_supported(supported: Vec<VideoCodec>, devices: DeviceSettings) -> Self {
        Self { supported, devices }
    }

    /// Runs a short test encode per hardware codec and keeps the ones that
    /// succeed.
    pub async fn probe(encoder: &Encoder, devices: DeviceSettings) -> Self {
        let mut supported = Vec::new();

        for codec in VideoCodec::all_hardware() {
            let Some((init, upload)) = devices.probe_init_args(codec) else {
                debug!("Skipping {}: device unavailable", codec);
                continue;
            };

            let args = Args::new()
                .hide_banner()
                .log_level(LogLevel::Quiet)
                .append(init)
                .extend(["-f", "lavfi", "-i", "color=c=black:s=1280x720:d=0.1"])
                .video_filter(&upload)
                .video_codec(codec)
                .extend(["-frames:v", "1"])
                .format(Format::Null)
                .output("-");

            match encoder.run_check(&args, PROBE_TIMEOUT).await {
                Ok(true) => {
                    info!("Hardware encoder available: {}", codec);
                    supported.push(codec);
                }
                Ok(false) => debug!("Hardware encoder unavailable: {}", codec),
                Err(e) => warn!("Probing {} failed: {}", codec, e),
            }
        }

        if supported.is_empty() {
            info!("No hardware encoders available, using software encoding");
        }
        Self { supported, devices }
    }

    /// Returns the codecs whose test encode succeeded.
    pub fn supported(&self) -> &[VideoCodec] {
        &self.supported
    }
}

impl HardwareProber for FfmpegHardwareProber {
    fn hw_codec_for(&self, format: StreamFormat) -> Option<VideoCodec> {
        let preference: &[VideoCodec] = match format {
            StreamFormat::Mp4 => &VideoCodec::MP4_HARDWARE,
            StreamFormat::Webm => &VideoCodec::WEBM_HARDWARE,
            StreamFormat::Mkv => return None,
        };
        preference
            .iter()
            .copied()
            .find(|codec| self.supported.contains(codec))
    }

    fn hw_device_init_args(&self, codec: VideoCodec) -> Option<Args> {
        self.devices.device_init_args(codec)
    }
}

/// Prober used when hardware acceleration is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct SoftwareOnlyProber;

impl HardwareProber for SoftwareOnlyProber {
    fn hw_codec_for(&self, _format: StreamFormat) -> Option<VideoCodec> {
        None
    }

    fn hw_device_init_args(&self, codec: VideoCodec) -> Option<Args> {
        (!codec.is_hardware()).then(Args::new)
    }
}

/// Returns the software codec for `format`.
pub fn software_codec(format: StreamFormat) -> VideoCodec {
    match format {
        StreamFormat::Mp4 => VideoCodec::LibX264,
        StreamFormat::Webm => VideoCodec::Vp9,
        StreamFormat::Mkv => VideoCodec::Copy,
    }
}

/// Codec, device setup and filter chosen for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    /// Encoder used for the whole stream
    pub codec: VideoCodec,
    /// Arguments placed before the input
    pub device_args: Args,
    /// Scale filter, empty when the source fits
    pub filter: VideoFilter,
}

/// Per-request codec and filter selection over a prober.
#[derive(Clone)]
pub struct HardwareNegotiator {
    prober: Arc<dyn HardwareProber>,
}

impl HardwareNegotiator {
    /// Creates a negotiator over `prober`.
    pub fn new(prober: Arc<dyn HardwareProber>) -> Self {
        Self { prober }
    }

    /// Picks the codec for `format`: the prober's hardware codec when
    /// acceleration is enabled and one exists, otherwise the software codec.
    pub fn select_codec(&self, format: StreamFormat, hardware_enabled: bool) -> VideoCodec {
        if hardware_enabled {
            if let Some(codec) = self.prober.hw_codec_for(format) {
                return codec;
            }
        }
        software_codec(format)
    }

    /// Computes the scale filter once for the chosen codec.
    pub fn compute_filter(
        &self,
        codec: VideoCodec,
        width: u32,
        height: u32,
        max_dimension: u32,
    ) -> VideoFilter {
        self.prober
            .hw_scale_filter(codec, width, height, max_dimension)
    }

    /// Selects codec, device setup and filter together.
    ///
    /// When the selected hardware codec cannot initialise its device, the
    /// software codec for the format is used instead, with no device setup.
    pub fn negotiate(
        &self,
        format: StreamFormat,
        hardware_enabled: bool,
        width: u32,
        height: u32,
        max_dimension: u32,
    ) -> Negotiation {
        let mut codec = self.select_codec(format, hardware_enabled);
        let device_args = match self.prober.hw_device_init_args(codec) {
            Some(args) => args,
            None => {
                let fallback = software_codec(format);
                warn!(
                    "Device for {} unavailable, falling back to {}",
                    codec, fallback
                );
                codec = fallback;
                Args::new()
            }
        };
        let filter = self.compute_filter(codec, width, height, max_dimension);

        Negotiation {
            codec,
            device_args,
            filter,
        }
    }
}

impl std::fmt::Debug for HardwareNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareNegotiator").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_vaapi() -> DeviceSettings {
        DeviceSettings {
            vaapi_device: PathBuf::from("/nonexistent/renderD128"),
            cuda_device: 1,
        }
    }

    fn negotiator(supported: Vec<VideoCodec>, devices: DeviceSettings) -> HardwareNegotiator {
        HardwareNegotiator::new(Arc::new(FfmpegHardwareProber::with_supported(
            supported, devices,
        )))
    }

    #[test]
    fn test_software_when_disabled() {
        let negotiator = negotiator(vec![VideoCodec::N264], missing_vaapi());
        assert_eq!(
            negotiator.select_codec(StreamFormat::Mp4, false),
            VideoCodec::LibX264
        );
        assert_eq!(
            negotiator.select_codec(StreamFormat::Webm, false),
            VideoCodec::Vp9
        );
        assert_eq!(
            negotiator.select_codec(StreamFormat::Mkv, true),
            VideoCodec::Copy
        );
    }

    #[test]
    fn test_preference_order() {
        let prober = FfmpegHardwareProber::with_supported(
            vec![VideoCodec::R264, VideoCodec::I264, VideoCodec::Vvp9, VideoCodec::Ivp9],
            missing_vaapi(),
        );
        assert_eq!(prober.hw_codec_for(StreamFormat::Mp4), Some(VideoCodec::I264));
        assert_eq!(prober.hw_codec_for(StreamFormat::Webm), Some(VideoCodec::Ivp9));
        assert_eq!(prober.hw_codec_for(StreamFormat::Mkv), None);
    }

    #[test]
    fn test_missing_device_falls_back_to_software() {
        let negotiator = negotiator(vec![VideoCodec::V264], missing_vaapi());
        let negotiation = negotiator.negotiate(StreamFormat::Mp4, true, 3840, 2160, 1080);
        assert_eq!(negotiation.codec, VideoCodec::LibX264);
        assert!(negotiation.device_args.is_empty());
        assert_eq!(negotiation.filter.as_str(), "scale=1920:1080");
    }

    #[test]
    fn test_cuda_negotiation() {
        let negotiator = negotiator(vec![VideoCodec::N264], missing_vaapi());
        let negotiation = negotiator.negotiate(StreamFormat::Mp4, true, 3840, 2160, 720);
        assert_eq!(negotiation.codec, VideoCodec::N264);
        assert_eq!(negotiation.device_args.value_of("-hwaccel"), Some("cuda"));
        assert_eq!(negotiation.device_args.value_of("-hwaccel_device"), Some("1"));
        assert_eq!(negotiation.filter.as_str(), "scale_cuda=1280:720");
    }

    #[test]
    fn test_fitting_source_has_empty_filter() {
        let negotiator = negotiator(Vec::new(), missing_vaapi());
        let negotiation = negotiator.negotiate(StreamFormat::Webm, true, 1280, 720, 1080);
        assert_eq!(negotiation.codec, VideoCodec::Vp9);
        assert!(negotiation.filter.is_empty());
    }

    #[test]
    fn test_vaapi_device_args_with_present_node() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("renderD128");
        std::fs::write(&node, b"").unwrap();
        let devices = DeviceSettings {
            vaapi_device: node.clone(),
            cuda_device: 0,
        };

        let args = devices.device_init_args(VideoCodec::Vvp9).unwrap();
        assert_eq!(args.value_of("-hwaccel"), Some("vaapi"));
        assert_eq!(args.value_of("-hwaccel_output_format"), Some("vaapi"));
        assert_eq!(
            args.value_of("-hwaccel_device"),
            Some(node.to_string_lossy().as_ref())
        );
        assert!(missing_vaapi().device_init_args(VideoCodec::V264).is_none());
    }

    #[test]
    fn test_software_prober() {
        let prober = SoftwareOnlyProber;
        assert_eq!(prober.hw_codec_for(StreamFormat::Mp4), None);
        assert_eq!(prober.hw_device_init_args(VideoCodec::LibX264), Some(Args::new()));
        assert_eq!(prober.hw_device_init_args(VideoCodec::N264), None);
    }

    #[tokio::test]
    async fn test_probe_keeps_successful_encodes() {
        // Stand-in encoder that accepts only the NVENC and VP9 QSV test encodes.
        let encoder = Encoder::new("encoder").with_wrapper([
            "sh",
            "-c",
            r#"case "$*" in *h264_nvenc*|*vp9_qsv*) exit 0 ;; *) exit 1 ;; esac"#,
        ]);
        let prober = FfmpegHardwareProber::probe(&encoder, missing_vaapi()).await;
        assert_eq!(prober.supported(), &[VideoCodec::N264, VideoCodec::Ivp9]);
    }
}
