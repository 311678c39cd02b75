//! Stream manager service.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::stats::{StreamStats, StreamStatsSnapshot};
use super::stream::TranscodeStream;
use super::{TranscodeError, TranscodeOptions};
use crate::config::TranscodeSettings;
use crate::ffmpeg::{Args, Encoder, HardwareNegotiator, HardwareProber, LogLevel, ProcessError};
use crate::locking::{LockManager, LockSnapshot};

/// Starts and tracks transcodes.
///
/// One instance serves the whole process. It holds the configuration, the
/// hardware negotiator, the encoder to run and the lock table shared with
/// anything else that touches media files.
#[derive(Clone)]
pub struct StreamManager {
    settings: Arc<dyn TranscodeSettings>,
    negotiator: HardwareNegotiator,
    encoder: Encoder,
    locks: LockManager,
    stats: Arc<StreamStats>,
}

impl StreamManager {
    /// Creates a manager with its own lock table.
    pub fn new(
        settings: Arc<dyn TranscodeSettings>,
        prober: Arc<dyn HardwareProber>,
        encoder: Encoder,
    ) -> Self {
        Self::with_locks(settings, prober, encoder, LockManager::new())
    }

    /// Creates a manager sharing an existing lock table.
    pub fn with_locks(
        settings: Arc<dyn TranscodeSettings>,
        prober: Arc<dyn HardwareProber>,
        encoder: Encoder,
        locks: LockManager,
    ) -> Self {
        Self {
            settings,
            negotiator: HardwareNegotiator::new(prober),
            encoder,
            locks,
            stats: Arc::new(StreamStats::default()),
        }
    }

    /// Returns the lock table.
    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    /// Returns the encoder that transcodes are run with.
    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Returns the transcode counters.
    pub fn stats(&self) -> StreamStatsSnapshot {
        self.stats.snapshot()
    }

    /// Returns the current lock table view.
    pub fn lock_snapshot(&self) -> Vec<LockSnapshot> {
        self.locks.snapshot()
    }

    /// Builds the complete encoder argument list for `options`.
    ///
    /// The order is fixed: banner and log level, hardware device setup,
    /// configured input arguments, seek, input, container arguments,
    /// configured output arguments and the stdout destination.
    pub fn make_stream_args(&self, options: &TranscodeOptions) -> Args {
        let video = &options.video_file;
        let max_dimension = options
            .resolution
            .unwrap_or_else(|| self.settings.max_streaming_resolution())
            .max_resolution();

        let negotiation = self.negotiator.negotiate(
            options.format,
            self.settings.hardware_acceleration_enabled(),
            video.width,
            video.height,
            max_dimension,
        );

        let mut args = Args::new()
            .hide_banner()
            .log_level(LogLevel::Error)
            .append(negotiation.device_args)
            .extend(self.settings.extra_input_args());

        if options.start_time != 0.0 {
            args = args.seek(options.start_time);
        }

        args.input(&video.path)
            .append(options.format.build_args(
                negotiation.codec,
                &negotiation.filter,
                options.video_only(),
            ))
            .extend(self.settings.extra_output_args())
            .output("pipe:")
    }

    /// Starts streaming `options` under `request`'s cancellation.
    ///
    /// Waits while a writer holds the source file. Once this returns `Ok` the
    /// encoder is running and all later failures are reported through logs
    /// and the counters only.
    ///
    /// # Errors
    ///
    /// - `TranscodeError::Lock` - the request was cancelled while waiting for the file
    /// - `TranscodeError::Process` - the encoder could not be started
    pub async fn start_transcode(
        &self,
        options: TranscodeOptions,
        request: &CancellationToken,
    ) -> Result<TranscodeStream, TranscodeError> {
        let context = self
            .locks
            .acquire_read(request, &options.video_file.path)
            .await?;
        let args = self.make_stream_args(&options);

        let started = self.encoder.start(&context, &args).and_then(|mut process| {
            let stdout = process
                .take_stdout()
                .ok_or_else(|| ProcessError::PipeUnavailable {
                    program: self.encoder.program().to_string_lossy().into_owned(),
                    stream: "stdout",
                })?;
            Ok((stdout, process.outcome_handle()))
        });

        let (stdout, outcome) = match started {
            Ok(started) => started,
            Err(e) => {
                self.stats.record_start_failure();
                error!(
                    "Failed to start {} transcode of {}: {}",
                    options.format,
                    options.video_file.path.display(),
                    e
                );
                return Err(e.into());
            }
        };

        info!(
            "Streaming {} as {} from {}s",
            options.video_file.path.display(),
            options.format,
            options.start_time
        );
        self.stats.record_start();
        let stats = Arc::clone(&self.stats);
        let watcher = outcome.clone();
        tokio::spawn(async move {
            let outcome = watcher.wait().await;
            stats.record_exit(&outcome);
        });

        Ok(TranscodeStream::new(stdout, context, outcome))
    }
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("encoder", &self.encoder)
            .field("locks", &self.locks)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::TranscodeConfig;
    use crate::ffmpeg::{FfmpegHardwareProber, SoftwareOnlyProber, StreamFormat, VideoCodec};
    use crate::library::VideoFile;
    use crate::transcode::StreamingResolution;

    fn manager(config: TranscodeConfig, prober: Arc<dyn HardwareProber>) -> StreamManager {
        StreamManager::new(Arc::new(config), prober, Encoder::new("ffmpeg"))
    }

    fn four_k_with_audio() -> VideoFile {
        VideoFile::new("/media/movie.mkv", 3840, 2160).with_audio_codec("aac")
    }

    #[test]
    fn test_mp4_software_four_k_capped() {
        let config = TranscodeConfig {
            max_streaming_resolution: StreamingResolution::FullHd,
            hardware_acceleration: false,
            ..TranscodeConfig::default()
        };
        let manager = manager(config, Arc::new(SoftwareOnlyProber));
        let options = TranscodeOptions::new(StreamFormat::Mp4, four_k_with_audio());
        let args = manager.make_stream_args(&options);

        assert_eq!(args.value_of("-c:v"), Some("libx264"));
        assert_eq!(args.value_of("-vf"), Some("scale=1920:1080"));
        assert_eq!(args.value_of("-ac"), Some("2"));
        assert_eq!(args.value_of("-i"), Some("/media/movie.mkv"));
        assert!(!args.contains("-ss"));
        assert_eq!(&args.as_slice()[..3], &["-hide_banner", "-v", "error"]);
        assert_eq!(args.as_slice().last().map(String::as_str), Some("pipe:"));
    }

    #[test]
    fn test_mkv_video_only_copies() {
        let manager = manager(TranscodeConfig::default(), Arc::new(SoftwareOnlyProber));
        let video = VideoFile::new("/media/silent.mkv", 1920, 1080).with_audio_codec("pcm_s16le");
        let options = TranscodeOptions::new(StreamFormat::Mkv, video);
        assert!(options.video_only());

        let args = manager.make_stream_args(&options);
        assert_eq!(args.value_of("-c:v"), Some("copy"));
        assert!(args.contains("-an"));
        assert!(!args.contains("-c:a"));
        assert!(!args.contains("-ac"));
        assert_eq!(args.value_of("-f"), Some("matroska"));
    }

    #[test]
    fn test_argument_order() {
        let config = TranscodeConfig {
            extra_input_args: vec!["-re".to_string()],
            extra_output_args: vec!["-threads".to_string(), "4".to_string()],
            ..TranscodeConfig::default()
        };
        let manager = manager(config, Arc::new(SoftwareOnlyProber));
        let options = TranscodeOptions::new(StreamFormat::Webm, four_k_with_audio())
            .with_start_time(95.5)
            .with_resolution(StreamingResolution::StandardHd);
        let args = manager.make_stream_args(&options);
        let slice = args.as_slice();

        let position = |token: &str| slice.iter().position(|arg| arg == token).unwrap();
        assert!(position("-v") < position("-re"));
        assert!(position("-re") < position("-ss"));
        assert!(position("-ss") < position("-i"));
        assert!(position("-i") < position("-c:v"));
        assert!(position("-f") < position("-threads"));
        assert_eq!(args.value_of("-ss"), Some("95.5"));
        assert_eq!(args.value_of("-vf"), Some("scale=1280:720"));
        assert_eq!(slice.last().map(String::as_str), Some("pipe:"));
    }

    #[test]
    fn test_request_resolution_overrides_config() {
        let config = TranscodeConfig {
            max_streaming_resolution: StreamingResolution::Low,
            ..TranscodeConfig::default()
        };
        let manager = manager(config, Arc::new(SoftwareOnlyProber));

        let capped = TranscodeOptions::new(StreamFormat::Mp4, four_k_with_audio());
        assert_eq!(
            manager.make_stream_args(&capped).value_of("-vf"),
            Some("scale=426:240")
        );

        let original = capped.with_resolution(StreamingResolution::Original);
        assert!(!manager.make_stream_args(&original).contains("-vf"));
    }

    #[test]
    fn test_hardware_codec_brings_device_args() {
        let config = TranscodeConfig {
            hardware_acceleration: true,
            max_streaming_resolution: StreamingResolution::FullHd,
            ..TranscodeConfig::default()
        };
        let prober = FfmpegHardwareProber::with_supported(
            vec![VideoCodec::N264],
            config.device_settings(),
        );
        let manager = manager(config, Arc::new(prober));
        let args = manager.make_stream_args(&TranscodeOptions::new(
            StreamFormat::Mp4,
            four_k_with_audio(),
        ));
        let slice = args.as_slice();

        assert_eq!(args.value_of("-c:v"), Some("h264_nvenc"));
        assert_eq!(args.value_of("-hwaccel"), Some("cuda"));
        assert_eq!(args.value_of("-vf"), Some("scale_cuda=1920:1080"));
        let hwaccel = slice.iter().position(|arg| arg == "-hwaccel").unwrap();
        let input = slice.iter().position(|arg| arg == "-i").unwrap();
        assert!(hwaccel < input);
    }

    #[test]
    fn test_negative_start_time_is_ignored() {
        let options = TranscodeOptions::new(
            StreamFormat::Mp4,
            VideoFile::new(PathBuf::from("/media/a.mp4"), 0, 0),
        )
        .with_start_time(-3.0);
        assert_eq!(options.start_time, 0.0);
    }
}
