//! CLI command implementations

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Subcommand;
use kino_core::config::KinoConfig;
use kino_core::ffmpeg::{FfmpegHardwareProber, HardwareProber, SoftwareOnlyProber, StreamFormat};
use kino_core::library::{FfprobeProber, VideoFile};
use kino_core::transcode::{StreamManager, StreamingResolution, TranscodeOptions};
use kino_web::{run_server, shutdown_on_ctrl_c};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the streaming server
    Server {
        /// Address to bind to
        #[arg(long)]
        host: Option<IpAddr>,
        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory containing the video library
        #[arg(short, long)]
        library: Option<PathBuf>,
    },
    /// Print the encoder arguments for a file without running the encoder
    Args {
        /// Source video file
        file: PathBuf,
        /// Output container: mp4, webm or mkv
        #[arg(short, long, default_value = "mp4")]
        format: StreamFormat,
        /// Resolution cap label, e.g. FULL_HD
        #[arg(short, long)]
        resolution: Option<StreamingResolution>,
        /// Seek offset in seconds
        #[arg(short, long, default_value_t = 0.0)]
        start: f64,
        /// Source width; skips probing together with --height
        #[arg(long, requires = "height")]
        width: Option<u32>,
        /// Source height
        #[arg(long, requires = "width")]
        height: Option<u32>,
        /// Source audio codec when not probing, e.g. aac
        #[arg(long)]
        audio_codec: Option<String>,
    },
    /// Detect which hardware encoders work on this machine
    Probe,
}

/// Handle the CLI command
///
/// # Errors
/// Returns the error of the command that failed
pub async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let config = KinoConfig::from_env();

    match command {
        Commands::Server {
            host,
            port,
            library,
        } => start_server(config, host, port, library).await,
        Commands::Args {
            file,
            format,
            resolution,
            start,
            width,
            height,
            audio_codec,
        } => {
            let source = match (width, height) {
                (Some(width), Some(height)) => {
                    let video = VideoFile::new(&file, width, height);
                    match audio_codec {
                        Some(codec) => video.with_audio_codec(codec),
                        None => video,
                    }
                }
                _ => FfprobeProber::new(&config.transcode.ffprobe_path)
                    .probe(&file)
                    .await
                    .with_context(|| format!("probing {}", file.display()))?,
            };
            print_args(config, source, format, resolution, start).await
        }
        Commands::Probe => probe_hardware(config).await,
    }
}

/// Run the HTTP server until Ctrl-C
///
/// # Errors
/// - Library scan or listener bind failed
pub async fn start_server(
    mut config: KinoConfig,
    host: Option<IpAddr>,
    port: Option<u16>,
    library: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(library) = library {
        config.library.root = library;
    }

    let shutdown = CancellationToken::new();
    shutdown_on_ctrl_c(shutdown.clone());
    run_server(config, shutdown).await.context("server failed")?;
    Ok(())
}

/// Print the encoder command line a stream request would run
pub async fn print_args(
    config: KinoConfig,
    source: VideoFile,
    format: StreamFormat,
    resolution: Option<StreamingResolution>,
    start: f64,
) -> anyhow::Result<()> {
    let encoder = config.transcode.encoder();
    let prober = hardware_prober(&config).await;
    let manager = StreamManager::new(Arc::new(config.transcode.clone()), prober, encoder);

    let mut options = TranscodeOptions::new(format, source).with_start_time(start);
    if let Some(resolution) = resolution {
        options = options.with_resolution(resolution);
    }

    let args = manager.make_stream_args(&options);
    println!("{}", manager.encoder().command_line(&args));
    Ok(())
}

/// Report hardware encoder support
pub async fn probe_hardware(config: KinoConfig) -> anyhow::Result<()> {
    debug!("Probing hardware encoders with {}", config.transcode.ffmpeg_path.display());
    let prober =
        FfmpegHardwareProber::probe(&config.transcode.encoder(), config.transcode.device_settings())
            .await;

    if prober.supported().is_empty() {
        println!("No hardware encoders available; streams use software encoding.");
    } else {
        println!("Working hardware encoders:");
        for codec in prober.supported() {
            println!("  {codec}");
        }
    }

    for format in StreamFormat::ALL {
        match prober.hw_codec_for(format) {
            Some(codec) => println!("{format}: {codec}"),
            None => println!("{format}: software"),
        }
    }
    Ok(())
}

async fn hardware_prober(config: &KinoConfig) -> Arc<dyn HardwareProber> {
    if config.transcode.hardware_acceleration {
        Arc::new(
            FfmpegHardwareProber::probe(
                &config.transcode.encoder(),
                config.transcode.device_settings(),
            )
            .await,
        )
    } else {
        Arc::new(SoftwareOnlyProber)
    }
}
