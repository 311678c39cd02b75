//! HTTP server for Kino
//!
//! Wires the library, the stream manager and the router together and runs
//! the listener until the shutdown token is cancelled.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::routing::get;
use kino_core::config::KinoConfig;
use kino_core::ffmpeg::{FfmpegHardwareProber, HardwareProber, SoftwareOnlyProber};
use kino_core::library::{FfprobeProber, LibraryError, MediaLibrary, VideoFileProvider};
use kino_core::transcode::StreamManager;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::handlers::{api_health, api_library, api_streams, stream_mkv, stream_mp4, stream_webm};

/// Errors that stop the server from starting or serving.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The library directory could not be scanned.
    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    /// The listener could not be bound or failed while serving.
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Starts and tracks transcodes
    pub streams: StreamManager,
    /// Resolves video ids to source files
    pub library: Arc<dyn VideoFileProvider>,
    /// Cancelled on shutdown; parent of every stream's lock
    pub shutdown: CancellationToken,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    /// Creates state with a fresh shutdown token.
    pub fn new(streams: StreamManager, library: Arc<dyn VideoFileProvider>) -> Self {
        Self {
            streams,
            library,
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }
}

/// Builds the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/scene/{id}/stream.mp4", get(stream_mp4))
        .route("/scene/{id}/stream.webm", get(stream_webm))
        .route("/scene/{id}/stream.mkv", get(stream_mkv))
        .route("/api/library", get(api_library))
        .route("/api/streams", get(api_streams))
        .route("/api/health", get(api_health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Scans the library, detects hardware encoders and serves until `shutdown`
/// is cancelled.
///
/// Cancelling `shutdown` also cancels every running stream, so open
/// responses end and the server can drain.
///
/// # Errors
///
/// - `ServerError::Library` - the library directory could not be scanned
/// - `ServerError::Io` - the listener could not be bound
pub async fn run_server(config: KinoConfig, shutdown: CancellationToken) -> Result<(), ServerError> {
    let library = MediaLibrary::new(FfprobeProber::new(&config.transcode.ffprobe_path));
    library.scan(&config.library.root).await?;

    let encoder = config.transcode.encoder();
    let prober: Arc<dyn HardwareProber> = if config.transcode.hardware_acceleration {
        Arc::new(
            FfmpegHardwareProber::probe(&encoder, config.transcode.device_settings()).await,
        )
    } else {
        Arc::new(SoftwareOnlyProber)
    };

    let streams = StreamManager::new(Arc::new(config.transcode.clone()), prober, encoder);
    let state = AppState {
        shutdown: shutdown.clone(),
        ..AppState::new(streams, Arc::new(library))
    };
    let app = build_router(state);

    let address = SocketAddr::new(config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Kino streaming server running on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Cancels `shutdown` when Ctrl-C is received.
pub fn shutdown_on_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested, stopping streams");
                shutdown.cancel();
            }
            Err(e) => error!("Cannot listen for Ctrl-C: {}", e),
        }
    });
}
