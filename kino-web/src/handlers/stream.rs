//! Transcoded stream endpoints.
//!
//! Each endpoint resolves the video, takes the requested resolution and seek
//! offset from the query string and hands the encoder's stdout to the
//! response body. The body owns the read lock and the encoder: when the
//! client disconnects, hyper drops the body and the encoder is killed.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use kino_core::transcode::TranscodeStream;
use kino_core::{
    KinoError, LibraryError, StreamFormat, StreamingResolution, TranscodeError, TranscodeOptions,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::server::AppState;

/// Query parameters accepted by the stream endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Resolution label such as `FULL_HD`, overriding the configured cap
    pub resolution: Option<String>,
    /// Seek offset in seconds
    pub start: Option<f64>,
}

/// Streams a video as fragmented MP4.
pub async fn stream_mp4(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<StreamQuery>,
) -> Response {
    serve_stream(state, id, query, StreamFormat::Mp4).await
}

/// Streams a video as WebM.
pub async fn stream_webm(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<StreamQuery>,
) -> Response {
    serve_stream(state, id, query, StreamFormat::Webm).await
}

/// Streams a video as Matroska.
pub async fn stream_mkv(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<StreamQuery>,
) -> Response {
    serve_stream(state, id, query, StreamFormat::Mkv).await
}

async fn serve_stream(
    state: AppState,
    id: u64,
    query: StreamQuery,
    format: StreamFormat,
) -> Response {
    let stream = match open_stream(&state, id, query, format).await {
        Ok(stream) => stream,
        Err(e) => return error_response(id, e),
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, format.mime_type())
        .header(header::CACHE_CONTROL, "no-store")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn open_stream(
    state: &AppState,
    id: u64,
    query: StreamQuery,
    format: StreamFormat,
) -> kino_core::Result<TranscodeStream> {
    let video = state.library.video_file(id).await?;

    let mut options = TranscodeOptions::new(format, video);
    if let Some(label) = query.resolution.as_deref() {
        let resolution = label
            .parse::<StreamingResolution>()
            .map_err(|reason| KinoError::InvalidRequest { reason })?;
        options = options.with_resolution(resolution);
    }
    if let Some(start) = query.start {
        options = options.with_start_time(start);
    }

    Ok(state.streams.start_transcode(options, &state.shutdown).await?)
}

/// Maps a failure before the first byte to a status and a plain-text body.
///
/// Start failures carry the encoder error text.
fn error_response(id: u64, error: KinoError) -> Response {
    let status = match &error {
        KinoError::Library(LibraryError::NotFound { .. }) => StatusCode::NOT_FOUND,
        KinoError::InvalidRequest { .. } | KinoError::Transcode(TranscodeError::Process(_)) => {
            StatusCode::BAD_REQUEST
        }
        KinoError::Transcode(TranscodeError::Lock(_)) | KinoError::Lock(_) => {
            debug!("Stream request for video {} abandoned: {}", id, error);
            StatusCode::SERVICE_UNAVAILABLE
        }
        KinoError::Library(_) | KinoError::Configuration { .. } | KinoError::Io(_) => {
            warn!("Cannot stream video {}: {}", id, error);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, error.user_message()).into_response()
}
