//! End-to-end HTTP streaming through the router.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use futures::StreamExt;
use kino_core::config::TranscodeConfig;
use kino_core::ffmpeg::SoftwareOnlyProber;
use kino_core::test_utils::{StaticLibrary, media_dir, script_encoder};
use kino_core::{StreamManager, StreamingResolution, VideoFile};
use kino_web::{AppState, build_router};
use tempfile::TempDir;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

struct Fixture {
    app: Router,
    state: AppState,
    movie: PathBuf,
    _dir: TempDir,
}

fn fixture(script: &str) -> Fixture {
    let (dir, paths) = media_dir(&["movie.mkv"]);
    let library = StaticLibrary::new().with_video(
        7,
        VideoFile::new(&paths[0], 3840, 2160).with_audio_codec("aac"),
    );
    let config = TranscodeConfig {
        max_streaming_resolution: StreamingResolution::StandardHd,
        ..TranscodeConfig::default()
    };
    let streams = StreamManager::new(
        Arc::new(config),
        Arc::new(SoftwareOnlyProber),
        script_encoder(script),
    );
    let state = AppState::new(streams, Arc::new(library));
    Fixture {
        app: build_router(state.clone()),
        state,
        movie: paths[0].clone(),
        _dir: dir,
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn wait_for_readers(state: &AppState, expected: usize) {
    timeout(Duration::from_secs(5), async {
        while state.streams.locks().active_readers() != expected {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("reader count settles");
}

#[tokio::test]
async fn test_stream_body_matches_encoder_output() {
    let fx = fixture(r#"printf '%s\n' "$@""#);
    let response = fx.app.oneshot(get("/scene/7/stream.mp4")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp4");

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let args: Vec<String> = String::from_utf8_lossy(&body)
        .lines()
        .map(str::to_string)
        .collect();
    let input = args.iter().position(|arg| arg == "-i").unwrap();
    assert_eq!(args[input + 1], fx.movie.display().to_string());
    assert!(args.contains(&"scale=1280:720".to_string()));
    assert_eq!(args.last().map(String::as_str), Some("pipe:"));

    wait_for_readers(&fx.state, 0).await;
    assert_eq!(fx.state.streams.stats().started, 1);
}

#[tokio::test]
async fn test_concurrent_requests_share_the_file() {
    let fx = fixture("exec yes kino");

    let first = fx.app.clone().oneshot(get("/scene/7/stream.mp4")).await.unwrap();
    let second = fx.app.clone().oneshot(get("/scene/7/stream.webm")).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(fx.state.streams.locks().reader_count(&fx.movie), 2);

    let locks = fx.state.streams.locks().clone();
    let movie = fx.movie.clone();
    let writer = tokio::spawn(async move {
        locks
            .acquire_write(&CancellationToken::new(), &movie)
            .await
            .map(drop)
    });
    sleep(Duration::from_millis(100)).await;
    assert!(!writer.is_finished());

    drop(first);
    drop(second);
    timeout(Duration::from_secs(5), writer)
        .await
        .expect("writer admitted once both responses are gone")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_client_disconnect_terminates_encoder() {
    let fx = fixture("exec yes kino");

    let response = fx.app.oneshot(get("/scene/7/stream.mkv")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "video/x-matroska");

    let mut body = response.into_body().into_data_stream();
    let chunk = body.next().await.unwrap().unwrap();
    assert!(chunk.starts_with(b"kino"));
    drop(body);

    wait_for_readers(&fx.state, 0).await;
    timeout(Duration::from_secs(5), async {
        while fx.state.streams.stats().terminations != 1 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("termination recorded");
    assert_eq!(fx.state.streams.stats().active, 0);
}

#[tokio::test]
async fn test_shutdown_ends_streams_and_refuses_new_ones() {
    let fx = fixture("exec yes kino");

    let response = fx.app.clone().oneshot(get("/scene/7/stream.mp4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    fx.state.shutdown.cancel();
    let drained = timeout(
        Duration::from_secs(5),
        to_bytes(response.into_body(), usize::MAX),
    )
    .await
    .expect("stream ends after shutdown");
    assert!(drained.is_ok());

    let refused = fx.app.oneshot(get("/scene/7/stream.mp4")).await.unwrap();
    assert_eq!(refused.status(), StatusCode::SERVICE_UNAVAILABLE);
    wait_for_readers(&fx.state, 0).await;
}

#[tokio::test]
async fn test_encoder_crash_after_headers_is_counted() {
    let fx = fixture("printf partial; echo 'Invalid data found when processing input' >&2; exit 1");

    for _ in 0..5 {
        let response = fx.app.clone().oneshot(get("/scene/7/stream.mkv")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"partial");
    }

    timeout(Duration::from_secs(5), async {
        while fx.state.streams.stats().active != 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("all encoders reaped");

    let response = fx.app.oneshot(get("/api/streams")).await.unwrap();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let streams: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(streams["stats"]["runtime_failures"], 5);
    assert_eq!(streams["stats"]["terminations"], 0);
    assert_eq!(streams["stats"]["completed"], 0);
}

#[tokio::test]
async fn test_encoder_start_failure_is_a_bad_request() {
    let (_dir, paths) = media_dir(&["movie.mkv"]);
    let library = StaticLibrary::new().with_video(1, VideoFile::new(&paths[0], 1280, 720));
    let streams = StreamManager::new(
        Arc::new(TranscodeConfig::default()),
        Arc::new(SoftwareOnlyProber),
        kino_core::ffmpeg::Encoder::new("/nonexistent/kino/ffmpeg"),
    );
    let state = AppState::new(streams, Arc::new(library));
    let app = build_router(state.clone());

    let response = app.oneshot(get("/scene/1/stream.mp4")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&body).contains("/nonexistent/kino/ffmpeg"));

    assert_eq!(state.streams.stats().start_failures, 1);
    wait_for_readers(&state, 0).await;
}
