//! Encoder lifecycle across cancellation, completion and failure.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kino_core::StreamManager;
use kino_core::config::TranscodeConfig;
use kino_core::ffmpeg::{ProcessOutcome, SoftwareOnlyProber, StreamFormat};
use kino_core::test_utils::{media_dir, script_encoder};
use kino_core::transcode::{StreamStatsSnapshot, TranscodeOptions};
use kino_core::VideoFile;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

fn manager(script: &str) -> StreamManager {
    StreamManager::new(
        Arc::new(TranscodeConfig::default()),
        Arc::new(SoftwareOnlyProber),
        script_encoder(script),
    )
}

async fn settled_stats<F>(manager: &StreamManager, done: F) -> StreamStatsSnapshot
where
    F: Fn(&StreamStatsSnapshot) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let stats = manager.stats();
            if done(&stats) {
                return stats;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("stats settle")
}

#[tokio::test]
async fn test_request_cancellation_kills_and_releases_once() {
    let (_dir, paths) = media_dir(&["movie.mkv"]);
    let manager = manager("exec yes kino");
    let root = CancellationToken::new();
    let request = root.child_token();

    let mut stream = manager
        .start_transcode(
            TranscodeOptions::new(StreamFormat::Mp4, VideoFile::new(&paths[0], 1920, 1080)),
            &request,
        )
        .await
        .unwrap();
    let first = stream.next().await.unwrap().unwrap();
    assert!(first.starts_with(b"kino"));

    request.cancel();
    assert_eq!(stream.outcome().wait().await, ProcessOutcome::Terminated);

    timeout(Duration::from_secs(5), async {
        while manager.locks().reader_count(&paths[0]) > 0 {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert!(stream.context().is_released());
    assert!(!root.is_cancelled());

    drop(stream);
    let stats = settled_stats(&manager, |stats| stats.active == 0).await;
    assert_eq!(stats.terminations, 1);
    assert_eq!(stats.runtime_failures, 0);
    assert_eq!(manager.locks().active_readers(), 0);
}

#[tokio::test]
async fn test_dropping_stream_terminates_encoder() {
    let (_dir, paths) = media_dir(&["movie.webm"]);
    let manager = manager("exec yes kino");
    let root = CancellationToken::new();

    let mut stream = manager
        .start_transcode(
            TranscodeOptions::new(StreamFormat::Webm, VideoFile::new(&paths[0], 640, 360)),
            &root,
        )
        .await
        .unwrap();
    assert!(stream.next().await.is_some());
    let process = stream.context().process().expect("encoder attached");
    let outcome = stream.outcome();

    drop(stream);
    timeout(Duration::from_secs(5), process.wait_exited())
        .await
        .unwrap();
    assert_eq!(outcome.wait().await, ProcessOutcome::Terminated);
}

#[tokio::test]
async fn test_runtime_failure_is_reported_after_streaming() {
    let (_dir, paths) = media_dir(&["broken.mkv"]);
    let manager = manager("printf 'partial'; echo 'Invalid data found when processing input' >&2; exit 1");
    let root = CancellationToken::new();

    let stream = manager
        .start_transcode(
            TranscodeOptions::new(StreamFormat::Mkv, VideoFile::new(&paths[0], 1920, 1080)),
            &root,
        )
        .await
        .unwrap();
    let outcome = stream.outcome();

    let chunks: Vec<_> = stream.collect().await;
    let body: Vec<u8> = chunks
        .into_iter()
        .map(|chunk| chunk.unwrap())
        .flat_map(|chunk| chunk.to_vec())
        .collect();
    assert_eq!(body, b"partial");

    match outcome.wait().await {
        ProcessOutcome::Failed(report) => {
            assert_eq!(report.exit_code, Some(1));
            assert_eq!(report.stderr, "Invalid data found when processing input");
            assert!(report.command.contains("-f matroska"));
        }
        other => panic!("expected a runtime failure, got {other:?}"),
    }

    let stats = settled_stats(&manager, |stats| stats.runtime_failures == 1).await;
    assert_eq!(stats.started, 1);
    assert_eq!(stats.terminations, 0);
}

#[tokio::test]
async fn test_completed_stream_delivers_all_bytes_in_order() {
    let (_dir, paths) = media_dir(&["short.mp4"]);
    let manager = manager("seq 1 20000");
    let root = CancellationToken::new();

    let stream = manager
        .start_transcode(
            TranscodeOptions::new(StreamFormat::Mp4, VideoFile::new(&paths[0], 1280, 720)),
            &root,
        )
        .await
        .unwrap();
    let outcome = stream.outcome();

    let mut body = Vec::new();
    let mut stream = stream;
    while let Some(chunk) = stream.next().await {
        body.extend_from_slice(&chunk.unwrap());
    }

    let text = String::from_utf8(body).unwrap();
    let numbers: Vec<u32> = text.lines().map(|line| line.parse().unwrap()).collect();
    assert_eq!(numbers.len(), 20000);
    assert!(numbers.windows(2).all(|pair| pair[1] == pair[0] + 1));
    assert_eq!(outcome.wait().await, ProcessOutcome::Completed);
}
