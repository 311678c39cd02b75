//! Read/write lock behaviour with real encoder processes attached.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kino_core::config::TranscodeConfig;
use kino_core::ffmpeg::{ProcessOutcome, SoftwareOnlyProber, StreamFormat};
use kino_core::test_utils::{media_dir, script_encoder};
use kino_core::{StreamManager, TranscodeOptions, VideoFile};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

fn manager(script: &str) -> StreamManager {
    StreamManager::new(
        Arc::new(TranscodeConfig::default()),
        Arc::new(SoftwareOnlyProber),
        script_encoder(script),
    )
}

#[tokio::test]
async fn test_writer_waits_for_both_streams() {
    let (_dir, paths) = media_dir(&["shared.mkv"]);
    let path = paths[0].clone();
    let manager = manager("exec sleep 30");
    let root = CancellationToken::new();

    let video = VideoFile::new(&path, 1920, 1080).with_audio_codec("aac");
    let first = manager
        .start_transcode(TranscodeOptions::new(StreamFormat::Mp4, video.clone()), &root)
        .await
        .unwrap();
    let second = manager
        .start_transcode(TranscodeOptions::new(StreamFormat::Webm, video), &root)
        .await
        .unwrap();
    assert_eq!(manager.locks().reader_count(&path), 2);

    let locks = manager.locks().clone();
    let writer_path = path.clone();
    let writer = tokio::spawn(async move {
        locks
            .acquire_write(&CancellationToken::new(), &writer_path)
            .await
            .map(|guard| guard.path().to_path_buf())
    });

    sleep(Duration::from_millis(100)).await;
    assert!(!writer.is_finished());

    drop(first);
    sleep(Duration::from_millis(200)).await;
    assert!(!writer.is_finished(), "one stream is still running");

    drop(second);
    let locked = timeout(Duration::from_secs(5), writer)
        .await
        .expect("writer admitted after both streams ended")
        .unwrap()
        .unwrap();
    assert_eq!(locked, std::fs::canonicalize(&path).unwrap());
}

#[tokio::test]
async fn test_revoke_ends_running_stream() {
    let (_dir, paths) = media_dir(&["revoked.mp4"]);
    let manager = manager("exec sleep 30");
    let root = CancellationToken::new();

    let mut stream = manager
        .start_transcode(
            TranscodeOptions::new(StreamFormat::Mp4, VideoFile::new(&paths[0], 1280, 720)),
            &root,
        )
        .await
        .unwrap();
    let outcome = stream.outcome();

    assert_eq!(manager.locks().revoke(&paths[0]), 1);
    let next = timeout(Duration::from_secs(5), stream.next()).await.unwrap();
    assert!(next.is_none());
    assert_eq!(outcome.wait().await, ProcessOutcome::Terminated);

    let guard = timeout(
        Duration::from_secs(5),
        manager.locks().acquire_write(&root, &paths[0]),
    )
    .await
    .unwrap()
    .unwrap();
    drop(guard);
}

#[tokio::test]
async fn test_unrelated_paths_do_not_block() {
    let (_dir, paths) = media_dir(&["a.mkv", "b.mkv"]);
    let manager = manager("exec sleep 30");
    let root = CancellationToken::new();

    let _stream = manager
        .start_transcode(
            TranscodeOptions::new(StreamFormat::Mkv, VideoFile::new(&paths[0], 1280, 720)),
            &root,
        )
        .await
        .unwrap();

    let guard = timeout(
        Duration::from_millis(200),
        manager.locks().acquire_write(&root, &paths[1]),
    )
    .await
    .expect("writer on another file is not blocked")
    .unwrap();
    drop(guard);
    root.cancel();
}
