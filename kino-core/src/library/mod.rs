//! Media library: the video files that can be streamed.
//!
//! Files are discovered by scanning a directory tree and numbered in path
//! order. Dimensions and audio codec are probed the first time a file is
//! requested and cached afterwards.

pub mod probe;

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use async_trait::async_trait;
pub use probe::{FfprobeProber, parse_probe_output};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::ffmpeg::{AudioCodecStatus, probe_audio_codec};

/// Extensions treated as video files.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "m4v", "mkv", "webm", "mov", "avi", "wmv", "flv", "mpg", "mpeg", "ts", "m2ts",
];

/// Errors from library scanning and probing.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// No file with this id exists in the library.
    #[error("Video {id} not found")]
    NotFound {
        /// Requested id
        id: u64,
    },

    /// ffprobe could not inspect the file.
    #[error("Failed to probe {path}: {reason}")]
    Probe {
        /// Probed file
        path: PathBuf,
        /// ffprobe error output or spawn failure
        reason: String,
    },

    /// ffprobe output could not be decoded.
    #[error("Invalid probe output for {path}: {source}")]
    Decode {
        /// Probed file
        path: PathBuf,
        /// JSON error
        #[source]
        source: serde_json::Error,
    },

    /// The library directory could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Source file descriptor used to plan a transcode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoFile {
    /// Absolute path of the source
    pub path: PathBuf,
    /// Width of the first video stream, 0 if unknown
    pub width: u32,
    /// Height of the first video stream, 0 if unknown
    pub height: u32,
    /// Codec name of the first audio stream
    pub audio_codec: Option<String>,
    /// Container duration in seconds
    pub duration: Option<f64>,
}

impl VideoFile {
    /// Creates a descriptor with no audio and unknown duration.
    pub fn new(path: impl AsRef<Path>, width: u32, height: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            width,
            height,
            audio_codec: None,
            duration: None,
        }
    }

    /// Sets the audio codec name.
    pub fn with_audio_codec(mut self, codec: impl Into<String>) -> Self {
        self.audio_codec = Some(codec.into());
        self
    }

    /// Returns the playback support of the audio track.
    pub fn audio_status(&self) -> AudioCodecStatus {
        self.audio_codec
            .as_deref()
            .map_or(AudioCodecStatus::MissingUnsupported, probe_audio_codec)
    }
}

/// Library entry as listed to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryEntry {
    /// Stable id used in stream URLs
    pub id: u64,
    /// File name without extension
    pub title: String,
    /// Absolute path
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
}

/// Lookup of video descriptors by id.
#[async_trait]
pub trait VideoFileProvider: Send + Sync {
    /// Returns the descriptor for `id`, probing the file if needed.
    ///
    /// # Errors
    ///
    /// - `LibraryError::NotFound` - unknown id
    /// - `LibraryError::Probe` / `LibraryError::Decode` - the file could not be inspected
    async fn video_file(&self, id: u64) -> Result<VideoFile, LibraryError>;

    /// Lists every entry.
    async fn entries(&self) -> Vec<LibraryEntry>;
}

/// Directory-backed library with cached probe results.
#[derive(Debug)]
pub struct MediaLibrary {
    prober: FfprobeProber,
    entries: RwLock<Vec<LibraryEntry>>,
    probed: RwLock<HashMap<u64, VideoFile>>,
}

impl MediaLibrary {
    /// Creates an empty library.
    pub fn new(prober: FfprobeProber) -> Self {
        Self {
            prober,
            entries: RwLock::new(Vec::new()),
            probed: RwLock::new(HashMap::new()),
        }
    }

    /// Scans `root` for video files and replaces the current entries.
    ///
    /// Ids are assigned from 1 in path order, so they are stable across
    /// restarts as long as the tree does not change. Returns the number of
    /// files found.
    ///
    /// # Errors
    ///
    /// - `LibraryError::Io` - `root` could not be read
    pub async fn scan(&self, root: &Path) -> Result<usize, LibraryError> {
        let mut found = Vec::new();
        collect_videos(root, &mut found).await?;
        found.sort_by(|a, b| a.0.cmp(&b.0));

        let entries: Vec<LibraryEntry> = found
            .into_iter()
            .zip(1u64..)
            .map(|((path, size), id)| LibraryEntry {
                id,
                title: title_from_path(&path),
                path,
                size,
            })
            .collect();

        let count = entries.len();
        *self.entries.write().await = entries;
        self.probed.write().await.clear();
        info!("Library scan of {} found {} video(s)", root.display(), count);
        Ok(count)
    }

    /// Returns the entry for `id`.
    pub async fn entry(&self, id: u64) -> Option<LibraryEntry> {
        self.entries
            .read()
            .await
            .iter()
            .find(|entry| entry.id == id)
            .cloned()
    }
}

#[async_trait]
impl VideoFileProvider for MediaLibrary {
    async fn video_file(&self, id: u64) -> Result<VideoFile, LibraryError> {
        if let Some(video) = self.probed.read().await.get(&id) {
            return Ok(video.clone());
        }

        let entry = self.entry(id).await.ok_or(LibraryError::NotFound { id })?;
        let video = self.prober.probe(&entry.path).await?;
        self.probed.write().await.insert(id, video.clone());
        Ok(video)
    }

    async fn entries(&self) -> Vec<LibraryEntry> {
        self.entries.read().await.clone()
    }
}

fn collect_videos<'a>(
    dir: &'a Path,
    found: &'a mut Vec<(PathBuf, u64)>,
) -> Pin<Box<dyn Future<Output = Result<(), std::io::Error>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                let hidden = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with('.'));
                if hidden {
                    continue;
                }
                if let Err(e) = collect_videos(&path, found).await {
                    warn!("Failed to scan {}: {}", path.display(), e);
                }
            } else if file_type.is_file() && is_video(&path) {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                debug!("Found video {}", path.display());
                found.push((path, size));
            }
        }

        Ok(())
    })
}

fn is_video(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext.as_str()))
}

fn title_from_path(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("Unknown File")
        .replace(['.', '_'], " ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scan_numbers_videos_in_path_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("shows")).unwrap();
        std::fs::create_dir(dir.path().join(".trash")).unwrap();
        std::fs::write(dir.path().join("b_movie.mkv"), b"b").unwrap();
        std::fs::write(dir.path().join("a.movie.MP4"), b"aa").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::write(dir.path().join("shows").join("ep1.webm"), b"e").unwrap();
        std::fs::write(dir.path().join(".trash").join("old.mkv"), b"o").unwrap();

        let library = MediaLibrary::new(FfprobeProber::new("ffprobe"));
        assert_eq!(library.scan(dir.path()).await.unwrap(), 3);

        let entries = library.entries().await;
        let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["a movie", "b movie", "ep1"]);
        assert_eq!(entries[0].id, 1);
        assert_eq!(entries[0].size, 2);
        assert_eq!(entries[2].id, 3);
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let library = MediaLibrary::new(FfprobeProber::new("ffprobe"));
        let result = library.video_file(7).await;
        assert!(matches!(result, Err(LibraryError::NotFound { id: 7 })));
    }

    #[test]
    fn test_audio_status_from_codec() {
        let video = VideoFile::new("/media/a.mkv", 1920, 1080);
        assert_eq!(video.audio_status(), AudioCodecStatus::MissingUnsupported);
        assert_eq!(
            video.with_audio_codec("opus").audio_status(),
            AudioCodecStatus::Opus
        );
    }

    #[test]
    fn test_video_extensions() {
        assert!(is_video(Path::new("/a/b.MKV")));
        assert!(is_video(Path::new("movie.m2ts")));
        assert!(!is_video(Path::new("cover.jpg")));
        assert!(!is_video(Path::new("README")));
    }
}
