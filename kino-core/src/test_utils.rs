//! Fixtures shared by tests across the workspace.
//!
//! Enabled with the `test-utils` feature. Nothing here needs a real ffmpeg:
//! the encoder is replaced by a shell script that receives the generated
//! arguments as `$@`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::ffmpeg::Encoder;
use crate::library::{LibraryEntry, LibraryError, VideoFile, VideoFileProvider};

/// Returns an encoder that runs `script` with `sh -c`.
///
/// The encoder arguments are available to the script as `$1`, `$2`, ...
pub fn script_encoder(script: &str) -> Encoder {
    Encoder::new("kino-test-encoder").with_wrapper(["sh", "-c", script])
}

/// Creates a temporary directory holding one empty file per name.
///
/// # Panics
///
/// Panics if the directory or a file cannot be created.
pub fn media_dir(names: &[&str]) -> (TempDir, Vec<PathBuf>) {
    let dir = tempfile::tempdir().expect("create temp media dir");
    let paths = names
        .iter()
        .map(|name| {
            let path = dir.path().join(name);
            std::fs::write(&path, b"").expect("create media file");
            path
        })
        .collect();
    (dir, paths)
}

/// In-memory video provider keyed by id.
#[derive(Debug, Default, Clone)]
pub struct StaticLibrary {
    videos: BTreeMap<u64, VideoFile>,
}

impl StaticLibrary {
    /// Creates an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `video` under `id`.
    pub fn with_video(mut self, id: u64, video: VideoFile) -> Self {
        self.videos.insert(id, video);
        self
    }
}

#[async_trait]
impl VideoFileProvider for StaticLibrary {
    async fn video_file(&self, id: u64) -> Result<VideoFile, LibraryError> {
        self.videos
            .get(&id)
            .cloned()
            .ok_or(LibraryError::NotFound { id })
    }

    async fn entries(&self) -> Vec<LibraryEntry> {
        self.videos
            .iter()
            .map(|(id, video)| LibraryEntry {
                id: *id,
                title: video
                    .path
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                path: video.path.clone(),
                size: 0,
            })
            .collect()
    }
}
