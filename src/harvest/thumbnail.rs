//! Still-frame thumbnails for stored media.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use super::naming::{thumbnail_path, truncate_utf8};
use crate::config::Config;
use crate::fs_utils::{ensure_dir, remove_file_if_exists};

const MAX_STDERR_LEN: usize = 1000;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("thumbnail extraction failed for {}: {stderr}", path.display())]
    Failed { path: PathBuf, stderr: String },
    #[error("thumbnail extraction timed out for {}", .0.display())]
    Timeout(PathBuf),
    #[error("filesystem error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Produces a thumbnail next to a stored media file.
///
/// Failures are never fatal to the caller; the media is kept regardless.
#[async_trait]
pub trait Thumbnailer: Send + Sync {
    /// Generate the thumbnail for `media_path`, returning where it was written.
    async fn generate(&self, media_path: &Path) -> Result<PathBuf, ThumbnailError>;
}

/// Extracts the first video frame with an external `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegThumbnailer {
    program: String,
    timeout: Duration,
}

impl FfmpegThumbnailer {
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.ffmpeg_path.clone(), config.thumbnail_timeout)
    }

    async fn run(&self, media_path: &Path, thumb: &Path) -> Result<(), ThumbnailError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-y")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(media_path)
            .arg("-frames:v")
            .arg("1")
            .arg("-q:v")
            .arg("3")
            .arg(thumb)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| ThumbnailError::Timeout(media_path.to_path_buf()))?
            .map_err(|e| ThumbnailError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ThumbnailError::Failed {
                path: media_path.to_path_buf(),
                stderr: truncate_utf8(stderr.trim(), MAX_STDERR_LEN).to_string(),
            });
        }

        match tokio::fs::try_exists(thumb).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ThumbnailError::Failed {
                path: media_path.to_path_buf(),
                stderr: "no output written".to_string(),
            }),
            Err(e) => Err(ThumbnailError::Io {
                path: thumb.to_path_buf(),
                source: e,
            }),
        }
    }
}

#[async_trait]
impl Thumbnailer for FfmpegThumbnailer {
    async fn generate(&self, media_path: &Path) -> Result<PathBuf, ThumbnailError> {
        let thumb = thumbnail_path(media_path);
        if let Some(dir) = thumb.parent() {
            ensure_dir(dir).await.map_err(|e| ThumbnailError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
        }

        if let Err(e) = self.run(media_path, &thumb).await {
            // Never leave a half-written thumbnail behind
            let _ = remove_file_if_exists(&thumb).await;
            return Err(e);
        }

        debug!(thumb = %thumb.display(), "Thumbnail written");
        Ok(thumb)
    }
}
