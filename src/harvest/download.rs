//! Streaming downloads with verification and retry.
//!
//! Bytes are written to a temporary file in the destination directory and
//! moved into place only after the size and digest check out, so a failed or
//! interrupted download never leaves anything at the destination path.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::config::Config;
use crate::constants::PARTIAL_SUFFIX;
use crate::digest::DigestComputer;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("download of {url} timed out")]
    Timeout { url: String },
    #[error("download of {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned status {status}")]
    Status { url: String, status: StatusCode },
    #[error("size mismatch for {url}: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },
    #[error("digest mismatch for {url}: expected {expected}, got {actual}")]
    DigestMismatch {
        url: String,
        expected: String,
        actual: String,
    },
    #[error("destination already exists: {}", .0.display())]
    DestinationExists(PathBuf),
    #[error("filesystem error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else {
            Self::Transport {
                url: url.to_string(),
                source: e,
            }
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether another attempt in the same pass could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. }
            | Self::Transport { .. }
            | Self::SizeMismatch { .. }
            | Self::DigestMismatch { .. } => true,
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::DestinationExists(_) | Self::Io { .. } => false,
        }
    }

    /// Whether the local disk, not the network, failed.
    #[must_use]
    pub fn is_filesystem(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

/// What the origin claims about the bytes.
#[derive(Debug, Clone, Copy)]
pub struct ExpectedContent<'a> {
    /// Reported byte size; 0 when unknown.
    pub size: u64,
    /// Reported digest; empty when unknown.
    pub digest: &'a str,
}

#[derive(Debug, Clone)]
pub struct Downloader {
    http: reqwest::Client,
    timeout: Duration,
    attempts: u32,
}

impl Downloader {
    #[must_use]
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            timeout: config.download_timeout,
            attempts: config.download_attempts.max(1),
        }
    }

    /// Download `url` to `dest`, returning the number of bytes written.
    ///
    /// Never overwrites: an existing file at `dest` is reported as
    /// [`DownloadError::DestinationExists`] so the caller can decide whether it
    /// is the same content.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
        expected: ExpectedContent<'_>,
    ) -> Result<u64, DownloadError> {
        if tokio::fs::try_exists(dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?
        {
            return Err(DownloadError::DestinationExists(dest.to_path_buf()));
        }

        let mut backoff = INITIAL_BACKOFF;
        let mut attempt = 1;
        loop {
            match self.try_download(url, dest, expected).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    warn!(url = %url, attempt, error = %e, "Download failed, retrying");
                    tokio::time::sleep(with_jitter(backoff)).await;
                    backoff = backoff.saturating_mul(2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_download(
        &self,
        url: &str,
        dest: &Path,
        expected: ExpectedContent<'_>,
    ) -> Result<u64, DownloadError> {
        let mut response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status,
            });
        }

        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let temp = tempfile::Builder::new()
            .prefix(".dl-")
            .suffix(PARTIAL_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| DownloadError::io(dir, e))?;
        // The TempPath deletes the file when dropped, which covers every early return.
        let (std_file, temp_path) = temp.into_parts();
        let mut file = tokio::fs::File::from_std(std_file);
        let mut computer = DigestComputer::new();

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| DownloadError::from_reqwest(url, e))?
        {
            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(&temp_path, e))?;
            computer.update(&chunk);
        }
        file.flush()
            .await
            .map_err(|e| DownloadError::io(&temp_path, e))?;
        file.sync_all()
            .await
            .map_err(|e| DownloadError::io(&temp_path, e))?;
        drop(file);

        let actual_size = computer.bytes();
        if expected.size > 0 && actual_size != expected.size {
            return Err(DownloadError::SizeMismatch {
                url: url.to_string(),
                expected: expected.size,
                actual: actual_size,
            });
        }

        let actual_digest = computer.finalize();
        if !expected.digest.is_empty() && actual_digest != expected.digest {
            return Err(DownloadError::DigestMismatch {
                url: url.to_string(),
                expected: expected.digest.to_string(),
                actual: actual_digest,
            });
        }

        temp_path.persist_noclobber(dest).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                DownloadError::DestinationExists(dest.to_path_buf())
            } else {
                DownloadError::io(dest, e.error)
            }
        })?;

        debug!(url = %url, path = %dest.display(), bytes = actual_size, "Download stored");
        Ok(actual_size)
    }
}

fn with_jitter(base: Duration) -> Duration {
    let jitter_ms = rand::thread_rng().gen_range(0..250);
    base + Duration::from_millis(jitter_ms)
}
