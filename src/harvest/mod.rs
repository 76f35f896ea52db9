//! The acquisition and deduplication pipeline.
//!
//! Catalog scan -> thread ingestion -> media resolution, driven per board by
//! the [`Harvester`].

pub mod catalog;
pub mod download;
pub mod ingest;
pub mod naming;
pub mod orchestrator;
pub mod quotelinks;
pub mod resolver;
pub mod thumbnail;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::api::ApiError;

pub use catalog::{CandidateFilter, CatalogScanner};
pub use download::{DownloadError, Downloader, ExpectedContent};
pub use ingest::{IngestedPost, IngestedThread, ThreadIngester};
pub use orchestrator::{BoardSummary, Harvester, PassCounts, PassReport, RunState};
pub use resolver::{MediaResolver, Resolution};
pub use thumbnail::{FfmpegThumbnailer, ThumbnailError, Thumbnailer};

/// Broad failure classes; they decide how far a failure propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Timeouts, connection failures, 5xx. The unit of work is retried next pass.
    Transient,
    /// Unusable remote data. The affected post or thread is skipped.
    Malformed,
    /// Disk full, permission denied. Ends the board's pass.
    Filesystem,
    /// The metadata store failed. Ends the board's pass.
    Database,
}

#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("malformed data: {0}")]
    Malformed(String),
    #[error("storage conflict: {0}")]
    Conflict(String),
    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database error: {0:#}")]
    Database(#[from] anyhow::Error),
}

impl HarvestError {
    pub(crate) fn filesystem(path: &Path, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }

    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Api(e) if e.is_malformed() => ErrorClass::Malformed,
            Self::Api(_) | Self::Conflict(_) => ErrorClass::Transient,
            Self::Download(e) if e.is_filesystem() => ErrorClass::Filesystem,
            Self::Download(_) => ErrorClass::Transient,
            Self::Malformed(_) => ErrorClass::Malformed,
            Self::Filesystem { .. } => ErrorClass::Filesystem,
            Self::Database(_) => ErrorClass::Database,
        }
    }

    /// Whether this failure ends the current board's pass.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Filesystem | ErrorClass::Database)
    }
}
