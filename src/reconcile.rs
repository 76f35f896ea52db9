//! Storage reconciliation ("spider").
//!
//! Walks the media root and cross-checks it against the Media table. Nothing
//! is deleted or moved; the pass only reports, and with backfill enabled it
//! records orphaned files as Media rows without an originating post.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::constants::{PARTIAL_SUFFIX, THUMBNAIL_DIR, THUMBNAIL_PREFIX};
use crate::db::{self, Database, MediaInsert, NewMedia};
use crate::digest::digest_file;
use crate::fs_utils::collect_files;

#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Media files found on disk.
    pub files_seen: usize,
    /// Files on disk that a Media row points at.
    pub known_files: usize,
    /// Files on disk without a Media row.
    pub orphan_files: Vec<PathBuf>,
    /// Media rows whose file is gone.
    pub missing_files: Vec<String>,
    /// Orphans recorded as new Media rows.
    pub backfilled: usize,
    /// Orphans whose digest is already stored under another path.
    pub duplicate_on_disk: Vec<PathBuf>,
    pub media_in_db: i64,
    pub aliases_in_db: i64,
}

/// Reconcile the media root with the database.
///
/// # Errors
///
/// Returns an error if the media root cannot be walked or a query fails.
pub async fn run(config: &Config, db: &Database, backfill: bool) -> Result<ReconcileReport> {
    let pool = db.pool();
    let root = config.media_dir.as_path();
    let mut report = ReconcileReport::default();

    let media = db::list_media(pool).await?;
    let known: HashSet<&str> = media.iter().map(|m| m.file_path.as_str()).collect();

    let files = collect_files(root, |dir| {
        dir.file_name().is_some_and(|n| n == THUMBNAIL_DIR)
    })
    .await
    .with_context(|| format!("Failed to walk media directory: {}", root.display()))?;

    for file in files {
        if !is_media_file(&file, &config.target_extension) {
            continue;
        }
        report.files_seen += 1;

        if known.contains(file.to_string_lossy().as_ref()) {
            report.known_files += 1;
            continue;
        }

        debug!(path = %file.display(), "File has no media row");
        if backfill {
            backfill_file(config, db, root, &file, &mut report).await?;
        }
        report.orphan_files.push(file);
    }

    for row in &media {
        let exists = tokio::fs::try_exists(&row.file_path)
            .await
            .with_context(|| format!("Failed to check media file: {}", row.file_path))?;
        if !exists {
            warn!(media_id = row.id, path = %row.file_path, "Media row points at a missing file");
            report.missing_files.push(row.file_path.clone());
        }
    }

    report.media_in_db = db::count_media(pool).await?;
    report.aliases_in_db = db::count_media_aliases(pool).await?;

    info!(
        files_seen = report.files_seen,
        known = report.known_files,
        orphans = report.orphan_files.len(),
        missing = report.missing_files.len(),
        backfilled = report.backfilled,
        duplicates = report.duplicate_on_disk.len(),
        media = report.media_in_db,
        aliases = report.aliases_in_db,
        "Reconciliation complete"
    );
    Ok(report)
}

fn is_media_file(path: &Path, target_extension: &str) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    !name.starts_with('.')
        && !name.starts_with(THUMBNAIL_PREFIX)
        && !name.ends_with(PARTIAL_SUFFIX)
        && name.to_lowercase().ends_with(&target_extension.to_lowercase())
}

async fn backfill_file(
    config: &Config,
    db: &Database,
    root: &Path,
    file: &Path,
    report: &mut ReconcileReport,
) -> Result<()> {
    let pool = db.pool();

    // Only files directly inside a board directory carry a board.
    let Some(board_dir) = file.parent().filter(|dir| dir.parent() == Some(root)) else {
        debug!(path = %file.display(), "Not inside a board directory, not backfilling");
        return Ok(());
    };
    let Some(board_name) = board_dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Ok(());
    };

    let digest = digest_file(file)
        .await
        .with_context(|| format!("Failed to hash {}", file.display()))?;
    let size = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("Failed to stat {}", file.display()))?
        .len();

    let host = db::get_or_create_host(pool, &config.host_name).await?;
    let board = db::get_or_create_board(pool, host.id, &board_name).await?;

    let new_media = NewMedia {
        digest,
        filename: file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_path: file.to_string_lossy().into_owned(),
        size_bytes: i64::try_from(size).context("File size out of range")?,
        board_id: board.id,
        post_id: None,
    };

    match db::insert_media(pool, &new_media).await? {
        MediaInsert::Created(media) => {
            info!(path = %media.file_path, digest = %media.digest, "Backfilled media row");
            report.backfilled += 1;
        }
        MediaInsert::AlreadyExists(existing) => {
            warn!(
                path = %file.display(),
                stored = %existing.file_path,
                "Duplicate content on disk"
            );
            report.duplicate_on_disk.push(file.to_path_buf());
        }
        MediaInsert::PathTaken => {
            // Cannot happen for a path with no row, unless another writer raced us.
            debug!(path = %file.display(), "Path claimed concurrently");
        }
    }
    Ok(())
}
