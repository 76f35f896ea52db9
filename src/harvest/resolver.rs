//! Media resolution: the deduplication decision for one attachment.
//!
//! A digest seen for the first time is downloaded, thumbnailed and recorded as
//! a Media row; every later sighting becomes at most one MediaAlias row. No
//! in-process lock guards the decision. Two workers racing on the same digest
//! both download, and the UNIQUE constraint on `media.digest` picks the winner;
//! the loser removes its copy and records an alias instead.
//!
//! Thumbnails are the exception: a stored path is claimed in-process before
//! the extractor runs, so racing workers never extract the same file twice.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info, warn};

use super::download::{DownloadError, Downloader, ExpectedContent};
use super::naming::{board_dir, storage_file_name, thumbnail_path, DIGEST_TOKEN_LEN};
use super::thumbnail::Thumbnailer;
use super::HarvestError;
use crate::api::Attachment;
use crate::config::Config;
use crate::db::{self, Board, Database, Media, MediaInsert, NewMedia, NewMediaAlias, Post};
use crate::digest::{digest_file, digest_token};
use crate::fs_utils::{ensure_dir, remove_file_if_exists};

/// Outcome of resolving one attachment.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// The attachment is not of the target type; nothing was done.
    NotTarget,
    /// First sighting: the file was stored and a Media row created.
    Created { media: Media, thumbnail_failed: bool },
    /// Re-sighting under a new post/filename: an alias row was added.
    Aliased(Media),
    /// This exact sighting is already on record.
    AlreadyRecorded,
}

/// A file placed at its storage path, by us or by an earlier run.
#[derive(Debug)]
struct StoredFile {
    path: PathBuf,
    bytes: u64,
    /// False when an identical file was already present and adopted.
    written: bool,
}

/// Stored paths whose thumbnail is being extracted right now.
#[derive(Debug, Clone, Default)]
struct ThumbnailClaims(Arc<Mutex<HashSet<PathBuf>>>);

impl ThumbnailClaims {
    fn try_claim(&self, path: &Path) -> Option<ThumbnailClaim> {
        let mut held = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        held.insert(path.to_path_buf()).then(|| ThumbnailClaim {
            claims: self.clone(),
            path: path.to_path_buf(),
        })
    }
}

struct ThumbnailClaim {
    claims: ThumbnailClaims,
    path: PathBuf,
}

impl Drop for ThumbnailClaim {
    fn drop(&mut self) {
        self.claims
            .0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.path);
    }
}

#[derive(Clone)]
pub struct MediaResolver {
    db: Database,
    downloader: Downloader,
    thumbnailer: Arc<dyn Thumbnailer>,
    thumbnail_claims: ThumbnailClaims,
    media_dir: PathBuf,
    media_base_url: String,
    target_extension: String,
    max_filename_bytes: usize,
}

impl MediaResolver {
    #[must_use]
    pub fn new(
        config: &Config,
        db: Database,
        downloader: Downloader,
        thumbnailer: Arc<dyn Thumbnailer>,
    ) -> Self {
        Self {
            db,
            downloader,
            thumbnailer,
            thumbnail_claims: ThumbnailClaims::default(),
            media_dir: config.media_dir.clone(),
            media_base_url: config.media_base_url.clone(),
            target_extension: config.target_extension.to_lowercase(),
            max_filename_bytes: config.max_filename_bytes,
        }
    }

    /// Resolve one post's attachment against the media store.
    pub async fn resolve(
        &self,
        board: &Board,
        post: &Post,
        attachment: &Attachment,
    ) -> Result<Resolution, HarvestError> {
        if !attachment.ext.eq_ignore_ascii_case(&self.target_extension) {
            return Ok(Resolution::NotTarget);
        }

        if let Some(existing) = db::get_media_by_digest(self.db.pool(), &attachment.digest).await? {
            return self.record_sighting(board, post, attachment, existing).await;
        }

        self.first_sighting(board, post, attachment).await
    }

    async fn record_sighting(
        &self,
        board: &Board,
        post: &Post,
        attachment: &Attachment,
        media: Media,
    ) -> Result<Resolution, HarvestError> {
        let pool = self.db.pool();
        let filename = attachment.display_name();

        // The sighting that created the Media row is not an alias of itself.
        if media.post_id == Some(post.id) && media.filename == filename {
            return Ok(Resolution::AlreadyRecorded);
        }
        if db::get_media_alias(pool, post.id, &attachment.digest, &filename)
            .await?
            .is_some()
        {
            return Ok(Resolution::AlreadyRecorded);
        }

        let alias = NewMediaAlias {
            media_id: media.id,
            digest: attachment.digest.clone(),
            filename,
            post_id: post.id,
            board_id: board.id,
        };
        if !db::insert_media_alias(pool, &alias).await? {
            return Ok(Resolution::AlreadyRecorded);
        }

        debug!(
            board = %board.name,
            post = post.source_post_id,
            digest = %attachment.digest,
            media_id = media.id,
            "Recorded media alias"
        );
        Ok(Resolution::Aliased(media))
    }

    async fn first_sighting(
        &self,
        board: &Board,
        post: &Post,
        attachment: &Attachment,
    ) -> Result<Resolution, HarvestError> {
        let dir = board_dir(&self.media_dir, &board.name);
        ensure_dir(&dir)
            .await
            .map_err(|e| HarvestError::filesystem(&dir, e))?;

        let stored = self.store_file(&dir, board, attachment).await?;

        // An adopted file may belong to a concurrent writer whose insert is
        // still pending; it is only thumbnailed once this sighting owns the row.
        let mut thumbnail_failed = false;
        if stored.written {
            thumbnail_failed = self.thumbnail(board, post, &stored.path).await;
        }

        let size_bytes = i64::try_from(stored.bytes)
            .map_err(|_| HarvestError::Malformed(format!("file size out of range: {}", stored.bytes)))?;
        let new_media = NewMedia {
            digest: attachment.digest.clone(),
            filename: attachment.display_name(),
            file_path: stored.path.to_string_lossy().into_owned(),
            size_bytes,
            board_id: board.id,
            post_id: Some(post.id),
        };

        match db::insert_media(self.db.pool(), &new_media).await? {
            MediaInsert::Created(media) => {
                if !stored.written {
                    thumbnail_failed = self.thumbnail(board, post, &stored.path).await;
                }
                info!(
                    board = %board.name,
                    post = post.source_post_id,
                    digest = %media.digest,
                    path = %media.file_path,
                    bytes = media.size_bytes,
                    "Stored new media"
                );
                Ok(Resolution::Created {
                    media,
                    thumbnail_failed,
                })
            }
            MediaInsert::AlreadyExists(winner) => {
                debug!(
                    board = %board.name,
                    digest = %winner.digest,
                    winner = %winner.file_path,
                    "Digest claimed concurrently, demoting to alias"
                );
                if stored.written && winner.file_path != new_media.file_path {
                    self.discard(&stored.path).await;
                }
                self.record_sighting(board, post, attachment, winner).await
            }
            MediaInsert::PathTaken => {
                if stored.written {
                    self.discard(&stored.path).await;
                }
                Err(HarvestError::Conflict(format!(
                    "storage path {} claimed by other content",
                    new_media.file_path
                )))
            }
        }
    }

    /// Place the attachment's bytes in the board directory.
    ///
    /// The plain name is tried first, then the name with a digest token. A
    /// name owned by a Media row with a different digest is skipped; a file
    /// already on disk with the same digest is adopted without downloading.
    async fn store_file(
        &self,
        dir: &Path,
        board: &Board,
        attachment: &Attachment,
    ) -> Result<StoredFile, HarvestError> {
        let url = attachment.url(&self.media_base_url, &board.name);
        let expected = ExpectedContent {
            size: attachment.size,
            digest: &attachment.digest,
        };
        let token = digest_token(&attachment.digest, DIGEST_TOKEN_LEN);

        for token in [None, Some(token.as_str())] {
            let name = storage_file_name(
                &board.name,
                attachment.size,
                &attachment.filename,
                &attachment.ext,
                self.max_filename_bytes,
                token,
            );
            let path = dir.join(name);

            let path_str = path.to_string_lossy();
            if let Some(owner) = db::get_media_by_path(self.db.pool(), &path_str).await? {
                if owner.digest != attachment.digest {
                    debug!(path = %path.display(), "Storage name owned by other content");
                    continue;
                }
            }

            match self.downloader.download(&url, &path, expected).await {
                Ok(bytes) => {
                    return Ok(StoredFile {
                        path,
                        bytes,
                        written: true,
                    })
                }
                Err(DownloadError::DestinationExists(_)) => {
                    let existing = digest_file(&path)
                        .await
                        .map_err(|e| HarvestError::filesystem(&path, e))?;
                    if existing == attachment.digest {
                        let bytes = tokio::fs::metadata(&path)
                            .await
                            .map_err(|e| HarvestError::filesystem(&path, e))?
                            .len();
                        debug!(path = %path.display(), "Adopting identical file already on disk");
                        return Ok(StoredFile {
                            path,
                            bytes,
                            written: false,
                        });
                    }
                    debug!(path = %path.display(), "Storage name taken on disk by other content");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(HarvestError::Conflict(format!(
            "no free storage name for digest {} on /{}/",
            attachment.digest, board.name
        )))
    }

    /// Extract the thumbnail for a stored file unless one exists or another
    /// worker is extracting it. Returns whether extraction failed.
    async fn thumbnail(&self, board: &Board, post: &Post, path: &Path) -> bool {
        let Some(_claim) = self.thumbnail_claims.try_claim(path) else {
            debug!(path = %path.display(), "Thumbnail already being extracted");
            return false;
        };
        if tokio::fs::try_exists(thumbnail_path(path)).await.unwrap_or(false) {
            return false;
        }

        match self.thumbnailer.generate(path).await {
            Ok(_) => false,
            Err(e) => {
                warn!(
                    board = %board.name,
                    post = post.source_post_id,
                    path = %path.display(),
                    error = %e,
                    "Thumbnail generation failed"
                );
                true
            }
        }
    }

    async fn discard(&self, path: &Path) {
        for target in [path.to_path_buf(), thumbnail_path(path)] {
            if let Err(e) = remove_file_if_exists(&target).await {
                warn!(path = %target.display(), error = %e, "Failed to remove duplicate file");
            }
        }
    }
}
