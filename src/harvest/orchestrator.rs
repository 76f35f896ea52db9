//! Pass orchestration: boards, then threads, then attachments.
//!
//! Boards run concurrently up to `BOARD_CONCURRENCY`, candidate threads within
//! a board up to `THREAD_CONCURRENCY`, and the posts of one thread strictly in
//! document order. There is no persistent run entity; every pass repeats the
//! full walk and relies on the idempotence of the steps below it.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::catalog::{CandidateFilter, CatalogScanner};
use super::download::Downloader;
use super::ingest::ThreadIngester;
use super::resolver::{MediaResolver, Resolution};
use super::thumbnail::Thumbnailer;
use super::{ErrorClass, HarvestError};
use crate::api::ApiClient;
use crate::config::Config;
use crate::db::{self, Board, Database};

/// Where a pass currently is. Only used for logging transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    ScanningBoard(String),
    IngestingThread { board: String, thread: u64 },
    ResolvingMedia { board: String, post: i64 },
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ScanningBoard(board) => write!(f, "scanning /{board}/"),
            Self::IngestingThread { board, thread } => write!(f, "ingesting /{board}/{thread}"),
            Self::ResolvingMedia { board, post } => write!(f, "resolving /{board}/ post {post}"),
        }
    }
}

/// Counters accumulated over a board's pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassCounts {
    pub threads_scanned: usize,
    /// Threads stored for the first time this pass.
    pub threads_new: usize,
    pub threads_failed: usize,
    pub posts_seen: usize,
    /// Posts stored for the first time this pass.
    pub posts_new: usize,
    pub media_created: usize,
    pub aliases_recorded: usize,
    pub already_recorded: usize,
    pub download_failures: usize,
    pub thumbnail_failures: usize,
    pub malformed_skipped: usize,
    pub conflicts: usize,
}

impl PassCounts {
    fn merge(&mut self, other: &Self) {
        self.threads_scanned += other.threads_scanned;
        self.threads_new += other.threads_new;
        self.threads_failed += other.threads_failed;
        self.posts_seen += other.posts_seen;
        self.posts_new += other.posts_new;
        self.media_created += other.media_created;
        self.aliases_recorded += other.aliases_recorded;
        self.already_recorded += other.already_recorded;
        self.download_failures += other.download_failures;
        self.thumbnail_failures += other.thumbnail_failures;
        self.malformed_skipped += other.malformed_skipped;
        self.conflicts += other.conflicts;
    }
}

/// Outcome of one board's pass.
#[derive(Debug, Clone)]
pub struct BoardSummary {
    pub board: String,
    pub counts: PassCounts,
    /// Why the board's remaining work was abandoned, if it was.
    pub aborted: Option<String>,
    /// Whether the abort was caused by a filesystem or database failure.
    pub fatal: bool,
}

impl BoardSummary {
    fn new(board: &str) -> Self {
        Self {
            board: board.to_string(),
            counts: PassCounts::default(),
            aborted: None,
            fatal: false,
        }
    }

    fn abort(&mut self, error: &HarvestError) {
        if self.aborted.is_none() {
            self.aborted = Some(error.to_string());
            self.fatal = error.is_fatal();
        }
    }

    /// A board whose task panicked. Its state is unknown, so it counts as fatal.
    fn panicked(board: &str, error: &tokio::task::JoinError) -> Self {
        let mut summary = Self::new(board);
        summary.aborted = Some(format!("task panicked: {error}"));
        summary.fatal = true;
        summary
    }

    fn log(&self) {
        let c = &self.counts;
        info!(
            board = %self.board,
            threads_scanned = c.threads_scanned,
            threads_new = c.threads_new,
            threads_failed = c.threads_failed,
            posts_seen = c.posts_seen,
            posts_new = c.posts_new,
            media_created = c.media_created,
            aliases_recorded = c.aliases_recorded,
            already_recorded = c.already_recorded,
            download_failures = c.download_failures,
            thumbnail_failures = c.thumbnail_failures,
            malformed_skipped = c.malformed_skipped,
            conflicts = c.conflicts,
            aborted = self.aborted.as_deref().unwrap_or("no"),
            "Board pass complete"
        );
    }
}

/// Outcome of one full pass over the configured boards.
#[derive(Debug, Clone, Default)]
pub struct PassReport {
    pub boards: Vec<BoardSummary>,
    /// The pass stopped early because shutdown was requested.
    pub cancelled: bool,
}

impl PassReport {
    /// Whether any board hit a filesystem or database failure, or panicked.
    #[must_use]
    pub fn has_fatal(&self) -> bool {
        self.boards.iter().any(|b| b.fatal)
    }

    #[must_use]
    pub fn totals(&self) -> PassCounts {
        let mut totals = PassCounts::default();
        for board in &self.boards {
            totals.merge(&board.counts);
        }
        totals
    }
}

struct ThreadOutcome {
    thread: u64,
    counts: PassCounts,
    failure: Option<HarvestError>,
}

/// Drives catalog scanning, thread ingestion and media resolution.
#[derive(Clone)]
pub struct Harvester {
    db: Database,
    host_name: String,
    boards: Vec<String>,
    thread_concurrency: usize,
    semaphore: Arc<Semaphore>,
    scanner: CatalogScanner,
    ingester: ThreadIngester,
    resolver: MediaResolver,
}

impl Harvester {
    #[must_use]
    pub fn new(
        config: &Config,
        db: Database,
        scanner: CatalogScanner,
        ingester: ThreadIngester,
        resolver: MediaResolver,
    ) -> Self {
        Self {
            db,
            host_name: config.host_name.clone(),
            boards: config.boards.clone(),
            thread_concurrency: config.thread_concurrency.max(1),
            semaphore: Arc::new(Semaphore::new(config.board_concurrency.max(1))),
            scanner,
            ingester,
            resolver,
        }
    }

    /// Wire every component from configuration around a shared API client.
    #[must_use]
    pub fn from_config(
        config: &Config,
        db: Database,
        api: ApiClient,
        thumbnailer: Arc<dyn Thumbnailer>,
    ) -> Self {
        let scanner = CatalogScanner::new(api.clone(), CandidateFilter::from_config(config));
        let downloader = Downloader::new(api.http().clone(), config);
        let ingester = ThreadIngester::new(api, db.clone());
        let resolver = MediaResolver::new(config, db.clone(), downloader, thumbnailer);
        Self::new(config, db, scanner, ingester, resolver)
    }

    /// Run one pass over every configured board.
    ///
    /// Cancellation is honoured between boards and between threads; a thread
    /// that has started is always allowed to finish.
    ///
    /// # Errors
    ///
    /// Returns an error only if the host row cannot be created. Board-level
    /// failures are reported in the returned [`PassReport`].
    pub async fn run_pass(&self, cancel: &CancellationToken) -> Result<PassReport> {
        let host = db::get_or_create_host(self.db.pool(), &self.host_name)
            .await
            .context("Failed to get or create host")?;

        let mut handles = Vec::new();
        for name in &self.boards {
            if cancel.is_cancelled() {
                break;
            }
            let permit = self.semaphore.clone().acquire_owned().await?;
            if cancel.is_cancelled() {
                break;
            }

            let this = self.clone();
            let cancel = cancel.clone();
            let board_name = name.clone();
            let host_id = host.id;
            let handle = tokio::spawn(async move {
                let _permit = permit;
                this.run_board(host_id, &board_name, &cancel).await
            });
            handles.push((name.clone(), handle));
        }

        let mut report = PassReport::default();
        for (name, handle) in handles {
            match handle.await {
                Ok(summary) => report.boards.push(summary),
                Err(e) => {
                    error!(board = %name, error = %e, "Board task panicked");
                    report.boards.push(BoardSummary::panicked(&name, &e));
                }
            }
        }
        report.cancelled = cancel.is_cancelled();

        debug!(state = %RunState::Idle, cancelled = report.cancelled, "Pass finished");
        Ok(report)
    }

    async fn run_board(&self, host_id: i64, name: &str, cancel: &CancellationToken) -> BoardSummary {
        let mut summary = BoardSummary::new(name);
        debug!(state = %RunState::ScanningBoard(name.to_string()), "Board pass started");

        let board = match db::get_or_create_board(self.db.pool(), host_id, name).await {
            Ok(board) => board,
            Err(e) => {
                let e = HarvestError::Database(e);
                error!(board = %name, error = %e, "Failed to get or create board");
                summary.abort(&e);
                summary.log();
                return summary;
            }
        };

        let candidates = match self.scanner.scan(name).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(board = %name, error = %e, "Catalog scan failed, skipping board for this pass");
                summary.abort(&HarvestError::Api(e));
                summary.log();
                return summary;
            }
        };

        // Stops new threads on a fatal failure without touching the caller's token.
        let stop = cancel.child_token();
        let mut outcomes = stream::iter(candidates)
            .map(|thread_no| self.process_thread(&board, thread_no, &stop))
            .buffer_unordered(self.thread_concurrency);

        while let Some(outcome) = outcomes.next().await {
            let Some(outcome) = outcome else {
                continue;
            };
            summary.counts.merge(&outcome.counts);

            let Some(e) = outcome.failure else {
                continue;
            };
            if e.is_fatal() {
                error!(board = %name, thread = outcome.thread, error = %e, "Fatal error, abandoning board");
                summary.abort(&e);
                stop.cancel();
            } else {
                warn!(board = %name, thread = outcome.thread, error = %e, "Thread skipped for this pass");
            }
        }

        summary.log();
        summary
    }

    /// Ingest one thread and resolve its attachments in document order.
    ///
    /// Returns `None` when the thread was not started because of cancellation.
    async fn process_thread(
        &self,
        board: &Board,
        thread_no: u64,
        stop: &CancellationToken,
    ) -> Option<ThreadOutcome> {
        if stop.is_cancelled() {
            return None;
        }

        let mut counts = PassCounts::default();
        debug!(
            state = %RunState::IngestingThread { board: board.name.clone(), thread: thread_no },
            "Ingesting thread"
        );

        let ingested = match self.ingester.ingest(board, thread_no).await {
            Ok(ingested) => ingested,
            Err(e) => {
                counts.threads_failed += 1;
                if e.class() == ErrorClass::Malformed {
                    counts.malformed_skipped += 1;
                }
                return Some(ThreadOutcome {
                    thread: thread_no,
                    counts,
                    failure: Some(e),
                });
            }
        };

        counts.threads_scanned += 1;
        if ingested.created {
            counts.threads_new += 1;
        }
        counts.posts_seen += ingested.posts.len();
        counts.posts_new += ingested.posts.iter().filter(|p| p.created).count();
        counts.malformed_skipped += ingested.skipped_posts;

        for item in &ingested.posts {
            let Some(attachment) = &item.attachment else {
                continue;
            };
            trace!(
                state = %RunState::ResolvingMedia { board: board.name.clone(), post: item.post.source_post_id },
                "Resolving attachment"
            );

            match self.resolver.resolve(board, &item.post, attachment).await {
                Ok(Resolution::NotTarget) => {}
                Ok(Resolution::Created {
                    thumbnail_failed, ..
                }) => {
                    counts.media_created += 1;
                    if thumbnail_failed {
                        counts.thumbnail_failures += 1;
                    }
                }
                Ok(Resolution::Aliased(_)) => counts.aliases_recorded += 1,
                Ok(Resolution::AlreadyRecorded) => counts.already_recorded += 1,
                Err(e) if e.is_fatal() => {
                    return Some(ThreadOutcome {
                        thread: thread_no,
                        counts,
                        failure: Some(e),
                    });
                }
                Err(e) => {
                    warn!(
                        board = %board.name,
                        thread = thread_no,
                        post = item.post.source_post_id,
                        digest = %attachment.digest,
                        error = %e,
                        "Attachment not resolved, will retry next pass"
                    );
                    match (&e, e.class()) {
                        (HarvestError::Conflict(_), _) => counts.conflicts += 1,
                        (_, ErrorClass::Malformed) => counts.malformed_skipped += 1,
                        _ => counts.download_failures += 1,
                    }
                }
            }
        }

        Some(ThreadOutcome {
            thread: thread_no,
            counts,
            failure: None,
        })
    }
}
