//! Thread ingestion: upsert one thread and its posts.

use chrono::DateTime;
use tracing::{debug, warn};

use super::quotelinks::extract_reply_ids;
use super::HarvestError;
use crate::api::{ApiClient, Attachment, ThreadPost};
use crate::db::{self, Board, Database, NewPost, Post, Thread};

/// A stored post paired with its attachment metadata, if any.
#[derive(Debug, Clone)]
pub struct IngestedPost {
    pub post: Post,
    pub attachment: Option<Attachment>,
    /// Whether this ingestion inserted the row.
    pub created: bool,
}

/// Result of ingesting one thread.
#[derive(Debug, Clone)]
pub struct IngestedThread {
    pub thread: Thread,
    pub created: bool,
    /// Posts in document order.
    pub posts: Vec<IngestedPost>,
    /// Posts dropped because their data was unusable.
    pub skipped_posts: usize,
}

#[derive(Debug, Clone)]
pub struct ThreadIngester {
    api: ApiClient,
    db: Database,
}

impl ThreadIngester {
    #[must_use]
    pub fn new(api: ApiClient, db: Database) -> Self {
        Self { api, db }
    }

    /// Fetch a thread and get-or-create its Thread and Post rows.
    ///
    /// Posts are processed strictly in document order so reply references
    /// resolve against rows inserted earlier in the same pass.
    pub async fn ingest(&self, board: &Board, thread_no: u64) -> Result<IngestedThread, HarvestError> {
        let document = self.api.fetch_thread(&board.name, thread_no).await?;
        let pool = self.db.pool();

        let ident = to_db_id(thread_no, "thread number")?;
        let (thread, created) =
            db::get_or_create_thread(pool, board.id, ident, document.subject()).await?;

        let mut posts = Vec::with_capacity(document.posts.len());
        let mut skipped_posts = 0;

        for source in &document.posts {
            match self.ingest_post(&thread, source).await {
                Ok(ingested) => posts.push(ingested),
                Err(HarvestError::Malformed(message)) => {
                    warn!(
                        board = %board.name,
                        thread = thread_no,
                        post = source.no,
                        reason = %message,
                        "Skipping malformed post"
                    );
                    skipped_posts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            board = %board.name,
            thread = thread_no,
            created,
            posts = posts.len(),
            skipped = skipped_posts,
            "Thread ingested"
        );

        Ok(IngestedThread {
            thread,
            created,
            posts,
            skipped_posts,
        })
    }

    async fn ingest_post(&self, thread: &Thread, source: &ThreadPost) -> Result<IngestedPost, HarvestError> {
        let pool = self.db.pool();
        let source_post_id = to_db_id(source.no, "post number")?;
        let posted_at = DateTime::from_timestamp(source.time, 0)
            .ok_or_else(|| HarvestError::Malformed(format!("post time out of range: {}", source.time)))?
            .to_rfc3339();
        let body = source.com.clone().unwrap_or_default();

        let new_post = NewPost {
            thread_id: thread.id,
            source_post_id,
            posted_at,
            body_content: body,
        };
        let (post, created) = db::get_or_create_post(pool, &new_post).await?;

        // Recorded on every pass so dangling references resolve once their target exists.
        for target in extract_reply_ids(&post.body_content) {
            let Ok(target) = i64::try_from(target) else {
                continue;
            };
            db::insert_post_reply(pool, post.id, thread.id, target).await?;
        }

        Ok(IngestedPost {
            post,
            attachment: source.attachment(),
            created,
        })
    }
}

fn to_db_id(value: u64, what: &str) -> Result<i64, HarvestError> {
    i64::try_from(value).map_err(|_| HarvestError::Malformed(format!("{what} out of range: {value}")))
}
