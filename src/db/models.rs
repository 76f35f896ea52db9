use serde::{Deserialize, Serialize};

/// An external origin, e.g. one imageboard installation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Host {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

/// A named partition within a host.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Board {
    pub id: i64,
    pub host_id: i64,
    pub name: String,
    pub created_at: String,
}

/// A discussion thread, keyed by the origin's thread number.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Thread {
    pub id: i64,
    pub board_id: i64,
    pub thread_ident: i64,
    pub subject: Option<String>,
    pub created_at: String,
}

/// One message in a thread. Never updated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: i64,
    pub thread_id: i64,
    pub source_post_id: i64,
    pub posted_at: String,
    pub body_content: String,
    pub created_at: String,
}

/// A reply reference from one post to another post number.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct PostReply {
    pub id: i64,
    pub post_id: i64,
    pub target_source_id: i64,
    pub target_post_id: Option<i64>,
}

/// One physically stored file. `digest` is unique across the table.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Media {
    pub id: i64,
    pub digest: String,
    pub filename: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub board_id: i64,
    /// `None` for files backfilled from disk without provenance.
    pub post_id: Option<i64>,
    pub created_at: String,
}

/// A repeat sighting of an already stored file.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaAlias {
    pub id: i64,
    pub media_id: i64,
    pub digest: String,
    pub filename: String,
    pub post_id: i64,
    pub board_id: i64,
    pub created_at: String,
}

/// Data for inserting a new post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub thread_id: i64,
    pub source_post_id: i64,
    pub posted_at: String,
    pub body_content: String,
}

/// Data for inserting a new media row.
#[derive(Debug, Clone)]
pub struct NewMedia {
    pub digest: String,
    pub filename: String,
    pub file_path: String,
    pub size_bytes: i64,
    pub board_id: i64,
    pub post_id: Option<i64>,
}

/// Data for inserting a new media alias.
#[derive(Debug, Clone)]
pub struct NewMediaAlias {
    pub media_id: i64,
    pub digest: String,
    pub filename: String,
    pub post_id: i64,
    pub board_id: i64,
}

/// Outcome of a media insert guarded by the digest uniqueness constraint.
#[derive(Debug, Clone)]
pub enum MediaInsert {
    Created(Media),
    /// Another writer claimed this digest first.
    AlreadyExists(Media),
    /// The storage path belongs to a row with a different digest.
    PathTaken,
}
