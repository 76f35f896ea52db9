use anyhow::{Context, Result};
use sqlx::SqlitePool;

use super::models::{
    Board, Host, Media, MediaAlias, MediaInsert, NewMedia, NewMediaAlias, NewPost, Post,
    PostReply, Thread,
};

// ========== Hosts & Boards ==========

/// Get or create a host by name.
pub async fn get_or_create_host(pool: &SqlitePool, name: &str) -> Result<Host> {
    sqlx::query("INSERT OR IGNORE INTO hosts (name) VALUES (?)")
        .bind(name)
        .execute(pool)
        .await
        .context("Failed to insert host")?;

    sqlx::query_as("SELECT * FROM hosts WHERE name = ?")
        .bind(name)
        .fetch_one(pool)
        .await
        .context("Failed to fetch host")
}

/// Get or create a board under a host.
pub async fn get_or_create_board(pool: &SqlitePool, host_id: i64, name: &str) -> Result<Board> {
    sqlx::query("INSERT OR IGNORE INTO boards (host_id, name) VALUES (?, ?)")
        .bind(host_id)
        .bind(name)
        .execute(pool)
        .await
        .context("Failed to insert board")?;

    sqlx::query_as("SELECT * FROM boards WHERE host_id = ? AND name = ?")
        .bind(host_id)
        .bind(name)
        .fetch_one(pool)
        .await
        .context("Failed to fetch board")
}

// ========== Threads ==========

/// Get a thread by its board and origin thread number.
pub async fn get_thread(pool: &SqlitePool, board_id: i64, thread_ident: i64) -> Result<Option<Thread>> {
    sqlx::query_as("SELECT * FROM threads WHERE board_id = ? AND thread_ident = ?")
        .bind(board_id)
        .bind(thread_ident)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch thread")
}

/// Get or create a thread. Returns the row and whether it was created.
///
/// An existing thread keeps its fields, except that a missing subject is
/// filled in when one is now known.
pub async fn get_or_create_thread(
    pool: &SqlitePool,
    board_id: i64,
    thread_ident: i64,
    subject: Option<&str>,
) -> Result<(Thread, bool)> {
    let result = sqlx::query(
        "INSERT OR IGNORE INTO threads (board_id, thread_ident, subject) VALUES (?, ?, ?)",
    )
    .bind(board_id)
    .bind(thread_ident)
    .bind(subject)
    .execute(pool)
    .await
    .context("Failed to insert thread")?;
    let created = result.rows_affected() > 0;

    if !created && subject.is_some() {
        sqlx::query(
            "UPDATE threads SET subject = ? WHERE board_id = ? AND thread_ident = ? AND subject IS NULL",
        )
        .bind(subject)
        .bind(board_id)
        .bind(thread_ident)
        .execute(pool)
        .await
        .context("Failed to fill thread subject")?;
    }

    let thread = get_thread(pool, board_id, thread_ident)
        .await?
        .context("Thread missing after insert")?;
    Ok((thread, created))
}

/// Count all threads.
pub async fn count_threads(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM threads")
        .fetch_one(pool)
        .await
        .context("Failed to count threads")?;
    Ok(row.0)
}

// ========== Posts ==========

/// Get a post by its thread and origin post number.
pub async fn get_post_by_source_id(
    pool: &SqlitePool,
    thread_id: i64,
    source_post_id: i64,
) -> Result<Option<Post>> {
    sqlx::query_as("SELECT * FROM posts WHERE thread_id = ? AND source_post_id = ?")
        .bind(thread_id)
        .bind(source_post_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch post")
}

/// Get or create a post. Returns the row and whether it was created.
///
/// Posts are immutable: when the key already exists the stored row is
/// returned unchanged.
pub async fn get_or_create_post(pool: &SqlitePool, post: &NewPost) -> Result<(Post, bool)> {
    let result = sqlx::query(
        r"
        INSERT OR IGNORE INTO posts (thread_id, source_post_id, posted_at, body_content)
        VALUES (?, ?, ?, ?)
        ",
    )
    .bind(post.thread_id)
    .bind(post.source_post_id)
    .bind(&post.posted_at)
    .bind(&post.body_content)
    .execute(pool)
    .await
    .context("Failed to insert post")?;

    let stored = get_post_by_source_id(pool, post.thread_id, post.source_post_id)
        .await?
        .context("Post missing after insert")?;
    Ok((stored, result.rows_affected() > 0))
}

/// Record that a post replies to another post number.
///
/// The target is resolved against posts of the same thread that are already
/// stored; unresolved targets are kept as dangling numbers and resolved when
/// the reference is recorded again after the target exists.
pub async fn insert_post_reply(
    pool: &SqlitePool,
    post_id: i64,
    thread_id: i64,
    target_source_id: i64,
) -> Result<()> {
    sqlx::query(
        r"
        INSERT INTO post_replies (post_id, target_source_id, target_post_id)
        VALUES (?, ?, (SELECT id FROM posts WHERE thread_id = ? AND source_post_id = ?))
        ON CONFLICT (post_id, target_source_id) DO UPDATE
        SET target_post_id = COALESCE(post_replies.target_post_id, excluded.target_post_id)
        ",
    )
    .bind(post_id)
    .bind(target_source_id)
    .bind(thread_id)
    .bind(target_source_id)
    .execute(pool)
    .await
    .context("Failed to insert post reply")?;

    Ok(())
}

/// Get the reply references of a post, ordered by target number.
pub async fn get_post_replies(pool: &SqlitePool, post_id: i64) -> Result<Vec<PostReply>> {
    sqlx::query_as("SELECT * FROM post_replies WHERE post_id = ? ORDER BY target_source_id")
        .bind(post_id)
        .fetch_all(pool)
        .await
        .context("Failed to fetch post replies")
}

/// Count all posts.
pub async fn count_posts(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM posts")
        .fetch_one(pool)
        .await
        .context("Failed to count posts")?;
    Ok(row.0)
}

// ========== Media ==========

/// Get the media row for a digest.
pub async fn get_media_by_digest(pool: &SqlitePool, digest: &str) -> Result<Option<Media>> {
    sqlx::query_as("SELECT * FROM media WHERE digest = ?")
        .bind(digest)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch media by digest")
}

/// Get the media row stored at a path.
pub async fn get_media_by_path(pool: &SqlitePool, file_path: &str) -> Result<Option<Media>> {
    sqlx::query_as("SELECT * FROM media WHERE file_path = ?")
        .bind(file_path)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch media by path")
}

/// Insert a media row.
///
/// The UNIQUE constraint on `digest` is the only arbiter between concurrent
/// writers: a violation is reported as [`MediaInsert::AlreadyExists`] with the
/// winning row rather than as an error.
pub async fn insert_media(pool: &SqlitePool, media: &NewMedia) -> Result<MediaInsert> {
    let result = sqlx::query(
        r"
        INSERT INTO media (digest, filename, file_path, size_bytes, board_id, post_id)
        VALUES (?, ?, ?, ?, ?, ?)
        ",
    )
    .bind(&media.digest)
    .bind(&media.filename)
    .bind(&media.file_path)
    .bind(media.size_bytes)
    .bind(media.board_id)
    .bind(media.post_id)
    .execute(pool)
    .await;

    match result {
        Ok(done) => {
            let created: Media = sqlx::query_as("SELECT * FROM media WHERE id = ?")
                .bind(done.last_insert_rowid())
                .fetch_one(pool)
                .await
                .context("Failed to fetch media after insert")?;
            Ok(MediaInsert::Created(created))
        }
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            match get_media_by_digest(pool, &media.digest).await? {
                Some(existing) => Ok(MediaInsert::AlreadyExists(existing)),
                None => Ok(MediaInsert::PathTaken),
            }
        }
        Err(e) => Err(anyhow::Error::new(e).context("Failed to insert media")),
    }
}

/// List every media row, oldest first.
pub async fn list_media(pool: &SqlitePool) -> Result<Vec<Media>> {
    sqlx::query_as("SELECT * FROM media ORDER BY id")
        .fetch_all(pool)
        .await
        .context("Failed to list media")
}

/// Count all media rows.
pub async fn count_media(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM media")
        .fetch_one(pool)
        .await
        .context("Failed to count media")?;
    Ok(row.0)
}

// ========== Media Aliases ==========

/// Get the alias row for an exact (post, digest, filename) tuple.
pub async fn get_media_alias(
    pool: &SqlitePool,
    post_id: i64,
    digest: &str,
    filename: &str,
) -> Result<Option<MediaAlias>> {
    sqlx::query_as("SELECT * FROM media_aliases WHERE post_id = ? AND digest = ? AND filename = ?")
        .bind(post_id)
        .bind(digest)
        .bind(filename)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch media alias")
}

/// Insert an alias. Returns `false` when the exact tuple was already recorded.
pub async fn insert_media_alias(pool: &SqlitePool, alias: &NewMediaAlias) -> Result<bool> {
    let result = sqlx::query(
        r"
        INSERT OR IGNORE INTO media_aliases (media_id, digest, filename, post_id, board_id)
        VALUES (?, ?, ?, ?, ?)
        ",
    )
    .bind(alias.media_id)
    .bind(&alias.digest)
    .bind(&alias.filename)
    .bind(alias.post_id)
    .bind(alias.board_id)
    .execute(pool)
    .await
    .context("Failed to insert media alias")?;

    Ok(result.rows_affected() > 0)
}

/// Get every alias of a media row.
pub async fn get_aliases_for_media(pool: &SqlitePool, media_id: i64) -> Result<Vec<MediaAlias>> {
    sqlx::query_as("SELECT * FROM media_aliases WHERE media_id = ? ORDER BY id")
        .bind(media_id)
        .fetch_all(pool)
        .await
        .context("Failed to fetch media aliases")
}

/// Count all alias rows.
pub async fn count_media_aliases(pool: &SqlitePool) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM media_aliases")
        .fetch_one(pool)
        .await
        .context("Failed to count media aliases")?;
    Ok(row.0)
}
