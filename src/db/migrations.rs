use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::debug;

/// Schema version after every migration below has been applied.
pub const LATEST_VERSION: i32 = 2;

/// Run all pending migrations.
pub async fn run(pool: &SqlitePool) -> Result<()> {
    create_migration_table(pool).await?;
    let current_version = get_schema_version(pool).await?;

    if current_version < 1 {
        debug!("Running migration v1");
        run_migration_v1(pool).await?;
        set_schema_version(pool, 1).await?;
    }

    if current_version < 2 {
        debug!("Running migration v2");
        run_migration_v2(pool).await?;
        set_schema_version(pool, 2).await?;
    }

    Ok(())
}

async fn create_migration_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS _schema_version (
            version INTEGER PRIMARY KEY
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create schema version table")?;

    Ok(())
}

pub async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let row: Option<(i32,)> = sqlx::query_as("SELECT version FROM _schema_version LIMIT 1")
        .fetch_optional(pool)
        .await
        .context("Failed to get schema version")?;

    Ok(row.map_or(0, |(v,)| v))
}

async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("DELETE FROM _schema_version")
        .execute(pool)
        .await?;
    sqlx::query("INSERT INTO _schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;
    Ok(())
}

async fn run_migration_v1(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v1: creating initial schema");

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS hosts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT UNIQUE NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create hosts table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS boards (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            host_id INTEGER NOT NULL REFERENCES hosts(id),
            name TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (host_id, name)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create boards table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS threads (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            board_id INTEGER NOT NULL REFERENCES boards(id),
            thread_ident INTEGER NOT NULL,
            subject TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (board_id, thread_ident)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create threads table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS posts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id INTEGER NOT NULL REFERENCES threads(id),
            source_post_id INTEGER NOT NULL,
            posted_at TEXT NOT NULL,
            body_content TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (thread_id, source_post_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create posts table")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS media (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            digest TEXT NOT NULL,
            filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            board_id INTEGER NOT NULL REFERENCES boards(id),
            post_id INTEGER REFERENCES posts(id),
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create media table")?;

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_media_digest ON media(digest)")
        .execute(pool)
        .await
        .context("Failed to create media digest index")?;

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_media_file_path ON media(file_path)")
        .execute(pool)
        .await
        .context("Failed to create media path index")?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS media_aliases (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            media_id INTEGER NOT NULL REFERENCES media(id),
            digest TEXT NOT NULL,
            filename TEXT NOT NULL,
            post_id INTEGER NOT NULL REFERENCES posts(id),
            board_id INTEGER NOT NULL REFERENCES boards(id),
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (post_id, digest, filename)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create media_aliases table")?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_media_aliases_digest ON media_aliases(digest)")
        .execute(pool)
        .await
        .context("Failed to create alias digest index")?;

    Ok(())
}

async fn run_migration_v2(pool: &SqlitePool) -> Result<()> {
    debug!("Running migration v2: post reply linkage");

    // target_post_id stays NULL when the quoted post was never ingested
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS post_replies (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            post_id INTEGER NOT NULL REFERENCES posts(id),
            target_source_id INTEGER NOT NULL,
            target_post_id INTEGER REFERENCES posts(id),
            UNIQUE (post_id, target_source_id)
        )
        ",
    )
    .execute(pool)
    .await
    .context("Failed to create post_replies table")?;

    Ok(())
}
