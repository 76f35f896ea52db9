mod migrations;
mod models;
mod queries;

pub use models::*;
pub use queries::*;

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::info;

use crate::config::Config;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Handle to the metadata store. Cheap to clone; passed explicitly to every
/// component that reads or writes rows.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the store at `path` with the default pool size.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails, migrations fail, or the file
    /// is not writable.
    pub async fn new(path: &Path) -> Result<Self> {
        Self::open(path, DEFAULT_MAX_CONNECTIONS).await
    }

    /// Open the store with a pool sized for the configured concurrency: one
    /// connection per in-flight thread plus one for board bookkeeping.
    ///
    /// # Errors
    ///
    /// See [`Database::new`].
    pub async fn for_config(config: &Config) -> Result<Self> {
        let in_flight = config
            .board_concurrency
            .saturating_mul(config.thread_concurrency)
            .saturating_add(1);
        let max_connections = u32::try_from(in_flight).unwrap_or(u32::MAX).clamp(2, 32);
        Self::open(&config.database_path, max_connections).await
    }

    async fn open(path: &Path, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Board and thread workers write concurrently and SQLite serializes
            // writers, so wait for the lock instead of failing with SQLITE_BUSY.
            .busy_timeout(Duration::from_secs(10));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open metadata store at {}", path.display()))?;

        let db = Self { pool };
        db.migrate().await?;
        db.check_writable(path).await?;

        info!(
            path = %path.display(),
            max_connections,
            schema_version = migrations::LATEST_VERSION,
            "Metadata store ready"
        );
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        migrations::run(&self.pool).await?;
        let version = self.schema_version().await?;
        if version != migrations::LATEST_VERSION {
            bail!(
                "schema version {version} does not match expected {}",
                migrations::LATEST_VERSION
            );
        }
        Ok(())
    }

    /// Fails on a read-only store before any pass starts.
    async fn check_writable(&self, path: &Path) -> Result<()> {
        let mut tx = self.pool.begin().await.with_context(|| {
            format!("Metadata store is not writable: {}", path.display())
        })?;
        sqlx::query("UPDATE _schema_version SET version = version")
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Metadata store is not writable: {}", path.display()))?;
        tx.rollback()
            .await
            .context("Failed to roll back writability check")?;
        Ok(())
    }

    /// Current schema version recorded in the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the version table cannot be read.
    pub async fn schema_version(&self) -> Result<i32> {
        migrations::get_schema_version(&self.pool).await
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
