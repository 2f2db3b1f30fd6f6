//! Database connection and schema management.
//!
//! This module provides SQLite database connectivity with:
//! - Connection pool management
//! - WAL mode and a busy timeout for file databases
//! - Automatic migration execution
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::Database;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new(Path::new("harvest.db")).await?;
//! # db.close().await;
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Kept low for SQLite since it uses file-level locking.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database-related errors.
#[derive(Error, Debug)]
pub enum DbError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connection(#[from] sqlx::Error),

    /// Failed to run migrations.
    #[error("failed to run migrations: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// SQLite connection pool with the records schema applied.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path`, enables WAL
    /// mode and runs pending migrations.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument(skip(db_path), fields(path = %db_path.display()))]
    pub async fn new(db_path: &Path) -> Result<Self, DbError> {
        // Connect options apply to every pooled connection.
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        debug!("record database opened");

        let db = Self { pool };
        if !db.is_wal_enabled().await? {
            warn!("journal mode is not WAL, concurrent readers may block");
        }
        db.migrate().await?;
        Ok(db)
    }

    /// Creates an in-memory database for testing.
    ///
    /// A single connection keeps the database alive for the pool's lifetime.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the connection fails,
    /// or `DbError::Migration` if migrations fail.
    #[instrument]
    pub async fn new_in_memory() -> Result<Self, DbError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Runs pending migrations; idempotent.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Migration` if a migration fails.
    pub async fn migrate(&self) -> Result<(), DbError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checks if WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns `DbError::Connection` if the query fails.
    #[instrument(skip(self))]
    pub async fn is_wal_enabled(&self) -> Result<bool, DbError> {
        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&self.pool)
            .await?;

        Ok(result.0.to_lowercase() == "wal")
    }

    /// Gracefully closes all connections in the pool.
    #[instrument(skip(self))]
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_new_in_memory_succeeds() {
        let db = Database::new_in_memory().await;
        assert!(db.is_ok(), "Failed to create in-memory database");
    }

    #[tokio::test]
    async fn test_records_table_exists_after_migration() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO records (run_id, record_key, title, page) VALUES ('r1', '1:1', 'Paper', 1)",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_ok(), "records table should exist after migration");
    }

    #[tokio::test]
    async fn test_empty_title_rejected_by_check_constraint() {
        let db = Database::new_in_memory().await.unwrap();

        let result = sqlx::query(
            "INSERT INTO records (run_id, record_key, title, page) VALUES ('r1', '1:1', '', 1)",
        )
        .execute(db.pool())
        .await;

        assert!(result.is_err(), "empty title should be rejected");
    }

    #[tokio::test]
    async fn test_record_key_unique_per_run() {
        let db = Database::new_in_memory().await.unwrap();
        let insert = "INSERT INTO records (run_id, record_key, title, page) VALUES (?, '1:1', 'Paper', 1)";

        sqlx::query(insert).bind("r1").execute(db.pool()).await.unwrap();
        assert!(sqlx::query(insert).bind("r1").execute(db.pool()).await.is_err());
        assert!(sqlx::query(insert).bind("r2").execute(db.pool()).await.is_ok());
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let db = Database::new_in_memory().await.unwrap();
        db.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_database_with_tempfile() {
        let temp_dir = tempfile::tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db = Database::new(&db_path).await.unwrap();
        assert!(
            db.is_wal_enabled().await.unwrap(),
            "WAL mode should be enabled for file-based database"
        );
        db.close().await;
    }
}
