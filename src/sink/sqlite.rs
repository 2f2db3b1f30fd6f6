//! SQLite-backed record sink.

use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::{RecordSink, SinkError, new_run_id};
use crate::db::Database;
use crate::record::{Record, RecordKey};

/// Writes records to the `records` table, tagged with one run id.
#[derive(Debug, Clone)]
pub struct SqliteSink {
    db: Database,
    run_id: String,
}

impl SqliteSink {
    /// Wraps an open database with a freshly generated run id.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self {
            db,
            run_id: new_run_id(),
        }
    }

    /// Opens the database file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Db`] if the database cannot be opened or migrated.
    pub async fn open(path: &Path) -> Result<Self, SinkError> {
        Ok(Self::new(Database::new(path).await?))
    }

    /// # Errors
    ///
    /// Returns [`SinkError::Db`] if the in-memory database cannot be created.
    pub async fn in_memory() -> Result<Self, SinkError> {
        Ok(Self::new(Database::new_in_memory().await?))
    }

    #[must_use]
    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = run_id.into();
        self
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    #[must_use]
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Rows written by this run.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Query`] if the query fails.
    pub async fn count(&self) -> Result<u64, SinkError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM records WHERE run_id = ?")
            .bind(&self.run_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// File name associated with the record at `key` in this run, if any.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError::Query`] if the query fails.
    pub async fn file_name(&self, key: RecordKey) -> Result<Option<String>, SinkError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT file_name FROM records WHERE run_id = ? AND record_key = ?")
                .bind(&self.run_id)
                .bind(key.to_string())
                .fetch_optional(self.db.pool())
                .await?;
        Ok(row.and_then(|(file_name,)| file_name))
    }

    pub async fn close(self) {
        self.db.close().await;
    }
}

#[async_trait]
impl RecordSink for SqliteSink {
    async fn ensure_schema(&self) -> Result<(), SinkError> {
        self.db.migrate().await?;
        Ok(())
    }

    #[instrument(skip(self, records), fields(run_id = %self.run_id, records = records.len()))]
    async fn bulk_insert(&self, records: &[Record]) -> Result<u64, SinkError> {
        let mut tx = self.db.pool().begin().await?;
        let mut inserted = 0;
        for record in records {
            let result = sqlx::query(
                "INSERT INTO records (run_id, record_key, title, authors, pub_date, page) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&self.run_id)
            .bind(record.key().to_string())
            .bind(record.title())
            .bind(record.authors())
            .bind(record.publication_date())
            .bind(i64::from(record.page_index()))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        info!(inserted, "records persisted");
        Ok(inserted)
    }

    async fn associate_file(&self, record: &Record, file_name: &str) -> Result<bool, SinkError> {
        let result = sqlx::query(
            "UPDATE records SET file_name = ? \
             WHERE run_id = ? AND record_key = ? AND file_name IS NULL",
        )
        .bind(file_name)
        .bind(&self.run_id)
        .bind(record.key().to_string())
        .execute(self.db.pool())
        .await?;
        debug!(key = %record.key(), file_name, rows = result.rows_affected(), "file name update");
        Ok(result.rows_affected() > 0)
    }
}
