//! Persistence of harvested records.
//!
//! The harvest hands its records to a [`RecordSink`] as one bulk insert and
//! later asks it to associate downloaded file names with individual records.
//! Persistence is best effort: when no database is reachable the run uses
//! [`NullSink`] and keeps going.

mod sqlite;

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

pub use sqlite::SqliteSink;

use crate::db::DbError;
use crate::record::Record;

/// Errors raised by a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The database could not be opened or migrated.
    #[error(transparent)]
    Db(#[from] DbError),

    /// A statement failed.
    #[error("sink query failed: {0}")]
    Query(#[from] sqlx::Error),
}

/// Destination for harvested records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Creates the schema if it does not exist yet.
    async fn ensure_schema(&self) -> Result<(), SinkError>;

    /// Inserts all records as one unit and returns the rows written.
    async fn bulk_insert(&self, records: &[Record]) -> Result<u64, SinkError>;

    /// Sets the file name of the row for `record` if it has none yet.
    ///
    /// Returns `false` when no row was updated.
    async fn associate_file(&self, record: &Record, file_name: &str) -> Result<bool, SinkError>;

    /// `false` for sinks that drop everything.
    fn is_available(&self) -> bool {
        true
    }
}

/// Sink used when persistence is disabled or unreachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl RecordSink for NullSink {
    async fn ensure_schema(&self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn bulk_insert(&self, _records: &[Record]) -> Result<u64, SinkError> {
        Ok(0)
    }

    async fn associate_file(&self, _record: &Record, _file_name: &str) -> Result<bool, SinkError> {
        Ok(false)
    }

    fn is_available(&self) -> bool {
        false
    }
}

/// Generates an identifier for one run: unix seconds plus a random suffix.
#[must_use]
pub fn new_run_id() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let suffix: u32 = rand::thread_rng().r#gen();
    format!("{secs}-{suffix:08x}")
}
