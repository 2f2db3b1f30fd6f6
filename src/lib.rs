//! Harvester Core Library
//!
//! Drives a browser through a paginated bibliographic search listing,
//! extracts one [`Record`] per result row, persists the records and fetches
//! each record's document.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`render`] - Rendering sources: a WebDriver client and an in-memory browser
//! - [`extract`] - Listing layout and field extraction strategies
//! - [`harvest`] - Search submission, page traversal and the end-to-end run
//! - [`failure`] - Consecutive failure tracking
//! - [`retry`] - Retry policies shared by clicks and downloads
//! - [`download`] - Artifact fetching, content sniffing and file naming
//! - [`db`] - Database connection and schema management
//! - [`sink`] - Record persistence

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod db;
pub mod download;
pub mod extract;
pub mod failure;
pub mod harvest;
pub mod record;
pub mod render;
pub mod retry;
pub mod sink;
mod user_agent;

// Re-export commonly used types
pub use db::{Database, DbError};
pub use download::{
    DownloadOutcome, DownloadPipeline, DownloadStatus, DownloadSummary, FailureReason,
    FetchError, FetchSession, SkipReason,
};
pub use extract::{ExtractionEngine, ListingLayout};
pub use failure::FailureTracker;
pub use harvest::{
    DEFAULT_TARGET_COUNT, Harvest, HarvestError, HarvestRun, Pacing, PaginationController,
    RunOptions, RunReport, SearchForm, StopReason,
};
pub use record::{Record, RecordKey};
pub use render::{RenderError, RenderingSource};
pub use retry::RetryPolicy;
pub use sink::{NullSink, RecordSink, SinkError, SqliteSink};
