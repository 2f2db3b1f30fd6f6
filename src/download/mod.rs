//! Artifact download pipeline.
//!
//! Records that carry a download reference are fetched one at a time with
//! the rendering session's cookies and user agent. The first bytes of each
//! body decide the file extension (or reject the body as an error page);
//! accepted bodies are streamed to `<name>.part` and renamed into place.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use harvester_core::download::{DownloadPipeline, FetchSession};
//! use harvester_core::sink::NullSink;
//! use url::Url;
//!
//! # async fn example(records: Vec<harvester_core::Record>) -> Result<(), Box<dyn std::error::Error>> {
//! let origin = Url::parse("https://www.cnki.net")?;
//! let session = FetchSession::new(&[], &origin, None, Duration::from_secs(60))?;
//! let pipeline = DownloadPipeline::new(session, "./downloads", None);
//! let (_outcomes, summary) = pipeline.fetch_all(&records, &NullSink, |_| {}).await;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod error;
mod filename;
mod pipeline;
mod sniff;

use std::fmt;

use serde::Serialize;

pub use client::FetchSession;
pub use constants::{DEFAULT_REFERER, DEFAULT_TIMEOUT, PART_SUFFIX, SNIFF_LEN};
pub use error::FetchError;
pub use filename::{MAX_NAME_BYTES, MAX_NAME_CHARS, PLACEHOLDER_NAME, file_name_for, sanitize_title};
pub use pipeline::DownloadPipeline;
pub use sniff::{ArtifactKind, Sniffed, sniff};

use crate::record::Record;

/// Why a record was not downloaded although nothing failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SkipReason {
    /// The final file already exists in the output directory.
    AlreadyExists,
}

/// Why a download failed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum FailureReason {
    /// The server answered with a status other than 200.
    HttpStatus(u16),
    /// An error or HTML page was served instead of the artifact.
    ErrorPage,
    /// The body was empty.
    EmptyBody,
    Network(String),
    WriteError(String),
    /// The record's download reference is missing or not a usable URL.
    InvalidReference,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HttpStatus(status) => write!(f, "HTTP {status}"),
            Self::ErrorPage => f.write_str("error page served instead of artifact"),
            Self::EmptyBody => f.write_str("empty body"),
            Self::Network(message) => write!(f, "network: {message}"),
            Self::WriteError(message) => write!(f, "write failed: {message}"),
            Self::InvalidReference => f.write_str("invalid download reference"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum DownloadStatus {
    Success,
    Skipped(SkipReason),
    Failed(FailureReason),
}

/// Result of one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadOutcome {
    pub record: Record,
    /// File name inside the output directory; set only on success.
    pub local_file_name: Option<String>,
    pub status: DownloadStatus,
}

impl DownloadOutcome {
    fn success(record: &Record, file_name: String) -> Self {
        Self {
            record: record.clone(),
            local_file_name: Some(file_name),
            status: DownloadStatus::Success,
        }
    }

    fn skipped(record: &Record, reason: SkipReason) -> Self {
        Self {
            record: record.clone(),
            local_file_name: None,
            status: DownloadStatus::Skipped(reason),
        }
    }

    fn failed(record: &Record, reason: FailureReason) -> Self {
        Self {
            record: record.clone(),
            local_file_name: None,
            status: DownloadStatus::Failed(reason),
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == DownloadStatus::Success
    }
}

/// Counts over a batch of outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DownloadSummary {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl DownloadSummary {
    pub fn record(&mut self, status: &DownloadStatus) {
        match status {
            DownloadStatus::Success => self.succeeded += 1,
            DownloadStatus::Skipped(_) => self.skipped += 1,
            DownloadStatus::Failed(_) => self.failed += 1,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded + self.skipped + self.failed
    }
}

impl fmt::Display for DownloadSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} skipped, {} failed",
            self.succeeded, self.skipped, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_counts_and_display() {
        let mut summary = DownloadSummary::default();
        summary.record(&DownloadStatus::Success);
        summary.record(&DownloadStatus::Skipped(SkipReason::AlreadyExists));
        summary.record(&DownloadStatus::Failed(FailureReason::EmptyBody));
        summary.record(&DownloadStatus::Failed(FailureReason::HttpStatus(404)));
        assert_eq!(summary.total(), 4);
        assert_eq!(summary.to_string(), "1 succeeded, 1 skipped, 2 failed");
    }

    #[test]
    fn test_failure_reason_display() {
        assert_eq!(FailureReason::HttpStatus(503).to_string(), "HTTP 503");
        assert_eq!(
            FailureReason::InvalidReference.to_string(),
            "invalid download reference"
        );
    }
}
