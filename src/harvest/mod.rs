//! Search submission and resilient listing traversal.
//!
//! [`PaginationController`] submits a query, then walks the listing page by
//! page: verify the page, extract its records, advance. Page-level problems
//! feed a shared [`FailureTracker`](crate::failure::FailureTracker) and end
//! the run with a [`StopReason`] instead of an error; only session and
//! search-submission failures are fatal.

mod controller;
mod run;
mod search;

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub use controller::{Advance, PaginationController};
pub use run::{DEFAULT_TARGET_COUNT, HarvestRun, RunOptions, RunReport};
pub use search::{DEFAULT_HOME_URL, SearchForm};

use crate::record::Record;
use crate::render::wait::{DEFAULT_POLL_INTERVAL, PageLoadWait};
use crate::render::RenderError;

/// Why a traversal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum StopReason {
    /// The requested number of records was collected.
    TargetReached,
    /// The next-page control is missing or disabled.
    NoNextPage,
    /// Too many consecutive verification or extraction failures.
    FailureThresholdExceeded,
    /// The configured page limit was reached.
    MaxPagesReached,
    /// The next page never verified, even after a reload.
    NavigationFailed,
    /// The run was cancelled between pages.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TargetReached => "target reached",
            Self::NoNextPage => "no next page",
            Self::FailureThresholdExceeded => "failure threshold exceeded",
            Self::MaxPagesReached => "max pages reached",
            Self::NavigationFailed => "navigation failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// Result of one traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Harvest {
    /// Records in discovery order, never more than the target.
    pub records: Vec<Record>,
    pub stop_reason: StopReason,
    /// Number of pages that passed verification.
    pub pages_visited: u32,
    /// URL of the last verified listing page, used as the download referer.
    pub listing_url: Option<String>,
}

/// Fatal harvest errors.
#[derive(Debug, Error)]
pub enum HarvestError {
    /// The rendering session could not be established or used.
    #[error("rendering session failed: {0}")]
    Session(#[from] RenderError),

    /// The search could not be submitted by any means.
    #[error("search submission failed: {reason}")]
    SearchSubmission {
        /// What went wrong.
        reason: String,
        /// Underlying rendering failure, if any.
        #[source]
        source: Option<RenderError>,
    },
}

impl HarvestError {
    pub fn search_submission(reason: impl Into<String>) -> Self {
        Self::SearchSubmission {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn search_submission_caused_by(reason: impl Into<String>, source: RenderError) -> Self {
        Self::SearchSubmission {
            reason: reason.into(),
            source: Some(source),
        }
    }
}

/// Every delay and bounded wait used while driving the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pacing {
    /// Bounded wait for primary elements (search input, title nodes, next control).
    pub element_timeout: Duration,
    /// Bounded wait for each optional control tried in a fallback chain.
    pub probe_timeout: Duration,
    pub poll_interval: Duration,
    pub page_load: PageLoadWait,
    /// How long to wait for the URL to change after submitting a search.
    pub submit_timeout: Duration,
    /// Pause after the search page settles.
    pub after_submit_delay: Duration,
    /// Pause before re-verifying a page that failed verification.
    pub verification_retry_delay: Duration,
    /// Pause before re-extracting a page that produced no records.
    pub reextract_delay: Duration,
    /// Pause after clicking the next-page control.
    pub after_click_delay: Duration,
    /// Pause after the next page reports loaded.
    pub after_load_delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            element_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
            poll_interval: DEFAULT_POLL_INTERVAL,
            page_load: PageLoadWait::default(),
            submit_timeout: Duration::from_secs(20),
            after_submit_delay: Duration::from_secs(2),
            verification_retry_delay: Duration::from_secs(2),
            reextract_delay: Duration::from_secs(2),
            after_click_delay: Duration::from_secs(2),
            after_load_delay: Duration::from_secs(1),
        }
    }
}

impl Pacing {
    /// No sleeping and single-shot waits; for fixtures that render synchronously.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            element_timeout: Duration::ZERO,
            probe_timeout: Duration::ZERO,
            poll_interval: Duration::ZERO,
            page_load: PageLoadWait::immediate(),
            submit_timeout: Duration::ZERO,
            after_submit_delay: Duration::ZERO,
            verification_retry_delay: Duration::ZERO,
            reextract_delay: Duration::ZERO,
            after_click_delay: Duration::ZERO,
            after_load_delay: Duration::ZERO,
        }
    }
}

pub(crate) async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}
