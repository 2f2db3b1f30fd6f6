//! One end-to-end run: search, traverse, persist, download.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use url::Url;

use super::controller::PaginationController;
use super::search::SearchForm;
use super::{Harvest, HarvestError, Pacing};
use crate::download::{
    DEFAULT_REFERER, DEFAULT_TIMEOUT, DownloadOutcome, DownloadPipeline, DownloadSummary,
    FetchSession,
};
use crate::extract::ListingLayout;
use crate::failure::DEFAULT_FAILURE_THRESHOLD;
use crate::record::Record;
use crate::render::RenderingSource;
use crate::render::webdriver::{BrowserOptions, WebDriverSession};
use crate::sink::RecordSink;

/// Default number of records to collect.
pub const DEFAULT_TARGET_COUNT: usize = 50;

/// Everything a run needs besides its collaborators.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub query: String,
    pub target_count: usize,
    pub max_pages: Option<u32>,
    pub failure_threshold: u32,
    /// Fetch artifacts after the traversal.
    pub download: bool,
    pub output_dir: PathBuf,
    pub download_timeout: Duration,
    pub pacing: Pacing,
    pub layout: ListingLayout,
    pub search_form: SearchForm,
}

impl RunOptions {
    #[must_use]
    pub fn new(query: impl Into<String>, target_count: usize) -> Self {
        Self {
            query: query.into(),
            target_count,
            max_pages: None,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            download: true,
            output_dir: PathBuf::from("downloads"),
            download_timeout: DEFAULT_TIMEOUT,
            pacing: Pacing::default(),
            layout: ListingLayout::default(),
            search_form: SearchForm::default(),
        }
    }
}

/// What a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub harvest: Harvest,
    /// Rows written by the sink; 0 when persistence was unavailable or failed.
    pub inserted: u64,
    /// `None` when downloads were disabled or could not start.
    pub downloads: Option<DownloadSummary>,
    pub download_outcomes: Vec<DownloadOutcome>,
}

/// Owns the rendering session and the sink for one run.
///
/// [`execute`](Self::execute) closes the rendering session on every exit
/// path.
pub struct HarvestRun<R: RenderingSource> {
    source: R,
    sink: Box<dyn RecordSink>,
    options: RunOptions,
}

impl HarvestRun<WebDriverSession> {
    /// Starts a browser session at the WebDriver `endpoint` and wraps it in a run.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Session`] when the driver is unreachable or
    /// refuses to create a session.
    pub async fn connect(
        endpoint: &str,
        browser: &BrowserOptions,
        sink: Box<dyn RecordSink>,
        options: RunOptions,
    ) -> Result<Self, HarvestError> {
        let session = WebDriverSession::connect(endpoint, browser).await?;
        info!(endpoint, session = session.session_id(), "browser session started");
        Ok(Self::new(session, sink, options))
    }
}

impl<R: RenderingSource> HarvestRun<R> {
    #[must_use]
    pub fn new(source: R, sink: Box<dyn RecordSink>, options: RunOptions) -> Self {
        Self {
            source,
            sink,
            options,
        }
    }

    #[must_use]
    pub fn source(&self) -> &R {
        &self.source
    }

    #[must_use]
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs the harvest, persists its records and downloads their artifacts.
    ///
    /// `on_download` is called after each fetched record.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::SearchSubmission`] when the search cannot be
    /// submitted. Persistence and download failures are logged and reported
    /// in the [`RunReport`], never returned.
    #[instrument(skip_all, fields(query = %self.options.query, target = self.options.target_count))]
    pub async fn execute<F>(
        &self,
        cancel: CancellationToken,
        on_download: F,
    ) -> Result<RunReport, HarvestError>
    where
        F: FnMut(&DownloadOutcome),
    {
        let result = self.harvest_and_download(cancel, on_download).await;
        if let Err(error) = self.source.close().await {
            warn!(%error, "closing rendering session failed");
        }
        result
    }

    async fn harvest_and_download<F>(
        &self,
        cancel: CancellationToken,
        on_download: F,
    ) -> Result<RunReport, HarvestError>
    where
        F: FnMut(&DownloadOutcome),
    {
        let options = &self.options;
        let harvest = PaginationController::with_layout(&self.source, options.layout.clone())
            .with_pacing(options.pacing.clone())
            .with_search_form(options.search_form.clone())
            .with_failure_threshold(options.failure_threshold)
            .with_cancellation(cancel)
            .run(&options.query, options.target_count, options.max_pages)
            .await?;

        let inserted = self.persist(&harvest.records).await;

        let (downloads, download_outcomes) = if self.options.download {
            match self.download(&harvest, on_download).await {
                Some((outcomes, summary)) => (Some(summary), outcomes),
                None => (None, Vec::new()),
            }
        } else {
            (None, Vec::new())
        };

        Ok(RunReport {
            harvest,
            inserted,
            downloads,
            download_outcomes,
        })
    }

    async fn persist(&self, records: &[Record]) -> u64 {
        if records.is_empty() || !self.sink.is_available() {
            return 0;
        }
        if let Err(error) = self.sink.ensure_schema().await {
            warn!(%error, "could not prepare the record store, records not persisted");
            return 0;
        }
        match self.sink.bulk_insert(records).await {
            Ok(inserted) => inserted,
            Err(error) => {
                warn!(%error, count = records.len(), "bulk insert failed, records not persisted");
                0
            }
        }
    }

    async fn download<F>(
        &self,
        harvest: &Harvest,
        on_download: F,
    ) -> Option<(Vec<DownloadOutcome>, DownloadSummary)>
    where
        F: FnMut(&DownloadOutcome),
    {
        let downloadable: Vec<Record> = harvest
            .records
            .iter()
            .filter(|record| record.download_ref().is_some())
            .cloned()
            .collect();
        if downloadable.is_empty() {
            info!("no records carry a download reference");
            return Some((Vec::new(), DownloadSummary::default()));
        }

        let referer = harvest.listing_url.as_deref().unwrap_or(DEFAULT_REFERER);
        let origin = match Url::parse(referer).or_else(|_| Url::parse(DEFAULT_REFERER)) {
            Ok(origin) => origin,
            Err(error) => {
                warn!(%error, "no usable cookie origin, downloads skipped");
                return None;
            }
        };

        let session =
            match FetchSession::snapshot(&self.source, &origin, self.options.download_timeout).await
            {
                Ok(session) => session,
                Err(error) => {
                    warn!(%error, "could not start download session, downloads skipped");
                    return None;
                }
            };

        let pipeline = DownloadPipeline::new(session, &self.options.output_dir, Some(referer));
        Some(
            pipeline
                .fetch_all(&downloadable, self.sink.as_ref(), on_download)
                .await,
        )
    }
}
