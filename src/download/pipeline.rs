//! Sequential fetch-sniff-write loop over harvested records.

use std::path::{Path, PathBuf};

use futures_util::{Stream, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::FetchSession;
use super::constants::{
    DEFAULT_REFERER, PART_SUFFIX, PROGRESS_INTERVAL, REQUEST_ATTEMPTS, REQUEST_RETRY_DELAY,
    SNIFF_LEN,
};
use super::error::FetchError;
use super::filename::file_name_for;
use super::sniff::{Sniffed, sniff};
use super::{DownloadOutcome, DownloadSummary, FailureReason, SkipReason};
use crate::record::Record;
use crate::retry::{RetryPolicy, retry};
use crate::sink::RecordSink;

/// Downloads the artifacts referenced by records into one directory.
#[derive(Debug, Clone)]
pub struct DownloadPipeline {
    session: FetchSession,
    output_dir: PathBuf,
    referer: String,
    retry_policy: RetryPolicy,
}

impl DownloadPipeline {
    /// `referer` is the last verified listing URL; `None` uses [`DEFAULT_REFERER`].
    #[must_use]
    pub fn new(session: FetchSession, output_dir: impl Into<PathBuf>, referer: Option<&str>) -> Self {
        Self {
            session,
            output_dir: output_dir.into(),
            referer: referer.unwrap_or(DEFAULT_REFERER).to_string(),
            retry_policy: RetryPolicy::fixed(REQUEST_ATTEMPTS, REQUEST_RETRY_DELAY),
        }
    }

    /// Replaces the policy applied to transient request failures.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    #[must_use]
    pub fn referer(&self) -> &str {
        &self.referer
    }

    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Fetches every record in order, asking `sink` to associate each
    /// successful file with its record.
    ///
    /// `on_outcome` is called after each record, for progress display.
    #[instrument(skip_all, fields(records = records.len(), dir = %self.output_dir.display()))]
    pub async fn fetch_all<F>(
        &self,
        records: &[Record],
        sink: &dyn RecordSink,
        mut on_outcome: F,
    ) -> (Vec<DownloadOutcome>, DownloadSummary)
    where
        F: FnMut(&DownloadOutcome),
    {
        let mut outcomes = Vec::with_capacity(records.len());
        let mut summary = DownloadSummary::default();

        for (index, record) in records.iter().enumerate() {
            let outcome = self.fetch(record).await;

            if let Some(file_name) = outcome.local_file_name.as_deref() {
                if sink.is_available() {
                    match sink.associate_file(record, file_name).await {
                        Ok(true) => debug!(key = %record.key(), file_name, "file associated"),
                        Ok(false) => warn!(key = %record.key(), file_name, "no row to associate file with"),
                        Err(error) => warn!(key = %record.key(), %error, "file association failed"),
                    }
                }
            }

            summary.record(&outcome.status);
            on_outcome(&outcome);
            outcomes.push(outcome);

            let processed = index + 1;
            if processed % PROGRESS_INTERVAL == 0 {
                info!(
                    processed,
                    total = records.len(),
                    succeeded = summary.succeeded,
                    skipped = summary.skipped,
                    failed = summary.failed,
                    "download progress"
                );
            }
        }

        info!(
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            "downloads finished"
        );
        (outcomes, summary)
    }

    /// Fetches one record's artifact.
    #[instrument(skip_all, fields(key = %record.key()))]
    pub async fn fetch(&self, record: &Record) -> DownloadOutcome {
        let Some(reference) = record.download_ref() else {
            return DownloadOutcome::failed(record, FailureReason::InvalidReference);
        };
        let url = match self.resolve(reference) {
            Ok(url) => url,
            Err(error) => {
                warn!(%error, "skipping unusable download reference");
                return DownloadOutcome::failed(record, error.failure_reason());
            }
        };

        let session = &self.session;
        let referer = self.referer.as_str();
        let target = &url;
        let response = retry(
            &self.retry_policy,
            "artifact_request",
            FetchError::is_transient,
            move |_attempt| session.get(target, referer),
        )
        .await;
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                warn!(url = %url, %error, "artifact request failed");
                return DownloadOutcome::failed(record, error.failure_reason());
            }
        };

        let mut stream = response.bytes_stream();
        let mut head: Vec<u8> = Vec::with_capacity(SNIFF_LEN);
        while head.len() < SNIFF_LEN {
            match stream.next().await {
                Some(Ok(chunk)) => head.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    let error = FetchError::network(url.as_str(), e);
                    warn!(url = %url, %error, "body read failed");
                    return DownloadOutcome::failed(record, error.failure_reason());
                }
                None => break,
            }
        }

        let kind = match sniff(&head) {
            Sniffed::Artifact(kind) => kind,
            Sniffed::ErrorPage => {
                warn!(url = %url, "error page served instead of artifact");
                return DownloadOutcome::failed(record, FailureReason::ErrorPage);
            }
            Sniffed::Empty => {
                warn!(url = %url, "empty body");
                return DownloadOutcome::failed(record, FailureReason::EmptyBody);
            }
        };

        let file_name = file_name_for(record.title(), kind);
        let final_path = self.output_dir.join(&file_name);
        if tokio::fs::try_exists(&final_path).await.unwrap_or(false) {
            info!(path = %final_path.display(), "already downloaded, skipping");
            return DownloadOutcome::skipped(record, SkipReason::AlreadyExists);
        }

        let part_path = self.output_dir.join(format!("{file_name}{PART_SUFFIX}"));
        match write_artifact(&head, stream, &part_path, &final_path, url.as_str()).await {
            Ok(bytes) => {
                info!(path = %final_path.display(), bytes, %kind, "artifact saved");
                DownloadOutcome::success(record, file_name)
            }
            Err(error) => {
                debug!(path = %part_path.display(), "cleaning up partial file after error");
                let _ = tokio::fs::remove_file(&part_path).await;
                warn!(%error, "artifact write failed");
                DownloadOutcome::failed(record, error.failure_reason())
            }
        }
    }

    /// Resolves a possibly relative reference against the referer.
    fn resolve(&self, reference: &str) -> Result<Url, FetchError> {
        let url = match Url::parse(reference) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(&self.referer)
                .and_then(|base| base.join(reference))
                .map_err(|_| FetchError::invalid_reference(reference))?,
            Err(_) => return Err(FetchError::invalid_reference(reference)),
        };
        if matches!(url.scheme(), "http" | "https") {
            Ok(url)
        } else {
            Err(FetchError::invalid_reference(reference))
        }
    }
}

/// Writes the sniffed head and the rest of the body to `part_path`, then
/// renames it onto `final_path`. Returns bytes written.
async fn write_artifact<S, B>(
    head: &[u8],
    mut stream: S,
    part_path: &Path,
    final_path: &Path,
    url: &str,
) -> Result<u64, FetchError>
where
    S: Stream<Item = Result<B, reqwest::Error>> + Unpin,
    B: AsRef<[u8]>,
{
    if let Some(dir) = part_path.parent() {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| FetchError::io(dir, e))?;
    }

    let file = File::create(part_path)
        .await
        .map_err(|e| FetchError::io(part_path, e))?;
    let mut writer = BufWriter::new(file);

    writer
        .write_all(head)
        .await
        .map_err(|e| FetchError::io(part_path, e))?;
    let mut bytes_written = head.len() as u64;

    while let Some(chunk_result) = stream.next().await {
        let chunk = chunk_result.map_err(|e| FetchError::network(url, e))?;
        let chunk = chunk.as_ref();
        writer
            .write_all(chunk)
            .await
            .map_err(|e| FetchError::io(part_path, e))?;
        bytes_written += chunk.len() as u64;
    }

    // Ensure all data is flushed to disk
    writer
        .flush()
        .await
        .map_err(|e| FetchError::io(part_path, e))?;
    drop(writer);

    tokio::fs::rename(part_path, final_path)
        .await
        .map_err(|e| FetchError::io(final_path, e))?;
    Ok(bytes_written)
}
