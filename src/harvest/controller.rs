//! The page-by-page traversal state machine.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::search::{SearchForm, submit_search};
use super::{Harvest, HarvestError, Pacing, StopReason, pause};
use crate::extract::{ExtractionEngine, ListingLayout};
use crate::failure::{DEFAULT_FAILURE_THRESHOLD, FailureTracker};
use crate::record::Record;
use crate::render::{
    ElementRef, RenderError, RenderingSource, SCRIPT_CLICK, wait_for_element, wait_for_page_load,
};
use crate::retry::{RetryPolicy, retry};

/// Attempts allowed for the next-page click when the control goes stale.
const NEXT_CLICK_ATTEMPTS: u32 = 2;

/// Outcome of trying to move to the next listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// The next page loaded and verified.
    Moved,
    /// There is no next page.
    NoNextPage,
    /// The control was triggered but the next page never verified.
    Failed,
}

/// Drives one traversal over a rendering source.
///
/// The controller owns the consecutive-failure tracker, so one instance
/// represents one run.
pub struct PaginationController<'a> {
    source: &'a dyn RenderingSource,
    engine: ExtractionEngine,
    search: SearchForm,
    pacing: Pacing,
    tracker: FailureTracker,
    cancel: CancellationToken,
    listing_url: Option<String>,
}

impl<'a> PaginationController<'a> {
    #[must_use]
    pub fn new(source: &'a dyn RenderingSource) -> Self {
        Self::with_layout(source, ListingLayout::default())
    }

    #[must_use]
    pub fn with_layout(source: &'a dyn RenderingSource, layout: ListingLayout) -> Self {
        let pacing = Pacing::default();
        let engine = ExtractionEngine::new(layout)
            .with_element_timeout(pacing.element_timeout, pacing.poll_interval);
        Self {
            source,
            engine,
            search: SearchForm::default(),
            pacing,
            tracker: FailureTracker::new(DEFAULT_FAILURE_THRESHOLD),
            cancel: CancellationToken::new(),
            listing_url: None,
        }
    }

    #[must_use]
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.engine = self
            .engine
            .with_element_timeout(pacing.element_timeout, pacing.poll_interval);
        self.pacing = pacing;
        self
    }

    #[must_use]
    pub fn with_search_form(mut self, search: SearchForm) -> Self {
        self.search = search;
        self
    }

    #[must_use]
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.tracker = FailureTracker::new(threshold);
        self
    }

    /// Token observed at the top of every page iteration.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn layout(&self) -> &ListingLayout {
        self.engine.layout()
    }

    /// Submits `query` and traverses the resulting listing.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::SearchSubmission`] when the search cannot be
    /// submitted. Traversal problems never error; they end the harvest with
    /// a [`StopReason`].
    #[instrument(skip(self))]
    pub async fn run(
        &mut self,
        query: &str,
        target_count: usize,
        max_pages: Option<u32>,
    ) -> Result<Harvest, HarvestError> {
        submit_search(self.source, &self.search, self.layout(), &self.pacing, query).await?;
        Ok(self.traverse(target_count, max_pages).await)
    }

    /// Traverses the listing starting from the currently loaded page (page 1).
    #[instrument(skip(self))]
    pub async fn traverse(&mut self, target_count: usize, max_pages: Option<u32>) -> Harvest {
        let mut records: Vec<Record> = Vec::new();
        let mut page: u32 = 1;
        let mut pages_visited: u32 = 0;

        if target_count == 0 {
            return self.finish(records, StopReason::TargetReached, pages_visited);
        }

        let stop_reason = loop {
            if self.cancel.is_cancelled() {
                info!(page, "harvest cancelled");
                break StopReason::Cancelled;
            }

            if !self.verify_listing_page().await {
                let failures = self.tracker.record_failure();
                warn!(page, failures, "listing page verification failed");
                if self.tracker.exceeded() {
                    break StopReason::FailureThresholdExceeded;
                }
                pause(self.pacing.verification_retry_delay).await;
                continue;
            }
            self.tracker.record_success();
            pages_visited = pages_visited.max(page);

            let batch = self.extract_page(page).await;
            let Some(batch) = batch else {
                break StopReason::FailureThresholdExceeded;
            };

            records.extend(batch);
            info!(page, total = records.len(), target = target_count, "page harvested");

            if records.len() >= target_count {
                records.truncate(target_count);
                break StopReason::TargetReached;
            }

            if max_pages.is_some_and(|limit| page >= limit) {
                break StopReason::MaxPagesReached;
            }

            match self.advance().await {
                Advance::Moved => page += 1,
                Advance::NoNextPage => break StopReason::NoNextPage,
                Advance::Failed => break StopReason::NavigationFailed,
            }
        };

        self.finish(records, stop_reason, pages_visited)
    }

    fn finish(&self, records: Vec<Record>, stop_reason: StopReason, pages_visited: u32) -> Harvest {
        info!(
            records = records.len(),
            pages = pages_visited,
            reason = %stop_reason,
            "harvest finished"
        );
        Harvest {
            records,
            stop_reason,
            pages_visited,
            listing_url: self.listing_url.clone(),
        }
    }

    /// Extracts one page, re-extracting once when it comes back empty.
    ///
    /// Returns `None` when the failure threshold is reached, and an empty
    /// batch when the page is given up.
    async fn extract_page(&mut self, page: u32) -> Option<Vec<Record>> {
        let batch = self.engine.extract(self.source, page).await;
        if !batch.is_empty() {
            return Some(batch);
        }

        let failures = self.tracker.record_failure();
        warn!(page, failures, "no records extracted, retrying once");
        if self.tracker.exceeded() {
            return None;
        }

        pause(self.pacing.reextract_delay).await;
        wait_for_page_load(self.source, &self.pacing.page_load).await;

        let batch = self.engine.extract(self.source, page).await;
        if batch.is_empty() {
            let failures = self.tracker.record_failure();
            warn!(page, failures, "page still empty after retry, giving up on it");
            if self.tracker.exceeded() {
                return None;
            }
        } else {
            self.tracker.record_success();
        }
        Some(batch)
    }

    /// Checks that the current document is a results listing.
    ///
    /// Both the URL shape and at least one listing indicator must be present.
    pub async fn verify_listing_page(&mut self) -> bool {
        let url = match self.source.current_url().await {
            Ok(url) => url,
            Err(error) => {
                warn!(%error, "could not read current URL");
                return false;
            }
        };

        if !self.layout().is_listing_url(&url) {
            let title = self.source.title().await.unwrap_or_default();
            warn!(url = %url, title = %title, "current URL does not look like a listing");
            return false;
        }

        let mut verified_by = None;
        for indicator in &self.layout().page_indicators {
            if let Ok(Some(_)) = self.source.find_one(None, indicator).await {
                verified_by = Some(indicator.clone());
                break;
            }
        }
        if let Some(indicator) = verified_by {
            debug!(%indicator, url = %url, "listing page verified");
            self.listing_url = Some(url);
            return true;
        }

        let title = self.source.title().await.unwrap_or_default();
        warn!(url = %url, title = %title, "no listing indicator found on page");
        false
    }

    /// Moves to the next listing page.
    pub async fn advance(&mut self) -> Advance {
        let next_locator = self.layout().next_page.clone();
        let Some(next) = wait_for_element(
            self.source,
            &next_locator,
            self.pacing.element_timeout,
            self.pacing.poll_interval,
        )
        .await
        else {
            info!("no next-page control, last page reached");
            return Advance::NoNextPage;
        };

        if let Ok(Some(_)) = self.source.attribute(&next, "disabled").await {
            info!("next-page control disabled, last page reached");
            return Advance::NoNextPage;
        }

        if let Err(error) = self.click_next(&next).await {
            warn!(%error, "could not trigger next-page control");
            return Advance::Failed;
        }

        pause(self.pacing.after_click_delay).await;
        wait_for_page_load(self.source, &self.pacing.page_load).await;
        pause(self.pacing.after_load_delay).await;
        if self.verify_listing_page().await {
            return Advance::Moved;
        }

        warn!("next page did not verify, reloading once");
        if let Err(error) = self.source.refresh().await {
            warn!(%error, "reload failed");
            return Advance::Failed;
        }
        wait_for_page_load(self.source, &self.pacing.page_load).await;
        pause(self.pacing.after_load_delay).await;
        if self.verify_listing_page().await {
            Advance::Moved
        } else {
            Advance::Failed
        }
    }

    async fn click_next(&self, next: &ElementRef) -> Result<(), RenderError> {
        let source = self.source;
        let locator = &self.layout().next_page;
        let policy = RetryPolicy::fixed(NEXT_CLICK_ATTEMPTS, Duration::ZERO);
        retry(&policy, "next_page_click", RenderError::is_stale, |attempt| {
            let first = next.clone();
            async move {
                let target = if attempt == 1 {
                    first
                } else {
                    source
                        .find_one(None, locator)
                        .await?
                        .ok_or_else(|| RenderError::not_found(locator))?
                };
                source.evaluate_on(SCRIPT_CLICK, &target).await?;
                Ok::<_, RenderError>(())
            }
        })
        .await
    }

    #[must_use]
    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::render::memory::{Element, MemoryBrowser, MemoryPage, el};

    const PAGE_1: &str = "https://kns.example.org/kns8/defaultresult/index";
    const PAGE_2: &str = "https://kns.example.org/kns8/defaultresult/index?page=2";

    fn rows(prefix: &str, count: usize) -> Vec<Element> {
        (1..=count)
            .map(|i| {
                el("tr").child(el("td").child(el("a").class("fz14").text(&format!("{prefix} {i}"))))
            })
            .collect()
    }

    fn listing(url: &str, prefix: &str, count: usize, next: Option<&str>) -> MemoryPage {
        let mut root = el("div").child(el("table").class("result").children(rows(prefix, count)));
        if let Some(next_url) = next {
            root = root.child(el("a").id("PageNext").link(next_url));
        }
        MemoryPage::new(url, root)
    }

    async fn controller_on(browser: &MemoryBrowser) -> PaginationController<'_> {
        browser.navigate(PAGE_1).await.unwrap();
        PaginationController::new(browser).with_pacing(Pacing::immediate())
    }

    #[tokio::test]
    async fn test_target_reached_truncates_final_page() {
        let browser = MemoryBrowser::new()
            .with_page(listing(PAGE_1, "a", 3, Some(PAGE_2)))
            .with_page(listing(PAGE_2, "b", 3, None));
        let mut controller = controller_on(&browser).await;

        let harvest = controller.traverse(4, None).await;
        assert_eq!(harvest.stop_reason, StopReason::TargetReached);
        assert_eq!(harvest.records.len(), 4);
        assert_eq!(harvest.records[3].title(), "b 1");
        assert_eq!(harvest.pages_visited, 2);
        assert_eq!(harvest.listing_url.as_deref(), Some(PAGE_2));
    }

    #[tokio::test]
    async fn test_max_pages_checked_before_advancing() {
        let browser = MemoryBrowser::new()
            .with_page(listing(PAGE_1, "a", 2, Some(PAGE_2)))
            .with_page(listing(PAGE_2, "b", 2, None));
        let mut controller = controller_on(&browser).await;

        let harvest = controller.traverse(10, Some(1)).await;
        assert_eq!(harvest.stop_reason, StopReason::MaxPagesReached);
        assert_eq!(harvest.records.len(), 2);
        assert_eq!(browser.click_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_next_control_means_no_next_page() {
        let browser = MemoryBrowser::new().with_page(MemoryPage::new(
            PAGE_1,
            el("div").children([
                el("table").class("result").children(rows("a", 2)),
                el("a").id("PageNext").attr("disabled", "disabled"),
            ]),
        ));
        let mut controller = controller_on(&browser).await;

        let harvest = controller.traverse(5, None).await;
        assert_eq!(harvest.stop_reason, StopReason::NoNextPage);
        assert_eq!(harvest.records.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_next_control_is_relocated() {
        let browser = MemoryBrowser::new()
            .with_page(listing(PAGE_1, "a", 1, Some(PAGE_2)))
            .with_page(listing(PAGE_2, "b", 1, None));
        let mut controller = controller_on(&browser).await;
        browser.fail_next_clicks_as_stale(1);

        let harvest = controller.traverse(2, None).await;
        assert_eq!(harvest.stop_reason, StopReason::TargetReached);
        assert_eq!(harvest.records.len(), 2);
    }

    #[tokio::test]
    async fn test_unverified_next_page_is_reloaded_once() {
        let broken = MemoryPage::new(PAGE_2, el("div").class("spinner"));
        let browser = MemoryBrowser::new()
            .with_page(listing(PAGE_1, "a", 1, Some(PAGE_2)))
            .with_page(broken)
            .with_page(listing(PAGE_2, "b", 1, None));
        let mut controller = controller_on(&browser).await;

        let harvest = controller.traverse(2, None).await;
        assert_eq!(harvest.stop_reason, StopReason::TargetReached);
        assert_eq!(browser.refresh_count(), 1);
    }

    #[tokio::test]
    async fn test_navigation_failed_when_reload_does_not_help() {
        let browser = MemoryBrowser::new()
            .with_page(listing(PAGE_1, "a", 1, Some(PAGE_2)))
            .with_page(MemoryPage::new(PAGE_2, el("div").class("spinner")));
        let mut controller = controller_on(&browser).await;

        let harvest = controller.traverse(5, None).await;
        assert_eq!(harvest.stop_reason, StopReason::NavigationFailed);
        assert_eq!(harvest.records.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_page_recovers_on_reextraction() {
        let browser = MemoryBrowser::new().with_page(MemoryPage::new(
            PAGE_1,
            el("div").children([
                el("div").class("brief"),
                el("table").children(
                    rows("late", 2).into_iter().map(|row| row.rendered_after(1)),
                ),
            ]),
        ));
        let mut controller = controller_on(&browser).await;

        let harvest = controller.traverse(5, None).await;
        assert_eq!(harvest.records.len(), 2);
        assert_eq!(harvest.stop_reason, StopReason::NoNextPage);
        assert_eq!(controller.tracker().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_page() {
        let browser = MemoryBrowser::new().with_page(listing(PAGE_1, "a", 2, None));
        let cancel = CancellationToken::new();
        cancel.cancel();
        browser.navigate(PAGE_1).await.unwrap();
        let mut controller = PaginationController::new(&browser)
            .with_pacing(Pacing::immediate())
            .with_cancellation(cancel);

        let harvest = controller.traverse(5, None).await;
        assert_eq!(harvest.stop_reason, StopReason::Cancelled);
        assert!(harvest.records.is_empty());
    }

    #[tokio::test]
    async fn test_zero_target_returns_immediately() {
        let browser = MemoryBrowser::new().with_page(listing(PAGE_1, "a", 2, None));
        let mut controller = controller_on(&browser).await;

        let harvest = controller.traverse(0, None).await;
        assert_eq!(harvest.stop_reason, StopReason::TargetReached);
        assert!(harvest.records.is_empty());
    }
}
