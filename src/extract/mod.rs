//! Per-page record extraction.
//!
//! The engine reads whatever the current listing page renders and turns each
//! title node into a [`Record`]. It never fails: missing sub-fields degrade
//! to empty values, and a node without a usable title is skipped.

mod layout;
mod strategy;

use std::time::Duration;

use tracing::{debug, instrument, trace};

pub use layout::ListingLayout;
pub use strategy::{FieldStrategy, ReadMode, first_value};

use crate::record::{AUTHOR_DELIMITER, Record, RecordKey};
use crate::render::wait::DEFAULT_POLL_INTERVAL;
use crate::render::{ElementRef, RenderingSource, wait_for_elements};

/// Default bounded wait for the primary title locator.
pub const DEFAULT_ELEMENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Extracts records from the current page of a [`RenderingSource`].
#[derive(Debug, Clone)]
pub struct ExtractionEngine {
    layout: ListingLayout,
    element_timeout: Duration,
    poll_interval: Duration,
}

impl Default for ExtractionEngine {
    fn default() -> Self {
        Self::new(ListingLayout::default())
    }
}

impl ExtractionEngine {
    #[must_use]
    pub fn new(layout: ListingLayout) -> Self {
        Self {
            layout,
            element_timeout: DEFAULT_ELEMENT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Sets the bounded wait applied to the primary title locator.
    #[must_use]
    pub fn with_element_timeout(mut self, timeout: Duration, poll_interval: Duration) -> Self {
        self.element_timeout = timeout;
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn layout(&self) -> &ListingLayout {
        &self.layout
    }

    /// Extracts every record on the current page, in document order.
    ///
    /// `page_index` is the 1-based listing page; record positions count only
    /// emitted records.
    #[instrument(skip(self, source))]
    pub async fn extract(&self, source: &dyn RenderingSource, page_index: u32) -> Vec<Record> {
        let title_nodes = self.locate_titles(source).await;
        let mut records = Vec::with_capacity(title_nodes.len());

        for node in &title_nodes {
            let position = u32::try_from(records.len() + 1).unwrap_or(u32::MAX);
            let key = RecordKey {
                page: page_index,
                position,
            };
            if let Some(record) = self.extract_record(source, node, key).await {
                records.push(record);
            }
        }

        debug!(
            page = page_index,
            candidates = title_nodes.len(),
            extracted = records.len(),
            "page extracted"
        );
        records
    }

    async fn locate_titles(&self, source: &dyn RenderingSource) -> Vec<ElementRef> {
        let primary = wait_for_elements(
            source,
            &self.layout.title,
            self.element_timeout,
            self.poll_interval,
        )
        .await;
        if !primary.is_empty() {
            return primary;
        }

        for locator in &self.layout.title_fallbacks {
            match source.find_all(None, locator).await {
                Ok(nodes) if !nodes.is_empty() => {
                    debug!(%locator, count = nodes.len(), "title nodes found via fallback");
                    return nodes;
                }
                Ok(_) => {}
                Err(error) => trace!(%locator, %error, "fallback title locator failed"),
            }
        }
        Vec::new()
    }

    async fn extract_record(
        &self,
        source: &dyn RenderingSource,
        node: &ElementRef,
        key: RecordKey,
    ) -> Option<Record> {
        let Some(title) = first_value(&self.layout.title_fields, source, node).await else {
            trace!(%key, "title node without text skipped");
            return None;
        };

        let container = match source.closest(node, &self.layout.record_container).await {
            Ok(container) => container,
            Err(error) => {
                trace!(%key, %error, "record container lookup failed");
                None
            }
        };

        let (authors, publication_date, download_ref) = match &container {
            Some(container) => (
                self.authors(source, container).await,
                first_value(&self.layout.publication_date, source, container)
                    .await
                    .unwrap_or_default(),
                first_value(&self.layout.download_ref, source, container).await,
            ),
            None => (String::new(), String::new(), None),
        };

        Record::new(
            key,
            &title,
            &authors,
            &publication_date,
            download_ref.as_deref(),
        )
    }

    async fn authors(&self, source: &dyn RenderingSource, container: &ElementRef) -> String {
        let links = match source.find_all(Some(container), &self.layout.authors).await {
            Ok(links) => links,
            Err(error) => {
                trace!(%error, "author lookup failed");
                return String::new();
            }
        };

        let mut names = Vec::with_capacity(links.len());
        for link in &links {
            if let Ok(text) = source.text(link).await {
                let name = text.trim();
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        }
        names.join(AUTHOR_DELIMITER)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::render::memory::{Element, MemoryBrowser, MemoryPage, el};

    const URL: &str = "https://kns.example.org/kns8/defaultresult/index";

    fn engine() -> ExtractionEngine {
        ExtractionEngine::default().with_element_timeout(Duration::ZERO, Duration::ZERO)
    }

    fn row(title: &str, authors: &[&str], date: &str, download: Option<&str>) -> Element {
        let mut operat = el("td").class("operat");
        if let Some(href) = download {
            operat = operat.child(
                el("a")
                    .class("downloadlink")
                    .class("icon-download")
                    .attr("href", href),
            );
        }
        el("tr").children([
            el("td").child(el("a").class("fz14").text(title)),
            el("td")
                .class("author")
                .children(authors.iter().map(|name| el("a").class("KnowledgeNetLink").text(name))),
            el("td").class("date").text(date),
            operat,
        ])
    }

    async fn browser_with(root: Element) -> MemoryBrowser {
        let browser = MemoryBrowser::new().with_page(MemoryPage::new(URL, root));
        browser.navigate(URL).await.unwrap();
        browser
    }

    #[tokio::test]
    async fn test_extracts_full_rows_in_order() {
        let browser = browser_with(el("table").class("result").children([
            row("First Paper", &["Li Wei", " Zhang San "], "2024-01-02", Some("/dl/1")),
            row("Second Paper", &["Wang"], "2023-12-31", None),
        ]))
        .await;

        let records = engine().extract(&browser, 3).await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].title(), "First Paper");
        assert_eq!(records[0].authors(), "Li Wei；Zhang San");
        assert_eq!(records[0].publication_date(), "2024-01-02");
        assert_eq!(records[0].download_ref(), Some("/dl/1"));
        assert_eq!(records[0].key(), RecordKey { page: 3, position: 1 });
        assert_eq!(records[1].download_ref(), None);
        assert_eq!(records[1].key().position, 2);
    }

    #[tokio::test]
    async fn test_title_only_row_yields_record_with_empty_fields() {
        let browser = browser_with(el("div").child(el("span").class("fz14").text("Lonely Title"))).await;

        let records = engine().extract(&browser, 1).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title(), "Lonely Title");
        assert_eq!(records[0].authors(), "");
        assert_eq!(records[0].publication_date(), "");
        assert!(records[0].download_ref().is_none());
    }

    #[tokio::test]
    async fn test_blank_titles_are_skipped_and_positions_stay_dense() {
        let browser = browser_with(el("table").children([
            row("   ", &[], "", None),
            row("Kept", &[], "", None),
        ]))
        .await;

        let records = engine().extract(&browser, 1).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title(), "Kept");
        assert_eq!(records[0].key().position, 1);
    }

    #[tokio::test]
    async fn test_fallback_locator_used_when_primary_matches_nothing() {
        let browser = browser_with(
            el("ul").class("result-list").child(
                el("li").child(el("h3").child(el("a").text("Fallback Title"))),
            ),
        )
        .await;

        let records = engine().extract(&browser, 1).await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title(), "Fallback Title");
    }

    #[tokio::test]
    async fn test_plain_download_link_is_used_without_icon_class() {
        let browser = browser_with(el("table").child(el("tr").children([
            el("td").child(el("a").class("fz14").text("Paper")),
            el("td").class("operat").child(el("a").class("downloadlink").attr("href", "/plain")),
        ])))
        .await;

        let records = engine().extract(&browser, 1).await;
        assert_eq!(records[0].download_ref(), Some("/plain"));
    }

    #[tokio::test]
    async fn test_title_falls_back_to_href() {
        let browser = browser_with(el("table").child(el("tr").child(
            el("td").child(el("a").class("fz14").attr("href", "https://example.org/paper")),
        )))
        .await;

        let records = engine().extract(&browser, 1).await;
        assert_eq!(records[0].title(), "https://example.org/paper");
    }

    #[tokio::test]
    async fn test_empty_page_yields_no_records() {
        let browser = browser_with(el("div").class("empty")).await;
        assert!(engine().extract(&browser, 1).await.is_empty());
    }
}
