//! Locators describing a results-listing page.

use super::strategy::FieldStrategy;
use crate::render::Locator;

/// Everything the harvester needs to know about a listing page's markup.
///
/// [`ListingLayout::default`] describes the CNKI result grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingLayout {
    /// Primary locator for record title nodes, awaited with a bounded wait.
    pub title: Locator,
    /// Tried in order when the primary locator matches nothing.
    pub title_fallbacks: Vec<Locator>,
    /// CSS selector of the record container, searched from the title node upward.
    pub record_container: String,
    /// Ways to read the title off a title node.
    pub title_fields: Vec<FieldStrategy>,
    /// Author links inside a record; every non-empty text is kept.
    pub authors: Locator,
    pub publication_date: Vec<FieldStrategy>,
    pub download_ref: Vec<FieldStrategy>,
    /// Lower-cased URL substrings, any of which marks a listing URL.
    pub url_markers: Vec<String>,
    /// Elements whose presence confirms a listing page; first found wins.
    pub page_indicators: Vec<Locator>,
    /// The "next page" control.
    pub next_page: Locator,
}

impl Default for ListingLayout {
    fn default() -> Self {
        Self {
            title: Locator::class("fz14"),
            title_fallbacks: [
                "a.fz14",
                ".fz14 a",
                "table.result a.fz14",
                "#GridTableContent a.fz14",
                ".article-title",
                ".title",
                ".title a",
                "h3 a",
                ".result-list .title",
                "tr[onclick] a",
                ".brief a",
            ]
            .into_iter()
            .map(Locator::css)
            .collect(),
            record_container: "tr".to_string(),
            title_fields: vec![
                FieldStrategy::own_text(),
                FieldStrategy::own_property("textContent"),
                FieldStrategy::own_attribute("href"),
            ],
            authors: Locator::css("a.KnowledgeNetLink"),
            publication_date: vec![FieldStrategy::text_of("td.date")],
            download_ref: vec![
                FieldStrategy::attribute_of("td.operat a.downloadlink.icon-download", "href"),
                FieldStrategy::attribute_of("td.operat a.downloadlink", "href"),
            ],
            url_markers: ["defaultresult", "search", "result"]
                .into_iter()
                .map(String::from)
                .collect(),
            page_indicators: [
                ".fz14",
                "table.result",
                "#GridTableContent",
                ".result-list",
                ".brief",
            ]
            .into_iter()
            .map(Locator::css)
            .collect(),
            next_page: Locator::id("PageNext"),
        }
    }
}

impl ListingLayout {
    /// Returns `true` when the URL carries one of the listing markers.
    #[must_use]
    pub fn is_listing_url(&self, url: &str) -> bool {
        let lowered = url.to_lowercase();
        self.url_markers
            .iter()
            .any(|marker| lowered.contains(marker.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_fallback_order() {
        let layout = ListingLayout::default();
        assert_eq!(layout.title, Locator::css(".fz14"));
        assert_eq!(layout.title_fallbacks.len(), 11);
        assert_eq!(layout.title_fallbacks[0], Locator::css("a.fz14"));
        assert_eq!(layout.title_fallbacks[10], Locator::css(".brief a"));
    }

    #[test]
    fn test_is_listing_url_is_case_insensitive() {
        let layout = ListingLayout::default();
        assert!(layout.is_listing_url("https://kns.cnki.net/kns8/DefaultResult/index"));
        assert!(layout.is_listing_url("https://example.org/Search?q=x"));
        assert!(!layout.is_listing_url("https://www.cnki.net/"));
    }
}
