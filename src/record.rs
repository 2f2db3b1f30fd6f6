//! Harvested bibliographic records.
//!
//! A [`Record`] is created only by the extraction engine and is immutable
//! afterwards. Downstream stages (persistence, downloads) read it and may
//! associate an artifact with it through its [`RecordKey`], never rewrite it.

use std::fmt;

use serde::Serialize;

/// Delimiter placed between author names.
pub const AUTHOR_DELIMITER: &str = "；";

/// Stable identifier of a record within one traversal run.
///
/// Assigned at extraction time from the listing page and the record's
/// 1-based position among the records emitted for that page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct RecordKey {
    /// 1-based listing page.
    pub page: u32,
    /// 1-based position among records emitted for the page.
    pub position: u32,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.page, self.position)
    }
}

/// One harvested bibliographic entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    key: RecordKey,
    title: String,
    authors: String,
    publication_date: String,
    download_ref: Option<String>,
}

impl Record {
    /// Builds a record, returning `None` when the trimmed title is empty.
    ///
    /// Every other field degrades to empty instead of preventing creation.
    #[must_use]
    pub fn new(
        key: RecordKey,
        title: &str,
        authors: &str,
        publication_date: &str,
        download_ref: Option<&str>,
    ) -> Option<Self> {
        let title = title.trim();
        if title.is_empty() {
            return None;
        }
        let download_ref = download_ref
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string);
        Some(Self {
            key,
            title: title.to_string(),
            authors: authors.trim().to_string(),
            publication_date: publication_date.trim().to_string(),
            download_ref,
        })
    }

    #[must_use]
    pub fn key(&self) -> RecordKey {
        self.key
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn authors(&self) -> &str {
        &self.authors
    }

    #[must_use]
    pub fn publication_date(&self) -> &str {
        &self.publication_date
    }

    /// 1-based listing page the record was found on.
    #[must_use]
    pub fn page_index(&self) -> u32 {
        self.key.page
    }

    #[must_use]
    pub fn download_ref(&self) -> Option<&str> {
        self.download_ref.as_deref()
    }
}
