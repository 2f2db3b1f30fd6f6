//! Ordered field-reading strategies.

use tracing::trace;

use crate::render::{ElementRef, Locator, RenderingSource};

/// How a strategy reads a value off the element it selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadMode {
    /// Rendered text.
    Text,
    /// A DOM property, e.g. `textContent`.
    Property(String),
    /// A markup attribute, e.g. `href`.
    Attribute(String),
}

/// One way of obtaining a field: optionally locate a descendant, then read it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldStrategy {
    /// Descendant to read; `None` reads the anchor element itself.
    pub locator: Option<Locator>,
    pub read: ReadMode,
}

impl FieldStrategy {
    /// Reads the anchor element's own text.
    #[must_use]
    pub fn own_text() -> Self {
        Self {
            locator: None,
            read: ReadMode::Text,
        }
    }

    #[must_use]
    pub fn own_property(name: &str) -> Self {
        Self {
            locator: None,
            read: ReadMode::Property(name.to_string()),
        }
    }

    #[must_use]
    pub fn own_attribute(name: &str) -> Self {
        Self {
            locator: None,
            read: ReadMode::Attribute(name.to_string()),
        }
    }

    /// Reads the text of the first descendant matching the CSS `selector`.
    #[must_use]
    pub fn text_of(selector: &str) -> Self {
        Self {
            locator: Some(Locator::css(selector)),
            read: ReadMode::Text,
        }
    }

    /// Reads attribute `name` of the first descendant matching the CSS `selector`.
    #[must_use]
    pub fn attribute_of(selector: &str, name: &str) -> Self {
        Self {
            locator: Some(Locator::css(selector)),
            read: ReadMode::Attribute(name.to_string()),
        }
    }

    /// Applies the strategy under `anchor`, returning the trimmed, non-empty value.
    ///
    /// Every rendering error is swallowed: a failed strategy simply yields nothing.
    pub async fn resolve(&self, source: &dyn RenderingSource, anchor: &ElementRef) -> Option<String> {
        let target = match &self.locator {
            Some(locator) => match source.find_one(Some(anchor), locator).await {
                Ok(Some(element)) => element,
                Ok(None) => return None,
                Err(error) => {
                    trace!(%locator, %error, "field locator failed");
                    return None;
                }
            },
            None => anchor.clone(),
        };

        let raw = match &self.read {
            ReadMode::Text => source.text(&target).await.map(Some),
            ReadMode::Property(name) => source.property(&target, name).await,
            ReadMode::Attribute(name) => source.attribute(&target, name).await,
        };

        match raw {
            Ok(value) => value
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            Err(error) => {
                trace!(read = ?self.read, %error, "field read failed");
                None
            }
        }
    }
}

/// Returns the first non-empty value produced by `strategies`, in order.
pub async fn first_value(
    strategies: &[FieldStrategy],
    source: &dyn RenderingSource,
    anchor: &ElementRef,
) -> Option<String> {
    for strategy in strategies {
        if let Some(value) = strategy.resolve(source, anchor).await {
            return Some(value);
        }
    }
    None
}
