//! Rendering-engine seam.
//!
//! Traversal and extraction never parse markup themselves. They query the
//! rendered document through [`RenderingSource`], which is implemented by a
//! W3C WebDriver client ([`webdriver::WebDriverSession`]) for real runs and by
//! an in-memory document ([`memory::MemoryBrowser`]) for fixtures.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod wait;
pub mod webdriver;

pub use wait::{
    PageLoadWait, poll_until, wait_for_element, wait_for_elements, wait_for_page_load, wait_until,
};

/// WebDriver key code for the Enter key, usable with [`RenderingSource::send_keys`].
pub const ENTER_KEY: &str = "\u{E007}";

/// Script that clicks its first argument through the DOM instead of the pointer.
pub const SCRIPT_CLICK: &str = "arguments[0].click();";

/// How to find elements in the rendered document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Locator {
    /// CSS selector.
    Css(String),
    /// XPath expression.
    XPath(String),
}

impl Locator {
    #[must_use]
    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    #[must_use]
    pub fn xpath(expression: impl Into<String>) -> Self {
        Self::XPath(expression.into())
    }

    /// Locator matching elements carrying the class `name`.
    #[must_use]
    pub fn class(name: &str) -> Self {
        Self::Css(format!(".{name}"))
    }

    /// Locator matching the element with id `id`.
    #[must_use]
    pub fn id(id: &str) -> Self {
        Self::Css(format!("#{id}"))
    }

    /// Returns the raw selector or expression.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Css(value) | Self::XPath(value) => value,
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Css(selector) => write!(f, "css={selector}"),
            Self::XPath(expression) => write!(f, "xpath={expression}"),
        }
    }
}

/// Opaque reference to an element of the currently rendered document.
///
/// References become stale when the document is replaced (navigation or
/// reload); operations on a stale reference fail with
/// [`RenderError::StaleElement`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementRef(String);

impl ElementRef {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A cookie held by the rendering session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
}

impl SessionCookie {
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Errors raised by rendering-engine operations.
#[derive(Debug, Error)]
pub enum RenderError {
    /// No element matched the locator.
    #[error("no element found for {locator}")]
    NotFound {
        /// The locator that matched nothing.
        locator: String,
    },

    /// A bounded wait expired.
    #[error("timed out after {waited:?} waiting for {what}")]
    Timeout {
        /// What was awaited.
        what: String,
        /// How long the wait lasted.
        waited: Duration,
    },

    /// The element belongs to a document that has since been replaced.
    #[error("stale element reference {element}")]
    StaleElement {
        /// The stale reference.
        element: String,
    },

    /// Navigation to a URL failed.
    #[error("navigation to {url} failed: {message}")]
    Navigation {
        /// Target URL.
        url: String,
        /// Engine-reported reason.
        message: String,
    },

    /// Script execution failed inside the page.
    #[error("script error: {message}")]
    Script {
        /// Engine-reported reason.
        message: String,
    },

    /// The engine answered with an error or an unexpected payload.
    #[error("{command} failed: {error}: {message}")]
    Protocol {
        /// Command that failed.
        command: String,
        /// Error code reported by the engine.
        error: String,
        /// Human-readable detail.
        message: String,
    },

    /// The engine could not be reached.
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        /// Endpoint that was called.
        endpoint: String,
        /// Underlying HTTP error.
        #[source]
        source: reqwest::Error,
    },
}

impl RenderError {
    pub fn not_found(locator: &Locator) -> Self {
        Self::NotFound {
            locator: locator.to_string(),
        }
    }

    pub fn timeout(what: impl Into<String>, waited: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            waited,
        }
    }

    pub fn stale(element: &ElementRef) -> Self {
        Self::StaleElement {
            element: element.to_string(),
        }
    }

    pub fn navigation(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Navigation {
            url: url.into(),
            message: message.into(),
        }
    }

    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    pub fn protocol(
        command: impl Into<String>,
        error: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            command: command.into(),
            error: error.into(),
            message: message.into(),
        }
    }

    pub fn transport(endpoint: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            endpoint: endpoint.into(),
            source,
        }
    }

    /// Returns `true` for stale-reference failures, the only kind worth re-locating for.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::StaleElement { .. })
    }
}

/// Operations the harvester needs from a rendering engine.
///
/// `scope = None` queries the whole document; `Some(element)` restricts the
/// query to that element's descendants.
#[async_trait]
pub trait RenderingSource: Send + Sync {
    /// Loads `url` and waits for the engine's own navigation to finish.
    async fn navigate(&self, url: &str) -> Result<(), RenderError>;

    async fn current_url(&self) -> Result<String, RenderError>;

    /// Returns the first match, or `None` when nothing matches.
    async fn find_one(
        &self,
        scope: Option<&ElementRef>,
        locator: &Locator,
    ) -> Result<Option<ElementRef>, RenderError>;

    /// Returns every match in document order.
    async fn find_all(
        &self,
        scope: Option<&ElementRef>,
        locator: &Locator,
    ) -> Result<Vec<ElementRef>, RenderError>;

    /// Returns `element` or its nearest ancestor matching the CSS `selector`.
    async fn closest(
        &self,
        element: &ElementRef,
        selector: &str,
    ) -> Result<Option<ElementRef>, RenderError>;

    /// Rendered text of the element.
    async fn text(&self, element: &ElementRef) -> Result<String, RenderError>;

    /// DOM property such as `textContent` or `value`.
    async fn property(&self, element: &ElementRef, name: &str)
    -> Result<Option<String>, RenderError>;

    /// Markup attribute such as `href` or `disabled`.
    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, RenderError>;

    async fn click(&self, element: &ElementRef) -> Result<(), RenderError>;

    async fn clear(&self, element: &ElementRef) -> Result<(), RenderError>;

    /// Types `text` into the element; [`ENTER_KEY`] submits.
    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), RenderError>;

    /// Runs a synchronous script in the page and returns its result.
    async fn evaluate(&self, script: &str) -> Result<Value, RenderError>;

    /// Runs a script with `element` bound to `arguments[0]`.
    async fn evaluate_on(&self, script: &str, element: &ElementRef) -> Result<Value, RenderError>;

    /// Cookies visible to the current document.
    async fn cookies(&self) -> Result<Vec<SessionCookie>, RenderError>;

    /// Reloads the current document.
    async fn refresh(&self) -> Result<(), RenderError>;

    /// Ends the session. Further calls may fail.
    async fn close(&self) -> Result<(), RenderError>;

    /// Document title, or an empty string when unavailable.
    async fn title(&self) -> Result<String, RenderError> {
        let value = self.evaluate("return document.title;").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    /// The engine's `navigator.userAgent`, if it reports one.
    async fn user_agent(&self) -> Result<Option<String>, RenderError> {
        let value = self.evaluate("return navigator.userAgent;").await?;
        Ok(value
            .as_str()
            .map(str::trim)
            .filter(|ua| !ua.is_empty())
            .map(ToString::to_string))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_constructors() {
        assert_eq!(Locator::class("fz14"), Locator::Css(".fz14".to_string()));
        assert_eq!(Locator::id("PageNext"), Locator::Css("#PageNext".to_string()));
        assert_eq!(Locator::xpath("//a").value(), "//a");
    }

    #[test]
    fn test_locator_display_names_strategy() {
        assert_eq!(Locator::css("td.date").to_string(), "css=td.date");
        assert_eq!(Locator::xpath("//button").to_string(), "xpath=//button");
    }

    #[test]
    fn test_render_error_is_stale() {
        let element = ElementRef::new("e1");
        assert!(RenderError::stale(&element).is_stale());
        assert!(!RenderError::not_found(&Locator::css("a")).is_stale());
        assert!(!RenderError::script("boom").is_stale());
    }

    #[test]
    fn test_render_error_display() {
        let err = RenderError::timeout("#PageNext", Duration::from_secs(10));
        assert!(err.to_string().contains("#PageNext"));
        let err = RenderError::protocol("find element", "no such window", "window closed");
        assert_eq!(
            err.to_string(),
            "find element failed: no such window: window closed"
        );
    }
}
