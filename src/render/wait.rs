//! Bounded polling waits over a [`RenderingSource`].
//!
//! Every wait evaluates its condition at least once, so a zero timeout
//! degrades to a single check. Errors raised while polling count as
//! "not yet" and are logged at trace level.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use super::{ElementRef, Locator, RenderingSource};

/// Default interval between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Script reporting the document ready state.
pub const READY_STATE_SCRIPT: &str = "return document.readyState;";

/// Script reporting whether no jQuery requests are in flight (true when jQuery is absent).
pub const AJAX_IDLE_SCRIPT: &str =
    "return (typeof jQuery === 'undefined') || jQuery.active == 0;";

/// Polls `probe` until it yields a value or `timeout` expires.
pub async fn poll_until<T, F, Fut>(timeout: Duration, poll_interval: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }
        let now = Instant::now();
        if now >= deadline {
            return None;
        }
        let remaining = deadline - now;
        tokio::time::sleep(poll_interval.min(remaining)).await;
    }
}

/// Polls `condition` until it returns `true` or `timeout` expires.
///
/// Returns whether the condition was satisfied.
pub async fn wait_until<F, Fut>(timeout: Duration, poll_interval: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    poll_until(timeout, poll_interval, || {
        let check = condition();
        async move { check.await.then_some(()) }
    })
    .await
    .is_some()
}

/// Waits for the first element matching `locator` anywhere in the document.
pub async fn wait_for_element(
    source: &dyn RenderingSource,
    locator: &Locator,
    timeout: Duration,
    poll_interval: Duration,
) -> Option<ElementRef> {
    let found = poll_until(timeout, poll_interval, || async move {
        match source.find_one(None, locator).await {
            Ok(element) => element,
            Err(error) => {
                trace!(%locator, %error, "element lookup failed while waiting");
                None
            }
        }
    })
    .await;
    if found.is_none() {
        trace!(%locator, ?timeout, "element did not appear");
    }
    found
}

/// Waits until at least one element matches `locator`, returning all matches.
///
/// Returns an empty list on timeout.
pub async fn wait_for_elements(
    source: &dyn RenderingSource,
    locator: &Locator,
    timeout: Duration,
    poll_interval: Duration,
) -> Vec<ElementRef> {
    poll_until(timeout, poll_interval, || async move {
        match source.find_all(None, locator).await {
            Ok(elements) if !elements.is_empty() => Some(elements),
            Ok(_) => None,
            Err(error) => {
                trace!(%locator, %error, "element lookup failed while waiting");
                None
            }
        }
    })
    .await
    .unwrap_or_default()
}

/// Time budgets for deciding that a page has finished loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLoadWait {
    /// Budget for `document.readyState == "complete"`.
    pub ready_timeout: Duration,
    /// Budget for in-flight jQuery requests to drain.
    pub ajax_timeout: Duration,
    /// Fixed pause after both checks.
    pub settle: Duration,
    pub poll_interval: Duration,
}

impl Default for PageLoadWait {
    fn default() -> Self {
        Self {
            ready_timeout: Duration::from_secs(10),
            ajax_timeout: Duration::from_secs(2),
            settle: Duration::from_millis(500),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PageLoadWait {
    /// No waiting beyond a single check of each condition.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            ready_timeout: Duration::ZERO,
            ajax_timeout: Duration::ZERO,
            settle: Duration::ZERO,
            poll_interval: Duration::ZERO,
        }
    }
}

/// Waits for the document to report `complete` and for AJAX activity to drain.
///
/// Returns `false` when the ready state never became `complete`. A busy
/// AJAX queue only delays the return; it never makes the page count as
/// unloaded.
pub async fn wait_for_page_load(source: &dyn RenderingSource, budget: &PageLoadWait) -> bool {
    let ready = wait_until(budget.ready_timeout, budget.poll_interval, || async move {
        matches!(
            source.evaluate(READY_STATE_SCRIPT).await,
            Ok(value) if value.as_str() == Some("complete")
        )
    })
    .await;

    if !ready {
        debug!(timeout = ?budget.ready_timeout, "document never reached readyState=complete");
        return false;
    }

    let idle = wait_until(budget.ajax_timeout, budget.poll_interval, || async move {
        // Script errors (no jQuery binding, detached frame) count as idle.
        source
            .evaluate(AJAX_IDLE_SCRIPT)
            .await
            .map_or(true, |value| value.as_bool().unwrap_or(true))
    })
    .await;
    if !idle {
        trace!("AJAX still active after budget, continuing");
    }

    if !budget.settle.is_zero() {
        tokio::time::sleep(budget.settle).await;
    }
    true
}
