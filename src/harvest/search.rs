//! Submitting the query from the search home page.

use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::{HarvestError, Pacing, pause};
use crate::extract::ListingLayout;
use crate::render::{
    ENTER_KEY, ElementRef, Locator, RenderError, RenderingSource, SCRIPT_CLICK, wait_for_element,
    wait_for_page_load, wait_until,
};
use crate::retry::{RetryPolicy, retry};

/// Default search home page.
pub const DEFAULT_HOME_URL: &str = "https://www.cnki.net/";

/// Attempts allowed for typing the query when the input goes stale.
const TYPE_ATTEMPTS: u32 = 3;

/// Where and how to submit a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchForm {
    pub home_url: String,
    /// Search input candidates, tried in order; the first is the primary.
    pub inputs: Vec<Locator>,
    /// Submit control candidates, tried in order.
    pub buttons: Vec<Locator>,
}

impl Default for SearchForm {
    fn default() -> Self {
        Self {
            home_url: DEFAULT_HOME_URL.to_string(),
            inputs: [
                "#txt_SearchText",
                "input#txt_SearchText",
                "input[placeholder*='检索']",
                "input[type='text'][name*='search']",
                ".search-input",
            ]
            .into_iter()
            .map(Locator::css)
            .collect(),
            buttons: vec![
                Locator::css(".search-btn"),
                Locator::css("button.search-btn"),
                Locator::css("input[type='submit']"),
                Locator::css("button[type='submit']"),
                Locator::css(".search-button"),
                Locator::xpath("//button[contains(text(), '检索')]"),
                Locator::xpath("//input[@value='检索']"),
            ],
        }
    }
}

impl SearchForm {
    #[must_use]
    pub fn with_home_url(mut self, home_url: &str) -> Self {
        self.home_url = home_url.to_string();
        self
    }
}

async fn first_present(
    source: &dyn RenderingSource,
    locators: &[Locator],
    timeout: Duration,
    poll_interval: Duration,
) -> Option<(ElementRef, Locator)> {
    for locator in locators {
        if let Some(element) = wait_for_element(source, locator, timeout, poll_interval).await {
            return Some((element, locator.clone()));
        }
    }
    None
}

/// Navigates home, types `query`, and triggers the search.
///
/// # Errors
///
/// Returns [`HarvestError::SearchSubmission`] when the home page cannot be
/// loaded, no search input exists, the query cannot be typed, or every way
/// of triggering the search fails.
#[instrument(skip(source, form, layout, pacing), fields(home = %form.home_url))]
pub(crate) async fn submit_search(
    source: &dyn RenderingSource,
    form: &SearchForm,
    layout: &ListingLayout,
    pacing: &Pacing,
    query: &str,
) -> Result<(), HarvestError> {
    source.navigate(&form.home_url).await.map_err(|error| {
        HarvestError::search_submission_caused_by("could not load the search home page", error)
    })?;
    wait_for_page_load(source, &pacing.page_load).await;

    let (input, input_locator) = first_present(
        source,
        &form.inputs,
        pacing.element_timeout,
        pacing.poll_interval,
    )
    .await
    .ok_or_else(|| HarvestError::search_submission("no search input found"))?;
    debug!(locator = %input_locator, "search input located");

    let primary = form.inputs.first().unwrap_or(&input_locator);
    let input = type_query(source, &input, primary, query).await?;

    trigger_submission(source, form, pacing, &input).await?;

    let home_url = form.home_url.clone();
    let navigated = wait_until(pacing.submit_timeout, pacing.poll_interval, || {
        let home_url = home_url.clone();
        async move {
            source.current_url().await.is_ok_and(|url| {
                layout.is_listing_url(&url) || url.trim_end_matches('/') != home_url.trim_end_matches('/')
            })
        }
    })
    .await;
    if !navigated {
        warn!(timeout = ?pacing.submit_timeout, "URL did not change after submitting search");
    }

    wait_for_page_load(source, &pacing.page_load).await;
    pause(pacing.after_submit_delay).await;
    info!(query, "search submitted");
    Ok(())
}

/// Clears the input and types the query, re-locating the primary input on stale references.
async fn type_query(
    source: &dyn RenderingSource,
    input: &ElementRef,
    primary: &Locator,
    query: &str,
) -> Result<ElementRef, HarvestError> {
    let policy = RetryPolicy::fixed(TYPE_ATTEMPTS, Duration::ZERO);
    retry(&policy, "type_query", RenderError::is_stale, |attempt| {
        let first = input.clone();
        async move {
            let target = if attempt == 1 {
                first
            } else {
                source
                    .find_one(None, primary)
                    .await?
                    .ok_or_else(|| RenderError::not_found(primary))?
            };
            source.clear(&target).await?;
            source.send_keys(&target, query).await?;
            Ok::<_, RenderError>(target)
        }
    })
    .await
    .map_err(|error| HarvestError::search_submission_caused_by("could not type the query", error))
}

/// Clicks the submit control, falling back to a script click and then Enter.
async fn trigger_submission(
    source: &dyn RenderingSource,
    form: &SearchForm,
    pacing: &Pacing,
    input: &ElementRef,
) -> Result<(), HarvestError> {
    let button = first_present(source, &form.buttons, pacing.probe_timeout, pacing.poll_interval).await;

    let Some((button, locator)) = button else {
        debug!("no search button found, pressing Enter");
        return source.send_keys(input, ENTER_KEY).await.map_err(|error| {
            HarvestError::search_submission_caused_by("pressing Enter failed", error)
        });
    };

    match source.click(&button).await {
        Ok(()) => return Ok(()),
        Err(error) => debug!(%locator, %error, "search button click failed, trying script click"),
    }
    match source.evaluate_on(SCRIPT_CLICK, &button).await {
        Ok(_) => return Ok(()),
        Err(error) => debug!(%locator, %error, "script click failed, pressing Enter"),
    }
    source.send_keys(input, ENTER_KEY).await.map_err(|error| {
        HarvestError::search_submission_caused_by("could not trigger the search", error)
    })
}
