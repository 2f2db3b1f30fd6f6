//! HTTP session that replays the rendering session's identity.
//!
//! A [`FetchSession`] is built once per run from a snapshot of the browser's
//! cookies and user agent, so artifact requests look like they come from the
//! page that listed them. The snapshot is never refreshed.

use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::REFERER;
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument, warn};
use url::Url;

use super::constants::CONNECT_TIMEOUT;
use super::error::FetchError;
use crate::render::{RenderingSource, SessionCookie};
use crate::user_agent;

/// Cookie-carrying HTTP client for artifact downloads.
#[derive(Debug, Clone)]
pub struct FetchSession {
    client: Client,
    user_agent: String,
    cookie_count: usize,
}

impl FetchSession {
    /// Builds a session from explicit cookies and user agent.
    ///
    /// Cookies without a domain are scoped to `origin`. A `None` user agent
    /// falls back to the crate's default.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    pub fn new(
        cookies: &[SessionCookie],
        origin: &Url,
        user_agent: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let jar = Arc::new(Jar::default());
        for cookie in cookies {
            let (line, scope) = cookie_line(cookie, origin);
            jar.add_cookie_str(&line, &scope);
        }

        let user_agent = user_agent
            .map(str::trim)
            .filter(|ua| !ua.is_empty())
            .map_or_else(user_agent::default_download_user_agent, ToString::to_string);

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .timeout(timeout)
            .gzip(true)
            .user_agent(user_agent.as_str())
            .cookie_provider(jar)
            .build()
            .map_err(|source| FetchError::Client { source })?;

        Ok(Self {
            client,
            user_agent,
            cookie_count: cookies.len(),
        })
    }

    /// Snapshots cookies and `navigator.userAgent` from a live rendering session.
    ///
    /// Snapshot failures are logged and degrade to no cookies or the default
    /// user agent.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Client`] if the HTTP client cannot be built.
    #[instrument(skip(source), fields(origin = %origin))]
    pub async fn snapshot(
        source: &dyn RenderingSource,
        origin: &Url,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let cookies = match source.cookies().await {
            Ok(cookies) => cookies,
            Err(error) => {
                warn!(%error, "could not read session cookies, downloading without them");
                Vec::new()
            }
        };
        let user_agent = match source.user_agent().await {
            Ok(user_agent) => user_agent,
            Err(error) => {
                warn!(%error, "could not read browser user agent, using default");
                None
            }
        };

        let session = Self::new(&cookies, origin, user_agent.as_deref(), timeout)?;
        debug!(
            cookies = session.cookie_count,
            user_agent = %session.user_agent,
            "fetch session snapshot taken"
        );
        Ok(session)
    }

    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    #[must_use]
    pub fn cookie_count(&self) -> usize {
        self.cookie_count
    }

    /// Sends a GET with the given referer and checks for a 200 response.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Timeout`] or [`FetchError::Network`] if the
    /// request fails, and [`FetchError::HttpStatus`] for any status other
    /// than 200.
    pub async fn get(&self, url: &Url, referer: &str) -> Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .header(REFERER, referer)
            .send()
            .await
            .map_err(|e| FetchError::network(url.as_str(), e))?;

        if response.status() != StatusCode::OK {
            return Err(FetchError::http_status(
                url.as_str(),
                response.status().as_u16(),
            ));
        }
        Ok(response)
    }
}

/// Renders a cookie as a `Set-Cookie` line plus the URL it is stored against.
///
/// A cookie without a domain is host-only for `origin`, the listing page, so
/// artifact hosts on sibling subdomains do not receive it. Drivers report the
/// domain for every cookie they expose, which keeps this case rare.
fn cookie_line(cookie: &SessionCookie, origin: &Url) -> (String, Url) {
    let mut line = format!("{}={}", cookie.name, cookie.value);
    let path = cookie.path.as_deref().unwrap_or("/");
    line.push_str("; Path=");
    line.push_str(path);

    let scope = cookie
        .domain
        .as_deref()
        .map(|domain| domain.trim_start_matches('.'))
        .filter(|domain| !domain.is_empty())
        .and_then(|domain| {
            line.push_str("; Domain=");
            line.push_str(domain);
            Url::parse(&format!("{}://{domain}/", origin.scheme())).ok()
        })
        .unwrap_or_else(|| origin.clone());
    (line, scope)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::render::memory::MemoryBrowser;

    fn origin() -> Url {
        Url::parse("https://kns.example.org/kns8/defaultresult/index").unwrap()
    }

    #[test]
    fn test_cookie_line_with_domain_and_path() {
        let cookie = SessionCookie::new("SID", "abc")
            .with_domain(".example.org")
            .with_path("/kns8");
        let (line, scope) = cookie_line(&cookie, &origin());
        assert_eq!(line, "SID=abc; Path=/kns8; Domain=example.org");
        assert_eq!(scope.as_str(), "https://example.org/");
    }

    #[test]
    fn test_cookie_line_without_domain_uses_origin() {
        let cookie = SessionCookie::new("token", "xyz");
        let (line, scope) = cookie_line(&cookie, &origin());
        assert_eq!(line, "token=xyz; Path=/");
        assert_eq!(scope, origin());
    }

    #[test]
    fn test_domainless_cookie_stays_on_listing_host() {
        use reqwest::cookie::CookieStore;

        let jar = Jar::default();
        let (line, scope) = cookie_line(&SessionCookie::new("token", "xyz"), &origin());
        jar.add_cookie_str(&line, &scope);
        let (line, scope) = cookie_line(
            &SessionCookie::new("SID", "abc").with_domain(".example.org"),
            &origin(),
        );
        jar.add_cookie_str(&line, &scope);

        let listing_host = jar
            .cookies(&Url::parse("https://kns.example.org/dl/1").unwrap())
            .unwrap();
        let listing_host = listing_host.to_str().unwrap();
        assert!(listing_host.contains("token=xyz"));
        assert!(listing_host.contains("SID=abc"));

        let sibling = jar
            .cookies(&Url::parse("https://bar.example.org/dl/1").unwrap())
            .unwrap();
        assert_eq!(sibling.to_str().unwrap(), "SID=abc");
    }

    #[test]
    fn test_default_user_agent_when_none_given() {
        let session = FetchSession::new(&[], &origin(), None, Duration::from_secs(5)).unwrap();
        assert!(session.user_agent().starts_with("harvester/"));
    }

    #[test]
    fn test_blank_user_agent_falls_back_to_default() {
        let session = FetchSession::new(&[], &origin(), Some("  "), Duration::from_secs(5)).unwrap();
        assert!(session.user_agent().starts_with("harvester/"));
    }

    #[tokio::test]
    async fn test_snapshot_copies_browser_identity() {
        let browser = MemoryBrowser::new()
            .with_user_agent("Mozilla/5.0 Snapshot")
            .with_cookie(SessionCookie::new("SID", "abc"))
            .with_cookie(SessionCookie::new("LID", "def").with_domain(".example.org"));

        let session = FetchSession::snapshot(&browser, &origin(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(session.user_agent(), "Mozilla/5.0 Snapshot");
        assert_eq!(session.cookie_count(), 2);
    }
}
