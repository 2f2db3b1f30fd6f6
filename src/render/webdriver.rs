//! W3C WebDriver client.
//!
//! Talks JSON over HTTP to a running driver (chromedriver, geckodriver) and
//! exposes the session as a [`RenderingSource`].
//!
//! # Example
//!
//! ```no_run
//! use harvester_core::render::RenderingSource;
//! use harvester_core::render::webdriver::{BrowserOptions, WebDriverSession};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let session = WebDriverSession::connect("http://localhost:9515", &BrowserOptions::default()).await?;
//! session.navigate("https://www.cnki.net/").await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use super::{ElementRef, Locator, RenderError, RenderingSource, SessionCookie};

/// Key under which W3C drivers serialize element references.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Default per-command HTTP timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default page-load timeout negotiated with the driver.
const DEFAULT_PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

const CLOSEST_SCRIPT: &str = "return arguments[0].closest(arguments[1]);";

/// Browser launch options sent as session capabilities.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    /// Run without a visible window.
    pub headless: bool,
    /// Skip image loading to speed up listing pages.
    pub disable_images: bool,
    pub page_load_timeout: Duration,
    /// HTTP timeout for each driver command.
    pub request_timeout: Duration,
    /// Additional browser command-line switches.
    pub extra_args: Vec<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: false,
            disable_images: true,
            page_load_timeout: DEFAULT_PAGE_LOAD_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            extra_args: Vec::new(),
        }
    }
}

impl BrowserOptions {
    #[allow(clippy::cast_possible_truncation)]
    fn capabilities(&self) -> Value {
        let mut args = vec![
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--disable-gpu".to_string(),
            "--window-size=1920,1080".to_string(),
            "--disable-blink-features=AutomationControlled".to_string(),
        ];
        if self.headless {
            args.push("--headless=new".to_string());
        }
        args.extend(self.extra_args.iter().cloned());

        let mut chrome_options = json!({
            "args": args,
            "excludeSwitches": ["enable-automation"],
        });
        if self.disable_images {
            chrome_options["prefs"] = json!({
                "profile.managed_default_content_settings.images": 2,
            });
        }

        json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "pageLoadStrategy": "normal",
                    "timeouts": {
                        "pageLoad": self.page_load_timeout.as_millis() as u64,
                        "implicit": 0,
                    },
                    "goog:chromeOptions": chrome_options,
                }
            }
        })
    }
}

/// An established WebDriver session.
#[derive(Debug, Clone)]
pub struct WebDriverSession {
    client: Client,
    base_url: String,
    session_id: String,
}

impl WebDriverSession {
    /// Starts a new browser session on the driver listening at `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::Transport`] when the driver is unreachable and
    /// [`RenderError::Protocol`] when it refuses to create a session.
    #[instrument(skip(options))]
    pub async fn connect(endpoint: &str, options: &BrowserOptions) -> Result<Self, RenderError> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| RenderError::transport(endpoint, e))?;
        let base_url = endpoint.trim_end_matches('/').to_string();

        let value = send(
            &client,
            Method::POST,
            &format!("{base_url}/session"),
            Some(options.capabilities()),
            "new session",
        )
        .await?;

        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                RenderError::protocol("new session", "invalid response", "missing sessionId")
            })?
            .to_string();
        info!(session_id = %session_id, headless = options.headless, "WebDriver session started");

        Ok(Self {
            client,
            base_url,
            session_id,
        })
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        command: &str,
    ) -> Result<Value, RenderError> {
        let url = format!("{}/session/{}{path}", self.base_url, self.session_id);
        send(&self.client, method, &url, body, command).await
    }

    fn element_path(element: &ElementRef, suffix: &str) -> String {
        format!("/element/{}{suffix}", element.id())
    }
}

fn locator_body(locator: &Locator) -> Value {
    match locator {
        Locator::Css(selector) => json!({ "using": "css selector", "value": selector }),
        Locator::XPath(expression) => json!({ "using": "xpath", "value": expression }),
    }
}

fn element_json(element: &ElementRef) -> Value {
    json!({ ELEMENT_KEY: element.id() })
}

fn element_from(value: &Value) -> Option<ElementRef> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(ElementRef::new)
}

fn optional_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    }
}

/// Sends one driver command and unwraps the `value` member of the reply.
async fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
    command: &str,
) -> Result<Value, RenderError> {
    debug!(command, url, "webdriver command");
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }
    let response = request
        .send()
        .await
        .map_err(|e| RenderError::transport(url, e))?;
    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| RenderError::transport(url, e))?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        Ok(value)
    } else {
        Err(map_driver_error(command, &value))
    }
}

fn map_driver_error(command: &str, value: &Value) -> RenderError {
    let code = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match code {
        "stale element reference" => RenderError::StaleElement { element: message },
        "no such element" => RenderError::NotFound { locator: message },
        "timeout" | "script timeout" => RenderError::timeout(command, Duration::ZERO),
        "javascript error" => RenderError::script(message),
        other => RenderError::protocol(command, other, message),
    }
}

#[async_trait]
impl RenderingSource for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), RenderError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })), "navigate")
            .await
            .map(|_| ())
            .map_err(|error| match error {
                RenderError::Protocol { message, .. } => RenderError::navigation(url, message),
                RenderError::Timeout { .. } => {
                    RenderError::navigation(url, "page load timed out")
                }
                other => other,
            })
    }

    async fn current_url(&self) -> Result<String, RenderError> {
        let value = self
            .command(Method::GET, "/url", None, "get current url")
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn find_one(
        &self,
        scope: Option<&ElementRef>,
        locator: &Locator,
    ) -> Result<Option<ElementRef>, RenderError> {
        let path = scope.map_or_else(
            || "/element".to_string(),
            |element| Self::element_path(element, "/element"),
        );
        match self
            .command(Method::POST, &path, Some(locator_body(locator)), "find element")
            .await
        {
            Ok(value) => Ok(element_from(&value)),
            Err(RenderError::NotFound { .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    async fn find_all(
        &self,
        scope: Option<&ElementRef>,
        locator: &Locator,
    ) -> Result<Vec<ElementRef>, RenderError> {
        let path = scope.map_or_else(
            || "/elements".to_string(),
            |element| Self::element_path(element, "/elements"),
        );
        let value = self
            .command(Method::POST, &path, Some(locator_body(locator)), "find elements")
            .await?;
        Ok(value
            .as_array()
            .map(|items| items.iter().filter_map(element_from).collect())
            .unwrap_or_default())
    }

    async fn closest(
        &self,
        element: &ElementRef,
        selector: &str,
    ) -> Result<Option<ElementRef>, RenderError> {
        let body = json!({
            "script": CLOSEST_SCRIPT,
            "args": [element_json(element), selector],
        });
        let value = self
            .command(Method::POST, "/execute/sync", Some(body), "closest")
            .await?;
        Ok(element_from(&value))
    }

    async fn text(&self, element: &ElementRef) -> Result<String, RenderError> {
        let value = self
            .command(
                Method::GET,
                &Self::element_path(element, "/text"),
                None,
                "get element text",
            )
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn property(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, RenderError> {
        let value = self
            .command(
                Method::GET,
                &Self::element_path(element, &format!("/property/{name}")),
                None,
                "get element property",
            )
            .await?;
        Ok(optional_string(value))
    }

    async fn attribute(
        &self,
        element: &ElementRef,
        name: &str,
    ) -> Result<Option<String>, RenderError> {
        let value = self
            .command(
                Method::GET,
                &Self::element_path(element, &format!("/attribute/{name}")),
                None,
                "get element attribute",
            )
            .await?;
        Ok(optional_string(value))
    }

    async fn click(&self, element: &ElementRef) -> Result<(), RenderError> {
        self.command(
            Method::POST,
            &Self::element_path(element, "/click"),
            Some(json!({})),
            "element click",
        )
        .await
        .map(|_| ())
    }

    async fn clear(&self, element: &ElementRef) -> Result<(), RenderError> {
        self.command(
            Method::POST,
            &Self::element_path(element, "/clear"),
            Some(json!({})),
            "element clear",
        )
        .await
        .map(|_| ())
    }

    async fn send_keys(&self, element: &ElementRef, text: &str) -> Result<(), RenderError> {
        self.command(
            Method::POST,
            &Self::element_path(element, "/value"),
            Some(json!({ "text": text })),
            "element send keys",
        )
        .await
        .map(|_| ())
    }

    async fn evaluate(&self, script: &str) -> Result<Value, RenderError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": [] })),
            "execute script",
        )
        .await
    }

    async fn evaluate_on(&self, script: &str, element: &ElementRef) -> Result<Value, RenderError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": [element_json(element)] })),
            "execute script",
        )
        .await
    }

    async fn cookies(&self) -> Result<Vec<SessionCookie>, RenderError> {
        let value = self
            .command(Method::GET, "/cookie", None, "get all cookies")
            .await?;
        serde_json::from_value(value).map_err(|e| {
            RenderError::protocol("get all cookies", "invalid response", e.to_string())
        })
    }

    async fn refresh(&self) -> Result<(), RenderError> {
        self.command(Method::POST, "/refresh", Some(json!({})), "refresh")
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), fields(session_id = %self.session_id))]
    async fn close(&self) -> Result<(), RenderError> {
        self.command(Method::DELETE, "", None, "delete session")
            .await
            .map(|_| ())?;
        info!("WebDriver session closed");
        Ok(())
    }
}
