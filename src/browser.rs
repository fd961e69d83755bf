//! WebDriver-backed implementation of the browser capability.
//!
//! Talks the W3C WebDriver wire protocol (plain HTTP/JSON) to a local
//! chromedriver/geckodriver endpoint. Core components never depend on this
//! module directly; they consume the [`BrowserPage`]/[`BrowserProvider`]
//! traits and any compliant automation backend will do.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::debug;

use crate::traits::{BrowserPage, BrowserProvider, DriverError};

const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const PAGE_LOAD_TIMEOUT_MS: u64 = 60_000;
const SCRIPT_TIMEOUT_MS: u64 = 120_000;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Connects to one WebDriver endpoint and opens fresh sessions from it.
#[derive(Debug, Clone)]
pub struct WebDriver {
    http: reqwest::Client,
    endpoint: String,
}

impl WebDriver {
    /// `endpoint` is the driver root, e.g. `http://127.0.0.1:9515`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BrowserProvider for WebDriver {
    type Page = WebDriverPage;

    async fn open(&self) -> Result<WebDriverPage, DriverError> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            "--headless=new",
                            "--no-sandbox",
                            "--disable-dev-shm-usage",
                            format!("--user-agent={USER_AGENT}"),
                        ]
                    }
                }
            }
        });

        let body = wire_request(
            self.http
                .post(format!("{}/session", self.endpoint))
                .json(&capabilities),
        )
        .await?;

        let session_id = body
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| DriverError::Transport("session response missing sessionId".into()))?;

        let page = WebDriverPage {
            http: self.http.clone(),
            base: format!("{}/session/{session_id}", self.endpoint),
        };

        // Explicit bounds; the defaults are driver-specific.
        page.post(
            "/timeouts",
            json!({"pageLoad": PAGE_LOAD_TIMEOUT_MS, "script": SCRIPT_TIMEOUT_MS}),
        )
        .await?;

        debug!(session_id, "webdriver session opened");
        Ok(page)
    }
}

/// One live WebDriver session.
pub struct WebDriverPage {
    http: reqwest::Client,
    base: String,
}

impl WebDriverPage {
    async fn post(&self, path: &str, body: Value) -> Result<Value, DriverError> {
        wire_request(self.http.post(format!("{}{path}", self.base)).json(&body)).await
    }

    async fn get(&self, path: &str) -> Result<Value, DriverError> {
        wire_request(self.http.get(format!("{}{path}", self.base))).await
    }

    async fn find_element(&self, selector: &str) -> Result<String, DriverError> {
        let body = self
            .post(
                "/element",
                json!({"using": "css selector", "value": selector}),
            )
            .await?;
        element_reference(&body)
            .ok_or_else(|| DriverError::Transport(format!("no element handle for '{selector}'")))
    }

    async fn execute_sync(&self, script: &str, args: Value) -> Result<Value, DriverError> {
        self.post("/execute/sync", json!({"script": script, "args": args}))
            .await
    }

    async fn selector_visible(&self, selector: &str) -> Result<bool, DriverError> {
        let script = "const el = document.querySelector(arguments[0]);\
                      return !!(el && el.getClientRects().length > 0);";
        let result = self.execute_sync(script, json!([selector])).await?;
        Ok(result.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl BrowserPage for WebDriverPage {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        // The driver blocks until the document load completes (the default
        // "normal" page-load strategy); settle pauses above this layer cover
        // post-load asynchronous activity.
        self.post("/url", json!({"url": url}))
            .await
            .map_err(|err| DriverError::Navigation {
                url: url.to_string(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.selector_visible(selector).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::ElementTimeout {
                    selector: selector.to_string(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            sleep(ELEMENT_POLL_INTERVAL).await;
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        let element = self.find_element(selector).await?;
        self.post(&format!("/element/{element}/value"), json!({"text": text}))
            .await?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        let element = self.find_element(selector).await?;
        self.post(&format!("/element/{element}/click"), json!({}))
            .await?;
        Ok(())
    }

    async fn eval(&self, script: &str) -> Result<Value, DriverError> {
        let body = self
            .post(
                "/execute/async",
                json!({"script": wrap_async_script(script), "args": []}),
            )
            .await?;
        unwrap_eval_envelope(body)
    }

    async fn current_url(&self) -> Result<String, DriverError> {
        let value = self.get("/url").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::Transport("url response was not a string".into()))
    }

    async fn title(&self) -> Result<String, DriverError> {
        let value = self.get("/title").await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| DriverError::Transport("title response was not a string".into()))
    }

    async fn close(&self) -> Result<(), DriverError> {
        wire_request(self.http.delete(self.base.clone())).await?;
        debug!("webdriver session closed");
        Ok(())
    }
}

/// Sends one wire command and unwraps the protocol's `{"value": …}` shell.
async fn wire_request(request: reqwest::RequestBuilder) -> Result<Value, DriverError> {
    let response = request
        .send()
        .await
        .map_err(|err| DriverError::Transport(err.to_string()))?;

    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|err| DriverError::Transport(format!("unreadable wire response: {err}")))?;
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        Ok(value)
    } else {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown wire error");
        Err(DriverError::Transport(format!("HTTP {status}: {message}")))
    }
}

/// W3C element identifier key in find-element responses.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

fn element_reference(value: &Value) -> Option<String> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Adapts an expression-style script (possibly a promise) to the
/// execute-async calling convention, funnelling rejections into an
/// envelope instead of a script timeout.
fn wrap_async_script(script: &str) -> String {
    format!(
        "const done = arguments[arguments.length - 1];\
         Promise.resolve({script})\
           .then((value) => done({{ ok: true, value }}), (e) => done({{ ok: false, error: String(e) }}));"
    )
}

fn unwrap_eval_envelope(body: Value) -> Result<Value, DriverError> {
    if body.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(body.get("value").cloned().unwrap_or(Value::Null));
    }
    let reason = body
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("script returned no envelope");
    Err(DriverError::Evaluation(reason.to_string()))
}
