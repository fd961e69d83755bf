//! Capability surfaces consumed by the core components.
//!
//! Two distinct boundaries exist: the browser automation handle
//! ([`BrowserPage`], [`BrowserProvider`]) driven by the orchestrating
//! process, and the authenticated in-page request capability
//! ([`AuthenticatedApi`]) that only a signed-on [`Session`](crate::session::Session)
//! can provide. Core components depend on these traits, never on a concrete
//! automation backend.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Failures of the underlying automation handle.
#[derive(Error, Debug)]
pub enum DriverError {
    /// A UI anchor never appeared within its bound.
    #[error("element '{selector}' did not appear within {timeout_secs}s")]
    ElementTimeout { selector: String, timeout_secs: u64 },

    #[error("navigation to '{url}' failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("script evaluation failed: {0}")]
    Evaluation(String),

    #[error("automation transport error: {0}")]
    Transport(String),
}

/// One remote browser page. The handle is single-command-at-a-time; callers
/// never issue concurrent commands against the same page.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigates and waits for the load to complete.
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Waits until `selector` matches a visible element.
    ///
    /// # Errors
    ///
    /// [`DriverError::ElementTimeout`] if the element never appears within
    /// `timeout`.
    async fn wait_for(&self, selector: &str, timeout: Duration) -> Result<(), DriverError>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    /// Evaluates a script expression inside the page and returns its
    /// serializable result. Promise results are awaited before returning.
    /// This runs with the page's cookies, which is the only channel through
    /// which portal API calls become authorized.
    async fn eval(&self, script: &str) -> Result<Value, DriverError>;

    async fn current_url(&self) -> Result<String, DriverError>;

    async fn title(&self) -> Result<String, DriverError>;

    /// Releases the remote page/context.
    async fn close(&self) -> Result<(), DriverError>;
}

/// Opens fresh browser pages, one live page per harvest lifecycle.
#[async_trait]
pub trait BrowserProvider: Send + Sync {
    type Page: BrowserPage;

    async fn open(&self) -> Result<Self::Page, DriverError>;
}

/// Failures of one authenticated in-page request.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request to '{path}' returned HTTP {status}")]
    Status { path: String, status: u16 },

    #[error("request to '{path}' failed in transit: {reason}")]
    Transport { path: String, reason: String },

    #[error("response from '{path}' was not the expected shape: {reason}")]
    Malformed { path: String, reason: String },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Authenticated request capability, scoped to one live session.
#[async_trait]
pub trait AuthenticatedApi: Send + Sync {
    /// Issues one same-origin GET inside the page and returns the JSON body.
    async fn get_json(&self, path: &str) -> Result<Value, ApiError>;

    /// Fetches binary content inside the page and returns it base64-encoded.
    /// The payload is transcoded within the authenticated boundary and
    /// crosses it exactly once as an opaque string.
    async fn get_encoded_binary(&self, path: &str) -> Result<String, ApiError>;
}

/// Delay policy for every suspension point in a harvest lifecycle.
///
/// Encapsulated as a value so each target can be tuned independently and
/// tests can zero it out.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Settle after typing the identity.
    pub settle_short: Duration,
    /// Settle after page loads and before submitting the secret.
    pub settle_medium: Duration,
    /// Settle after the SSO redirect lands.
    pub settle_long: Duration,
    /// Settle after the post-login redirect before classifying.
    pub post_login: Duration,
    /// Between listing page requests.
    pub between_pages: Duration,
    /// Between per-record enrichment rounds.
    pub between_records: Duration,
    /// Between serialized target lifecycles in a sweep.
    pub target_cooldown: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            settle_short: Duration::from_millis(1000),
            settle_medium: Duration::from_millis(1500),
            settle_long: Duration::from_millis(2000),
            post_login: Duration::from_millis(5000),
            between_pages: Duration::from_millis(500),
            between_records: Duration::from_millis(100),
            target_cooldown: Duration::from_millis(3000),
        }
    }
}

impl Pacing {
    /// All delays zeroed. Test configurations only.
    pub fn none() -> Self {
        Self {
            settle_short: Duration::ZERO,
            settle_medium: Duration::ZERO,
            settle_long: Duration::ZERO,
            post_login: Duration::ZERO,
            between_pages: Duration::ZERO,
            between_records: Duration::ZERO,
            target_cooldown: Duration::ZERO,
        }
    }
}
