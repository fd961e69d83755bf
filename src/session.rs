//! Interactive sign-on driver and the authenticated session it produces.
//!
//! This module provides the [`SessionDriver`] that walks the portal's SSO
//! flow through a remote browser page:
//! - Linear step sequence with explicit per-step bounds via `tokio::time::timeout`
//! - Short settle pauses layered under condition-waits (the remote UI needs
//!   both)
//! - Structured outcome classification via [`classify_outcome`]
//! - Structured logging of phase transitions via `tracing`
//!
//! No retries are built in. A failed attempt burns the page; the caller
//! decides whether to retry with a fresh one.

use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::model::{Credential, PortalConfig};
use crate::traits::{ApiError, AuthenticatedApi, BrowserPage, DriverError, Pacing};

/// SSO entry control on the portal's login page.
const SSO_BUTTON: &str = "#btnSsoPdpj";
/// Identity field on the identity-provider form.
const USERNAME_FIELD: &str = "#username";
/// Secret field on the identity-provider form.
const PASSWORD_FIELD: &str = "#password";
/// Submit control on the identity-provider form.
const LOGIN_SUBMIT: &str = "#kc-login";

const ENTRY_NAV_BOUND: Duration = Duration::from_secs(60);
const SSO_BUTTON_BOUND: Duration = Duration::from_secs(10);
const SSO_REDIRECT_BOUND: Duration = Duration::from_secs(30);
const USERNAME_BOUND: Duration = Duration::from_secs(15);
const PASSWORD_BOUND: Duration = Duration::from_secs(10);
const SUBMIT_NAV_BOUND: Duration = Duration::from_secs(60);

/// Where a sign-on attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    AwaitingSso,
    AwaitingCredentials,
    Authenticated,
    Blocked,
    Failed,
}

/// Sign-on failures, fatal to the current harvest attempt.
#[derive(thiserror::Error, Debug)]
pub enum SessionError {
    /// An access-denial indicator was present on the landing page.
    #[error("access denied by the edge proxy (final url: {final_url})")]
    BlockedByEdgeProxy { final_url: String },

    /// The flow ended back on the identity-provider host.
    #[error("credentials rejected; landed back on the identity provider ({final_url})")]
    AuthenticationRejected { final_url: String },

    /// An expected UI anchor never appeared.
    #[error("expected UI anchor '{anchor}' never appeared")]
    StructureMismatch { anchor: String },

    /// Landed on neither the portal domain nor the identity provider.
    #[error("landed on neither the portal nor the identity provider: {final_url}")]
    UnexpectedRedirect { final_url: String },

    /// A step exceeded its explicit bound.
    #[error("step '{step}' exceeded its {timeout_secs}s bound")]
    Timeout { step: &'static str, timeout_secs: u64 },

    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl SessionError {
    /// Stable kind label for reports and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::BlockedByEdgeProxy { .. } => "blocked_by_edge_proxy",
            SessionError::AuthenticationRejected { .. } => "authentication_rejected",
            SessionError::StructureMismatch { .. } => "structure_mismatch",
            SessionError::UnexpectedRedirect { .. } => "unexpected_redirect",
            SessionError::Timeout { .. } => "timeout",
            SessionError::Driver(_) => "driver",
        }
    }

    /// Terminal phase this failure leaves the attempt in.
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionError::BlockedByEdgeProxy { .. } => SessionPhase::Blocked,
            _ => SessionPhase::Failed,
        }
    }
}

/// Classifies where a sign-on attempt landed.
///
/// Rules, in order (kept from the field-tested heuristics):
/// 1. `403` anywhere in the final URL or page title means the edge proxy
///    denied access.
/// 2. Landing on the portal host while not on the identity provider means
///    the session is live.
/// 3. Landing on the identity-provider host means the credentials were
///    rejected (a success never stays there).
/// 4. Anything else is an unexpected redirect.
pub fn classify_outcome(
    final_url: &str,
    title: &str,
    portal: &PortalConfig,
) -> Result<(), SessionError> {
    if final_url.contains("403") || title.contains("403") {
        return Err(SessionError::BlockedByEdgeProxy {
            final_url: final_url.to_string(),
        });
    }
    let on_idp = final_url.contains(&portal.idp_host);
    if final_url.contains(portal.portal_host()) && !on_idp {
        return Ok(());
    }
    if on_idp {
        return Err(SessionError::AuthenticationRejected {
            final_url: final_url.to_string(),
        });
    }
    Err(SessionError::UnexpectedRedirect {
        final_url: final_url.to_string(),
    })
}

/// Drives the multi-step sign-on flow against one portal instance.
pub struct SessionDriver {
    portal: PortalConfig,
    credential: Credential,
    pacing: Pacing,
}

impl SessionDriver {
    pub fn new(portal: PortalConfig, credential: Credential) -> Self {
        Self {
            portal,
            credential,
            pacing: Pacing::default(),
        }
    }

    /// Replaces the default delay policy.
    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Walks the sign-on sequence on `page` and classifies the outcome.
    ///
    /// The page's cookie jar is mutated as a side effect; that jar is the
    /// only channel through which the returned session's API calls are
    /// authorized.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] naming the failure class. The caller may
    /// retry with a fresh page; this driver never retries on its own.
    pub async fn authenticate<'p, P: BrowserPage>(
        &self,
        page: &'p P,
    ) -> Result<Session<'p, P>, SessionError> {
        let mut phase = SessionPhase::Unauthenticated;
        info!(url = %self.portal.login_url, "navigating to portal entry page");

        bounded("navigate-entry", ENTRY_NAV_BOUND, page.navigate(&self.portal.login_url))
            .await?;
        sleep(self.pacing.settle_medium).await;

        require_anchor(page.wait_for(SSO_BUTTON, SSO_BUTTON_BOUND).await, SSO_BUTTON)?;
        set_phase(&mut phase, SessionPhase::AwaitingSso);

        bounded("sso-redirect", SSO_REDIRECT_BOUND, page.click(SSO_BUTTON)).await?;
        sleep(self.pacing.settle_long).await;

        require_anchor(page.wait_for(USERNAME_FIELD, USERNAME_BOUND).await, USERNAME_FIELD)?;
        set_phase(&mut phase, SessionPhase::AwaitingCredentials);

        page.type_text(USERNAME_FIELD, &self.credential.username)
            .await?;
        sleep(self.pacing.settle_short).await;

        require_anchor(page.wait_for(PASSWORD_FIELD, PASSWORD_BOUND).await, PASSWORD_FIELD)?;
        page.type_text(PASSWORD_FIELD, &self.credential.secret)
            .await?;
        sleep(self.pacing.settle_medium).await;

        bounded("credential-submit", SUBMIT_NAV_BOUND, page.click(LOGIN_SUBMIT)).await?;
        sleep(self.pacing.post_login).await;

        let final_url = page.current_url().await?;
        let title = page.title().await?;
        debug!(%final_url, %title, "sign-on flow landed");

        match classify_outcome(&final_url, &title, &self.portal) {
            Ok(()) => {
                set_phase(&mut phase, SessionPhase::Authenticated);
                Ok(Session { page })
            }
            Err(err) => {
                set_phase(&mut phase, err.phase());
                warn!(kind = err.kind(), %final_url, "sign-on attempt failed");
                Err(err)
            }
        }
    }
}

fn set_phase(phase: &mut SessionPhase, next: SessionPhase) {
    debug!(from = ?*phase, to = ?next, "session phase transition");
    *phase = next;
}

/// Maps a missing-anchor wait into the structure-mismatch class; other
/// driver faults pass through.
fn require_anchor(result: Result<(), DriverError>, anchor: &str) -> Result<(), SessionError> {
    match result {
        Ok(()) => Ok(()),
        Err(DriverError::ElementTimeout { .. }) => Err(SessionError::StructureMismatch {
            anchor: anchor.to_string(),
        }),
        Err(err) => Err(SessionError::Driver(err)),
    }
}

async fn bounded<F>(step: &'static str, bound: Duration, fut: F) -> Result<(), SessionError>
where
    F: std::future::Future<Output = Result<(), DriverError>>,
{
    timeout(bound, fut)
        .await
        .map_err(|_| SessionError::Timeout {
            step,
            timeout_secs: bound.as_secs(),
        })?
        .map_err(SessionError::from)
}

/// One live authenticated session, bound to one browser page.
///
/// All portal API traffic runs as same-origin `fetch` calls inside the page,
/// so it rides on the cookies the sign-on flow established.
pub struct Session<'p, P: BrowserPage> {
    page: &'p P,
}

impl<P: BrowserPage> std::fmt::Debug for Session<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

impl<'p, P: BrowserPage> Session<'p, P> {
    /// Wraps an already-authenticated page without re-running sign-on.
    /// Useful when the caller re-enters a context it knows is live.
    pub fn assume_authenticated(page: &'p P) -> Self {
        Self { page }
    }
}

fn fetch_json_script(path: &str) -> String {
    // Serialize the path through serde_json so it lands as a proper JS
    // string literal regardless of content.
    let path_literal = Value::String(path.to_string()).to_string();
    format!(
        r#"(async () => {{
  try {{
    const response = await fetch({path_literal});
    if (!response.ok) {{ return {{ ok: false, status: response.status }}; }}
    return {{ ok: true, body: await response.json() }};
  }} catch (e) {{ return {{ ok: false, error: String(e) }}; }}
}})()"#
    )
}

fn fetch_binary_script(path: &str) -> String {
    let path_literal = Value::String(path.to_string()).to_string();
    format!(
        r#"(async () => {{
  try {{
    const response = await fetch({path_literal});
    if (!response.ok) {{ return {{ ok: false, status: response.status }}; }}
    const blob = await response.blob();
    const encoded = await new Promise((resolve) => {{
      const reader = new FileReader();
      reader.onloadend = () => resolve(reader.result.split(',')[1]);
      reader.readAsDataURL(blob);
    }});
    return {{ ok: true, body: encoded }};
  }} catch (e) {{ return {{ ok: false, error: String(e) }}; }}
}})()"#
    )
}

/// Unwraps the in-page fetch envelope into a typed result.
fn unwrap_envelope(path: &str, envelope: Value) -> Result<Value, ApiError> {
    if envelope.get("ok").and_then(Value::as_bool) == Some(true) {
        return Ok(envelope.get("body").cloned().unwrap_or(Value::Null));
    }
    if let Some(status) = envelope.get("status").and_then(Value::as_u64) {
        return Err(ApiError::Status {
            path: path.to_string(),
            status: status as u16,
        });
    }
    if let Some(reason) = envelope.get("error").and_then(Value::as_str) {
        return Err(ApiError::Transport {
            path: path.to_string(),
            reason: reason.to_string(),
        });
    }
    Err(ApiError::Malformed {
        path: path.to_string(),
        reason: "fetch envelope missing ok/status/error".to_string(),
    })
}

#[async_trait::async_trait]
impl<P: BrowserPage> AuthenticatedApi for Session<'_, P> {
    async fn get_json(&self, path: &str) -> Result<Value, ApiError> {
        let envelope = self.page.eval(&fetch_json_script(path)).await?;
        unwrap_envelope(path, envelope)
    }

    async fn get_encoded_binary(&self, path: &str) -> Result<String, ApiError> {
        let envelope = self.page.eval(&fetch_binary_script(path)).await?;
        match unwrap_envelope(path, envelope)? {
            Value::String(encoded) => Ok(encoded),
            other => Err(ApiError::Malformed {
                path: path.to_string(),
                reason: format!("expected base64 string, got {other}"),
            }),
        }
    }
}
