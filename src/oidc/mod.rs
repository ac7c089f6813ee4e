//! OIDC browser login against Vault
//!
//! Drives one login attempt end to end:
//!
//! ```text
//! Idle → AwaitingAuthorizationUrl → ListenerStarted → AwaitingCallback
//!      → ExchangingCode → Completed
//!                 (any step) ↘ Failed
//! ```
//!
//! 1. Ask Vault for an authorization URL for the configured role, with the
//!    redirect URI `http://<host>:<callback_port>/oidc/callback`.
//! 2. Pull `nonce` and `state` out of it and bind the callback listener.
//! 3. Hand the URL to a [`BrowserDriver`]. The bound socket queues the
//!    redirect while the browser works, so no delay is needed.
//! 4. Exchange the received code (with the nonce and state) for a token.
//!
//! The listener is owned by the attempt; it is joined before the attempt
//! returns, or dropped with the attempt if an earlier step fails.

mod browser;
mod callback;
mod state;

pub use browser::{BrowserDriver, BrowserSession, HeadlessBrowser, InteractiveBrowser, driver_for};
pub use callback::{CALLBACK_PATH, CallbackListener, CallbackParams, CallbackResult};
pub use state::{AuthUrlParams, extract_auth_url_params};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::vault::VaultApi;
use crate::{Error, Result};

/// Progress of an OIDC login attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OidcState {
    /// No attempt started
    Idle,
    /// Waiting for Vault to hand out an authorization URL
    AwaitingAuthorizationUrl,
    /// Callback listener bound
    ListenerStarted,
    /// Browser driven, waiting for the redirect
    AwaitingCallback,
    /// Exchanging the authorization code for a token
    ExchangingCode,
    /// Token obtained
    Completed,
    /// Attempt failed
    Failed,
}

impl fmt::Display for OidcState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::AwaitingAuthorizationUrl => "awaiting_authorization_url",
            Self::ListenerStarted => "listener_started",
            Self::AwaitingCallback => "awaiting_callback",
            Self::ExchangingCode => "exchanging_code",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Parameters of the OIDC login
#[derive(Debug, Clone)]
pub struct OidcSettings {
    /// Vault OIDC role
    pub role: String,
    /// Mount path of the OIDC auth method
    pub mount: String,
    /// Host used in the redirect URI and for binding the listener
    pub callback_host: String,
    /// Port of the callback listener
    pub callback_port: u16,
    /// How long to wait for the redirect
    pub callback_timeout: Duration,
}

impl OidcSettings {
    /// Derive the settings from the broker configuration
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            role: config.oidc.role.clone(),
            mount: config.oidc.mount.clone(),
            callback_host: config.server.host.clone(),
            callback_port: config.oidc.callback_port,
            callback_timeout: config.oidc.callback_timeout,
        }
    }

    /// Redirect URI registered with the identity provider
    #[must_use]
    pub fn redirect_uri(&self) -> String {
        format!(
            "http://{}:{}{CALLBACK_PATH}",
            self.callback_host, self.callback_port
        )
    }
}

/// Runs OIDC login attempts
pub struct OidcOrchestrator {
    backend: Arc<dyn VaultApi>,
    browser: Box<dyn BrowserDriver>,
    settings: OidcSettings,
    state: Mutex<OidcState>,
}

impl OidcOrchestrator {
    /// Create an orchestrator
    #[must_use]
    pub fn new(
        backend: Arc<dyn VaultApi>,
        browser: Box<dyn BrowserDriver>,
        settings: OidcSettings,
    ) -> Self {
        Self {
            backend,
            browser,
            settings,
            state: Mutex::new(OidcState::Idle),
        }
    }

    /// State of the most recent attempt
    pub fn state(&self) -> OidcState {
        *self.state.lock()
    }

    /// Login settings
    pub fn settings(&self) -> &OidcSettings {
        &self.settings
    }

    fn transition(&self, next: OidcState) {
        let mut state = self.state.lock();
        debug!(from = %*state, to = %next, "OIDC state transition");
        *state = next;
    }

    /// Run one login attempt and return the client token
    ///
    /// Dropping the returned future mid-attempt leaves the state at
    /// [`OidcState::Failed`].
    pub async fn login(&self) -> Result<String> {
        let mut attempt = Attempt {
            orchestrator: self,
            finished: false,
        };
        let result = self.run().await;
        attempt.finished = true;
        match &result {
            Ok(_) => {
                self.transition(OidcState::Completed);
                info!("OIDC login completed");
            }
            Err(e) => {
                self.transition(OidcState::Failed);
                warn!(error = %e, kind = e.kind(), "OIDC login failed");
            }
        }
        result
    }

    async fn run(&self) -> Result<String> {
        self.transition(OidcState::AwaitingAuthorizationUrl);
        let redirect_uri = self.settings.redirect_uri();
        let auth_url = match self
            .backend
            .oidc_authorization_url(&self.settings.role, &redirect_uri)
            .await
        {
            Ok(Some(url)) => url,
            Ok(None) => {
                return Err(Error::AuthorizationUrlUnavailable(
                    "Authorization URL is empty".to_string(),
                ));
            }
            Err(e) => {
                return Err(Error::AuthorizationUrlUnavailable(format!(
                    "Error while getting OIDC authorization URL: {e}"
                )));
            }
        };
        debug!(%redirect_uri, "Received OIDC authorization URL");

        let params = extract_auth_url_params(&auth_url)?;
        let listener = CallbackListener::bind(&self.settings.callback_host, self.settings.callback_port)
            .await?
            .expect_state(params.state.clone());
        self.transition(OidcState::ListenerStarted);

        let session = self.browser.navigate(&auth_url).await?;
        self.transition(OidcState::AwaitingCallback);

        let callback = listener.wait(self.settings.callback_timeout).await;
        session.close().await;
        let callback = callback?;

        self.transition(OidcState::ExchangingCode);
        match self
            .backend
            .oidc_callback(&callback.code, &self.settings.mount, &params.nonce, &params.state)
            .await
        {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(Error::TokenExchangeFailed(
                "response lacks auth.client_token".to_string(),
            )),
            Err(Error::BackendRejected { status, message }) => Err(Error::TokenExchangeFailed(
                format!("HTTP {status} - {message}"),
            )),
            Err(e) => Err(e),
        }
    }
}

/// Fails an attempt whose `login` future is dropped before it finishes
struct Attempt<'a> {
    orchestrator: &'a OidcOrchestrator,
    finished: bool,
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(state = %self.orchestrator.state(), "OIDC login abandoned");
            self.orchestrator.transition(OidcState::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_uri_uses_host_and_callback_port() {
        let mut config = Config::default();
        config.server.host = "127.0.0.1".to_string();
        config.oidc.callback_port = 9250;

        let settings = OidcSettings::from_config(&config);
        assert_eq!(settings.redirect_uri(), "http://127.0.0.1:9250/oidc/callback");
        assert_eq!(settings.role, "default");
        assert_eq!(settings.mount, "oidc");
    }

    #[test]
    fn state_names_are_snake_case() {
        assert_eq!(OidcState::AwaitingAuthorizationUrl.to_string(), "awaiting_authorization_url");
        assert_eq!(OidcState::Completed.to_string(), "completed");
    }
}
