//! Vault authentication
//!
//! [`Authenticator::authenticate`] produces a validated session token:
//!
//! 1. A stored token that still validates is reused without logging in.
//! 2. Otherwise a method is selected: explicit override, then a static
//!    token, then an `AppRole` pair, then OIDC when enabled.
//! 3. The method runs, the resulting token is validated, stored and returned.

mod token_store;

pub use token_store::TokenStore;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::{debug, info};

use crate::oidc::OidcOrchestrator;
use crate::vault::VaultApi;
use crate::{Error, Result};

/// Supported authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Static token adopted as-is
    Token,
    /// Role ID / secret ID login
    AppRole,
    /// Browser-based OIDC login
    Oidc,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Token => "token",
            Self::AppRole => "approle",
            Self::Oidc => "oidc",
        })
    }
}

impl FromStr for AuthMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(Self::Token),
            "approle" => Ok(Self::AppRole),
            "oidc" => Ok(Self::Oidc),
            other => Err(Error::NoAuthMethodConfigured(format!(
                "unknown auth method '{other}'"
            ))),
        }
    }
}

/// Credentials and switches that drive method selection
#[derive(Debug, Clone, Default)]
pub struct AuthSettings {
    /// Explicit method override
    pub method_override: Option<String>,
    /// Static token
    pub token: Option<String>,
    /// `AppRole` role ID
    pub role_id: Option<String>,
    /// `AppRole` secret ID
    pub secret_id: Option<String>,
    /// OIDC allowed as fallback
    pub oidc_enabled: bool,
    /// Headless OIDC requested (implies OIDC)
    pub oidc_headless: bool,
}

impl AuthSettings {
    /// Select the method for this attempt
    pub fn select_method(&self) -> Result<AuthMethod> {
        if let Some(method) = &self.method_override {
            return method.parse();
        }
        if self.token.is_some() {
            Ok(AuthMethod::Token)
        } else if self.role_id.is_some() && self.secret_id.is_some() {
            Ok(AuthMethod::AppRole)
        } else if self.oidc_enabled || self.oidc_headless {
            Ok(AuthMethod::Oidc)
        } else {
            Err(Error::NoAuthMethodConfigured(
                "set VAULT_TOKEN, VAULT_ROLE_ID and VAULT_SECRET_ID, or enable OIDC".to_string(),
            ))
        }
    }
}

/// Produces validated Vault session tokens
pub struct Authenticator {
    backend: Arc<dyn VaultApi>,
    store: Arc<TokenStore>,
    oidc: Arc<OidcOrchestrator>,
    settings: AuthSettings,
}

impl Authenticator {
    /// Create an authenticator
    #[must_use]
    pub fn new(
        backend: Arc<dyn VaultApi>,
        store: Arc<TokenStore>,
        oidc: Arc<OidcOrchestrator>,
        settings: AuthSettings,
    ) -> Self {
        Self {
            backend,
            store,
            oidc,
            settings,
        }
    }

    /// Token slot shared with this authenticator
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    /// Return a token accepted by the backend, logging in if necessary
    pub async fn authenticate(&self) -> Result<String> {
        if self.backend.base_url().is_empty() {
            return Err(Error::MissingBackendUrl);
        }

        if let Some(token) = self.store.get() {
            if TokenStore::validate(self.backend.as_ref(), &token).await? {
                info!("Using stored token for authentication");
                return Ok(token);
            }
            debug!("Stored token no longer valid");
        }

        let method = self.settings.select_method()?;
        info!(%method, "Authenticating with Vault");

        let token = match method {
            AuthMethod::Token => self.settings.token.clone().ok_or_else(|| {
                Error::NoAuthMethodConfigured("auth method 'token' selected but no token is set".to_string())
            })?,
            AuthMethod::AppRole => self.approle_login().await?,
            AuthMethod::Oidc => self.oidc.login().await?,
        };

        if !TokenStore::validate(self.backend.as_ref(), &token).await? {
            return Err(Error::AuthenticationFailed(format!(
                "token from '{method}' login was not accepted by Vault"
            )));
        }

        self.store.put(token.clone());
        info!(%method, "Vault authentication succeeded");
        Ok(token)
    }

    async fn approle_login(&self) -> Result<String> {
        let (Some(role_id), Some(secret_id)) = (&self.settings.role_id, &self.settings.secret_id)
        else {
            return Err(Error::NoAuthMethodConfigured(
                "auth method 'approle' selected but role ID or secret ID is missing".to_string(),
            ));
        };

        match self.backend.approle_login(role_id, secret_id).await {
            Ok(Some(token)) => Ok(token),
            Ok(None) => Err(Error::AuthenticationFailed(
                "approle login returned no client token".to_string(),
            )),
            Err(Error::BackendRejected { status, message }) => Err(Error::AuthenticationFailed(
                format!("approle login rejected: HTTP {status} - {message}"),
            )),
            Err(e) => Err(e),
        }
    }
}
