//! Error types for the Vault broker

use std::io;

use axum::http::StatusCode;
use thiserror::Error;

/// Result type alias for the Vault broker
pub type Result<T> = std::result::Result<T, Error>;

/// Vault broker errors
#[derive(Error, Debug)]
pub enum Error {
    /// Authorization URL lacks a query, `nonce` or `state`
    #[error("Malformed authorization URL: {0}")]
    MalformedAuthorizationUrl(String),

    /// The callback listener stopped before a redirect arrived
    #[error("OIDC callback not received: {0}")]
    CallbackNotReceived(String),

    /// The callback wait exceeded the configured timeout
    #[error("OIDC callback not received within {0:?}")]
    CallbackTimeout(std::time::Duration),

    /// The redirect arrived without a `code` parameter
    #[error("Missing authorization code in OIDC callback")]
    MissingAuthorizationCode,

    /// The identity provider reported an error on the redirect
    #[error("Authorization denied: {0}")]
    AuthorizationDenied(String),

    /// The redirect's `state` does not match the authorization request
    #[error("State mismatch in OIDC callback")]
    StateMismatch,

    /// The backend did not hand out an authorization URL
    #[error("Authorization URL unavailable: {0}")]
    AuthorizationUrlUnavailable(String),

    /// The code-for-token exchange failed
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// No authentication method applies to the configuration
    #[error("No valid authentication method found: {0}")]
    NoAuthMethodConfigured(String),

    /// The resulting session did not validate against the backend
    #[error("Vault authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The backend client has no base URL
    #[error("Vault URL not defined for vault client")]
    MissingBackendUrl,

    /// A key is absent from an otherwise valid secret payload
    #[error("Key {key} not found in path {path}")]
    SecretKeyNotFound {
        /// Secret path
        path: String,
        /// Requested key
        key: String,
    },

    /// The backend has no secret at the path
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    /// Network or transport failure talking to the backend
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend answered with a non-success status
    #[error("Backend rejected request: HTTP {status} - {message}")]
    BackendRejected {
        /// HTTP status code
        status: u16,
        /// Response body or error list
        message: String,
    },

    /// Browser could not be launched
    #[error("Browser error: {0}")]
    Browser(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed API request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable snake_case identifier reported to API callers
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedAuthorizationUrl(_) => "malformed_authorization_url",
            Self::CallbackNotReceived(_) => "callback_not_received",
            Self::CallbackTimeout(_) => "callback_timeout",
            Self::MissingAuthorizationCode => "missing_authorization_code",
            Self::AuthorizationDenied(_) => "authorization_denied",
            Self::StateMismatch => "state_mismatch",
            Self::AuthorizationUrlUnavailable(_) => "authorization_url_unavailable",
            Self::TokenExchangeFailed(_) => "token_exchange_failed",
            Self::NoAuthMethodConfigured(_) => "no_auth_method_configured",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::MissingBackendUrl => "missing_backend_url",
            Self::SecretKeyNotFound { .. } => "secret_key_not_found",
            Self::SecretNotFound(_) => "secret_not_found",
            Self::BackendUnavailable(_) | Self::Http(_) => "backend_unavailable",
            Self::BackendRejected { .. } => "backend_rejected",
            Self::Browser(_) => "browser",
            Self::Config(_) => "config",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Io(_) | Self::Json(_) | Self::Internal(_) => "internal",
        }
    }

    /// HTTP status used when the error crosses the API boundary
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingBackendUrl
            | Self::NoAuthMethodConfigured(_)
            | Self::InvalidRequest(_)
            | Self::Config(_) => StatusCode::BAD_REQUEST,
            Self::AuthenticationFailed(_)
            | Self::TokenExchangeFailed(_)
            | Self::AuthorizationDenied(_)
            | Self::StateMismatch
            | Self::MissingAuthorizationCode => StatusCode::UNAUTHORIZED,
            Self::SecretKeyNotFound { .. } | Self::SecretNotFound(_) => StatusCode::NOT_FOUND,
            Self::BackendUnavailable(_)
            | Self::Http(_)
            | Self::BackendRejected { .. }
            | Self::AuthorizationUrlUnavailable(_) => StatusCode::BAD_GATEWAY,
            Self::CallbackTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
