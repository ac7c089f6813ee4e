//! Vault backend abstraction
//!
//! Everything the broker needs from Vault goes through the [`VaultApi`]
//! trait: OIDC authorization URLs and callback exchange, `AppRole` login,
//! token self-lookup and KV v2 reads. [`VaultClient`] implements it over
//! Vault's HTTP API; tests substitute in-memory implementations.
//!
//! Tokens are passed per call rather than stored on the client, so one
//! client can be shared by every task without interior mutability.

mod client;

pub use client::VaultClient;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::Result;

/// Decrypted key/value payload of a KV secret
pub type SecretPayload = Map<String, Value>;

/// Operations consumed from the secret-management backend
#[async_trait]
pub trait VaultApi: Send + Sync {
    /// Base URL of the backend; empty when unconfigured
    fn base_url(&self) -> &str;

    /// Request an OIDC authorization URL.
    ///
    /// Returns `None` when the backend answered without one.
    async fn oidc_authorization_url(&self, role: &str, redirect_uri: &str)
    -> Result<Option<String>>;

    /// Exchange an authorization code for a client token.
    ///
    /// Returns `None` when the response lacks `auth.client_token`.
    async fn oidc_callback(
        &self,
        code: &str,
        path: &str,
        nonce: &str,
        state: &str,
    ) -> Result<Option<String>>;

    /// Log in with an `AppRole` role ID and secret ID
    async fn approle_login(&self, role_id: &str, secret_id: &str) -> Result<Option<String>>;

    /// Whether `token` is currently accepted by the backend
    async fn is_authenticated(&self, token: &str) -> Result<bool>;

    /// Read the latest version of a KV v2 secret
    async fn read_secret(&self, token: &str, path: &str, mount_point: &str)
    -> Result<SecretPayload>;
}
