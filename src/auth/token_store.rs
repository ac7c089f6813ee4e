//! Last validated session token
//!
//! A single slot, last write wins. The slot itself is thread-safe, but
//! check-then-login sequences are not atomic; the
//! [`SecretCache`](crate::cache::SecretCache) guard serializes those.

use parking_lot::RwLock;

use crate::Result;
use crate::vault::VaultApi;

/// Process-wide token slot
#[derive(Debug, Default)]
pub struct TokenStore {
    token: RwLock<Option<String>>,
}

impl TokenStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored token, if any
    pub fn get(&self) -> Option<String> {
        self.token.read().clone()
    }

    /// Replace the stored token
    pub fn put(&self, token: impl Into<String>) {
        *self.token.write() = Some(token.into());
    }

    /// Forget the stored token
    pub fn clear(&self) {
        *self.token.write() = None;
    }

    /// Ask the backend whether `token` is still accepted
    pub async fn validate(backend: &dyn VaultApi, token: &str) -> Result<bool> {
        backend.is_authenticated(token).await
    }
}
