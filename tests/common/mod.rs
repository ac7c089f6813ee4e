//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use vault_broker::auth::{AuthSettings, Authenticator, TokenStore};
use vault_broker::cache::SecretCache;
use vault_broker::config::CacheConfig;
use vault_broker::oidc::{BrowserDriver, BrowserSession, OidcOrchestrator, OidcSettings};
use vault_broker::vault::{SecretPayload, VaultApi};
use vault_broker::{Error, Result};

/// Token handed out by the mock's OIDC code exchange
pub const OIDC_TOKEN: &str = "tok-1";
/// Token handed out by the mock's `AppRole` login
pub const APPROLE_TOKEN: &str = "approle-token";
/// Static token accepted by the mock
pub const STATIC_TOKEN: &str = "hvs.static";

/// Arguments of one code exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub code: String,
    pub path: String,
    pub nonce: String,
    pub state: String,
}

/// In-memory Vault with call counters
pub struct MockVault {
    pub base_url: String,
    pub auth_url: Option<String>,
    pub exchange_token: Option<String>,
    pub read_delay: Duration,
    secrets: HashMap<String, SecretPayload>,
    valid_tokens: Mutex<HashSet<String>>,
    pub exchanges: Mutex<Vec<Exchange>>,
    pub redirect_uris: Mutex<Vec<String>>,
    pub auth_url_calls: AtomicUsize,
    pub callback_calls: AtomicUsize,
    pub approle_calls: AtomicUsize,
    pub lookup_calls: AtomicUsize,
    pub read_calls: AtomicUsize,
}

impl Default for MockVault {
    fn default() -> Self {
        Self {
            base_url: "http://vault.test:8200".to_string(),
            auth_url: Some("https://idp.example/auth?nonce=abc&state=xyz".to_string()),
            exchange_token: Some(OIDC_TOKEN.to_string()),
            read_delay: Duration::ZERO,
            secrets: HashMap::new(),
            valid_tokens: Mutex::new(HashSet::from([STATIC_TOKEN.to_string()])),
            exchanges: Mutex::new(Vec::new()),
            redirect_uris: Mutex::new(Vec::new()),
            auth_url_calls: AtomicUsize::new(0),
            callback_calls: AtomicUsize::new(0),
            approle_calls: AtomicUsize::new(0),
            lookup_calls: AtomicUsize::new(0),
            read_calls: AtomicUsize::new(0),
        }
    }
}

impl MockVault {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, path: &str, payload: Value) -> Self {
        let Value::Object(map) = payload else {
            panic!("secret payload must be an object");
        };
        self.secrets.insert(path.to_string(), map);
        self
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn with_auth_url(mut self, auth_url: Option<&str>) -> Self {
        self.auth_url = auth_url.map(str::to_string);
        self
    }

    pub fn with_exchange_token(mut self, token: Option<&str>) -> Self {
        self.exchange_token = token.map(str::to_string);
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.to_string();
        self
    }

    pub fn revoke(&self, token: &str) {
        self.valid_tokens.lock().remove(token);
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VaultApi for MockVault {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn oidc_authorization_url(
        &self,
        _role: &str,
        redirect_uri: &str,
    ) -> Result<Option<String>> {
        self.auth_url_calls.fetch_add(1, Ordering::SeqCst);
        self.redirect_uris.lock().push(redirect_uri.to_string());
        Ok(self.auth_url.clone())
    }

    async fn oidc_callback(
        &self,
        code: &str,
        path: &str,
        nonce: &str,
        state: &str,
    ) -> Result<Option<String>> {
        self.callback_calls.fetch_add(1, Ordering::SeqCst);
        self.exchanges.lock().push(Exchange {
            code: code.to_string(),
            path: path.to_string(),
            nonce: nonce.to_string(),
            state: state.to_string(),
        });
        if let Some(token) = &self.exchange_token {
            self.valid_tokens.lock().insert(token.clone());
        }
        Ok(self.exchange_token.clone())
    }

    async fn approle_login(&self, role_id: &str, secret_id: &str) -> Result<Option<String>> {
        self.approle_calls.fetch_add(1, Ordering::SeqCst);
        if role_id == "role" && secret_id == "secret" {
            self.valid_tokens.lock().insert(APPROLE_TOKEN.to_string());
            Ok(Some(APPROLE_TOKEN.to_string()))
        } else {
            Err(Error::BackendRejected {
                status: 400,
                message: "invalid role or secret ID".to_string(),
            })
        }
    }

    async fn is_authenticated(&self, token: &str) -> Result<bool> {
        self.lookup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.valid_tokens.lock().contains(token))
    }

    async fn read_secret(
        &self,
        token: &str,
        path: &str,
        _mount_point: &str,
    ) -> Result<SecretPayload> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        if !self.valid_tokens.lock().contains(token) {
            return Err(Error::BackendRejected {
                status: 403,
                message: "permission denied".to_string(),
            });
        }
        self.secrets
            .get(path)
            .cloned()
            .ok_or_else(|| Error::SecretNotFound(path.to_string()))
    }
}

/// Browser that never reaches the callback
pub struct IdleBrowser;

#[async_trait]
impl BrowserDriver for IdleBrowser {
    async fn navigate(&self, _url: &str) -> Result<BrowserSession> {
        Ok(BrowserSession::detached())
    }
}

/// Browser whose identity provider immediately redirects back with `code`
pub struct RedirectingBrowser {
    pub callback_url: String,
    pub code: String,
    pub visited: Arc<Mutex<Vec<String>>>,
}

impl RedirectingBrowser {
    pub fn new(settings: &OidcSettings, code: &str) -> Self {
        Self {
            callback_url: settings.redirect_uri(),
            code: code.to_string(),
            visited: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl BrowserDriver for RedirectingBrowser {
    async fn navigate(&self, url: &str) -> Result<BrowserSession> {
        self.visited.lock().push(url.to_string());

        let state = url::Url::parse(url)
            .ok()
            .and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "state")
                    .map(|(_, v)| v.into_owned())
            })
            .unwrap_or_default();
        let target = format!("{}?code={}&state={state}", self.callback_url, self.code);

        // Must not block: the listener only serves once navigation returns
        tokio::spawn(async move {
            let client = reqwest::Client::builder().no_proxy().build().unwrap();
            let _ = client.get(&target).send().await;
        });
        Ok(BrowserSession::detached())
    }
}

/// A port that was free a moment ago
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// OIDC settings for a loopback callback
pub fn oidc_settings(callback_timeout: Duration) -> OidcSettings {
    OidcSettings {
        role: "default".to_string(),
        mount: "oidc".to_string(),
        callback_host: "127.0.0.1".to_string(),
        callback_port: free_port(),
        callback_timeout,
    }
}

/// Authenticator over `vault` with the given credentials
pub fn authenticator(
    vault: &Arc<MockVault>,
    settings: AuthSettings,
    browser: Box<dyn BrowserDriver>,
    oidc: OidcSettings,
) -> Arc<Authenticator> {
    let backend: Arc<dyn VaultApi> = Arc::clone(vault) as Arc<dyn VaultApi>;
    let orchestrator = Arc::new(OidcOrchestrator::new(Arc::clone(&backend), browser, oidc));
    Arc::new(Authenticator::new(
        backend,
        Arc::new(TokenStore::new()),
        orchestrator,
        settings,
    ))
}

/// Credentials for `AppRole` login against the mock
pub fn approle_settings() -> AuthSettings {
    AuthSettings {
        role_id: Some("role".to_string()),
        secret_id: Some("secret".to_string()),
        ..AuthSettings::default()
    }
}

/// Cache over `vault` that logs in with `AppRole`
pub fn cache(vault: &Arc<MockVault>, ttl: Duration, max_entries: usize) -> Arc<SecretCache> {
    let auth = authenticator(
        vault,
        approle_settings(),
        Box::new(IdleBrowser),
        oidc_settings(Duration::from_millis(100)),
    );
    let config = CacheConfig { ttl, max_entries };
    Arc::new(SecretCache::new(
        &config,
        "secret",
        auth,
        Arc::clone(vault) as Arc<dyn VaultApi>,
    ))
}
