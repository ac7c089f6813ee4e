//! Configuration management

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Deserializer, Serialize};

use crate::auth::AuthSettings;
use crate::{Error, Result};

/// Flat environment variables accepted alongside `VAULT_BROKER_*`
const ENV_ALIASES: &[(&str, &str)] = &[
    ("VAULT_URL", "vault.url"),
    ("VAULT_MOUNT_POINT", "vault.mount_point"),
    ("VAULT_NAMESPACE", "vault.namespace"),
    ("VAULT_OIDC_HEADLESS", "oidc.headless"),
    ("VAULT_OIDC_AUTH", "oidc.enabled"),
    ("VAULT_OIDC_CALLBACK_PORT", "oidc.callback_port"),
    ("VAULT_ROLE_ID", "auth.role_id"),
    ("VAULT_SECRET_ID", "auth.secret_id"),
    ("VAULT_TOKEN", "auth.token"),
    ("VAULT_AUTH_METHOD", "auth.method"),
    ("VAULT_SERVER_HOST", "server.host"),
    ("VAULT_SERVER_PORT", "server.port"),
    ("NETWORK_NEGOTIATE_AUTH_TRUSTED_URIS", "oidc.trusted_uris"),
    ("NETWORK_NEGOTIATE_AUTH_DELEGATION_URIS", "oidc.delegation_uris"),
];

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before the environment is read.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Local HTTP API
    pub server: ServerConfig,
    /// Vault backend connection
    pub vault: VaultConfig,
    /// Static credentials and method override
    pub auth: AuthConfig,
    /// OIDC browser login
    pub oidc: OidcConfig,
    /// Secret cache
    pub cache: CacheConfig,
}

/// Local HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to; also used in the OIDC redirect URI
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8001,
        }
    }
}

impl ServerConfig {
    /// Base URL of the local API
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Vault backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Vault base URL
    pub url: String,
    /// KV v2 mount point for secrets
    pub mount_point: String,
    /// Enterprise namespace (`X-Vault-Namespace`)
    #[serde(deserialize_with = "lenient_string")]
    pub namespace: Option<String>,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8200".to_string(),
            mount_point: "secret".to_string(),
            namespace: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Static credential configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Explicit method override (`token`, `approle`, `oidc`)
    pub method: Option<String>,
    /// Static Vault token
    #[serde(deserialize_with = "lenient_string")]
    pub token: Option<String>,
    /// `AppRole` role ID
    #[serde(deserialize_with = "lenient_string")]
    pub role_id: Option<String>,
    /// `AppRole` secret ID
    #[serde(deserialize_with = "lenient_string")]
    pub secret_id: Option<String>,
}

/// OIDC login configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Allow OIDC as a fallback method
    #[serde(deserialize_with = "lenient_bool")]
    pub enabled: bool,
    /// Drive a headless browser instead of the user's default browser
    #[serde(deserialize_with = "lenient_bool")]
    pub headless: bool,
    /// Vault OIDC role
    pub role: String,
    /// Mount path of the OIDC auth method
    pub mount: String,
    /// Local port for the redirect listener
    pub callback_port: u16,
    /// How long to wait for the browser redirect
    #[serde(with = "humantime_serde")]
    pub callback_timeout: Duration,
    /// Browser executable for headless mode
    pub browser_command: String,
    /// `network.negotiate-auth.trusted-uris` for headless mode
    #[serde(deserialize_with = "string_or_list")]
    pub trusted_uris: Vec<String>,
    /// `network.negotiate-auth.delegation-uris` for headless mode
    #[serde(deserialize_with = "string_or_list")]
    pub delegation_uris: Vec<String>,
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            headless: false,
            role: "default".to_string(),
            mount: "oidc".to_string(),
            callback_port: 8250,
            callback_timeout: Duration::from_secs(300),
            browser_command: "firefox".to_string(),
            trusted_uris: Vec::new(),
            delegation_uris: Vec::new(),
        }
    }
}

/// Secret cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time-to-live of a cached secret
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Maximum number of cached paths before LRU eviction
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 100,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
        }

        // A missing .env is normal
        if let Ok(dotenv) = dotenvy::dotenv() {
            tracing::debug!(path = %dotenv.display(), "Loaded .env");
        }

        let config = Self::extract(path)?;
        if config.env_files.is_empty() {
            return Ok(config);
        }

        // Env files may feed the variables above, so extract again
        if config.load_env_files() == 0 {
            return Ok(config);
        }
        Self::extract(path)
    }

    fn extract(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment
            .merge(Env::prefixed("VAULT_BROKER_").split("__"))
            .merge(Env::raw().filter_map(|key| {
                ENV_ALIASES
                    .iter()
                    .find(|(var, _)| key.as_str().eq_ignore_ascii_case(var))
                    .map(|(_, target)| (*target).into())
            }));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are skipped. Returns the number loaded.
    fn load_env_files(&self) -> usize {
        let mut loaded = 0;
        for path_str in &self.env_files {
            let expanded = expand_home(path_str);
            let path = Path::new(&expanded);
            if !path.exists() {
                continue;
            }
            match dotenvy::from_path(path) {
                Ok(()) => {
                    tracing::info!("Loaded env file: {expanded}");
                    loaded += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to load env file {expanded}: {e}");
                }
            }
        }
        loaded
    }

    /// Authentication inputs for the [`Authenticator`](crate::auth::Authenticator)
    #[must_use]
    pub fn auth_settings(&self) -> AuthSettings {
        AuthSettings {
            method_override: self.auth.method.clone().filter(|m| !m.is_empty()),
            token: self.auth.token.clone().filter(|t| !t.is_empty()),
            role_id: self.auth.role_id.clone().filter(|r| !r.is_empty()),
            secret_id: self.auth.secret_id.clone().filter(|s| !s.is_empty()),
            oidc_enabled: self.oidc.enabled,
            oidc_headless: self.oidc.headless,
        }
    }
}

fn expand_home(path: &str) -> String {
    if path.starts_with('~') {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.display().to_string(), 1);
        }
    }
    path.to_string()
}

/// Accept either a list or a comma-separated string
fn string_or_list<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        String(String),
        List(Vec<String>),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::String(s) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        StringOrList::List(list) => list,
    })
}

/// Accept a string, or a scalar that environment parsing turned into one
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        String(String),
        Unsigned(u64),
        Signed(i64),
        Float(f64),
        Bool(bool),
    }

    Ok(Option::<Scalar>::deserialize(deserializer)?.map(|value| match value {
        Scalar::String(s) => s,
        Scalar::Unsigned(n) => n.to_string(),
        Scalar::Signed(n) => n.to_string(),
        Scalar::Float(n) => n.to_string(),
        Scalar::Bool(b) => b.to_string(),
    }))
}

/// Accept a boolean, or any value where only a case-insensitive "true" is true
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        String(String),
        Other(serde::de::IgnoredAny),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::String(s) => s.trim().eq_ignore_ascii_case("true"),
        Flag::Other(_) => false,
    })
}
