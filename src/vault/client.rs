//! Vault HTTP client

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use super::{SecretPayload, VaultApi};
use crate::config::VaultConfig;
use crate::{Error, Result};

const TOKEN_HEADER: &str = "X-Vault-Token";
const NAMESPACE_HEADER: &str = "X-Vault-Namespace";

/// Vault client speaking the HTTP API
pub struct VaultClient {
    /// HTTP client
    http_client: Client,
    /// Base URL without trailing slash
    base_url: String,
    /// Enterprise namespace
    namespace: Option<String>,
    /// Mount path of the OIDC auth method
    oidc_mount: String,
}

/// `{"data": {"auth_url": ...}}`
#[derive(Debug, Deserialize)]
struct AuthUrlResponse {
    #[serde(default)]
    data: Option<AuthUrlData>,
}

#[derive(Debug, Deserialize)]
struct AuthUrlData {
    #[serde(default)]
    auth_url: Option<String>,
}

/// `{"auth": {"client_token": ...}}`
#[derive(Debug, Deserialize)]
struct LoginResponse {
    #[serde(default)]
    auth: Option<LoginAuth>,
}

#[derive(Debug, Deserialize)]
struct LoginAuth {
    #[serde(default)]
    client_token: Option<String>,
}

/// `{"data": {"data": {...}, "metadata": {...}}}`
#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: KvData,
}

#[derive(Debug, Deserialize)]
struct KvData {
    data: SecretPayload,
}

impl VaultClient {
    /// Create a client for the configured Vault server
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &VaultConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(http_client, &config.url, config.namespace.clone()))
    }

    /// Create a client around an existing HTTP client
    #[must_use]
    pub fn with_client(http_client: Client, base_url: &str, namespace: Option<String>) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            namespace: namespace.filter(|n| !n.is_empty()),
            oidc_mount: "oidc".to_string(),
        }
    }

    /// Use a non-default mount path for the OIDC auth method
    #[must_use]
    pub fn with_oidc_mount(mut self, mount: &str) -> Self {
        self.oidc_mount = mount.trim_matches('/').to_string();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn prepare(&self, request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        let request = match &self.namespace {
            Some(ns) => request.header(NAMESPACE_HEADER, ns),
            None => request,
        };
        match token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request
            .send()
            .await
            .map_err(|e| Error::BackendUnavailable(e.to_string()))
    }

    /// Turn a non-success status into [`Error::BackendRejected`]
    async fn ensure_success(response: Response) -> Result<Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(Error::BackendRejected {
            status: status.as_u16(),
            message: vault_error_message(&body),
        })
    }

    async fn login_token(response: Response) -> Result<Option<String>> {
        let response = Self::ensure_success(response).await?;
        let login: LoginResponse = response
            .json()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("Failed to parse login response: {e}")))?;
        Ok(login
            .auth
            .and_then(|a| a.client_token)
            .filter(|t| !t.is_empty()))
    }
}

#[async_trait]
impl VaultApi for VaultClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn oidc_authorization_url(
        &self,
        role: &str,
        redirect_uri: &str,
    ) -> Result<Option<String>> {
        let url = self.endpoint(&format!("auth/{}/oidc/auth_url", self.oidc_mount));
        debug!(%url, role, "Requesting OIDC authorization URL");

        let request = self
            .http_client
            .post(&url)
            .json(&json!({ "role": role, "redirect_uri": redirect_uri }));
        let response = self.send(self.prepare(request, None)).await?;
        let response = Self::ensure_success(response).await?;

        let body: AuthUrlResponse = response.json().await.map_err(|e| {
            Error::BackendUnavailable(format!("Failed to parse auth_url response: {e}"))
        })?;
        Ok(body
            .data
            .and_then(|d| d.auth_url)
            .filter(|u| !u.is_empty()))
    }

    async fn oidc_callback(
        &self,
        code: &str,
        path: &str,
        nonce: &str,
        state: &str,
    ) -> Result<Option<String>> {
        let url = self.endpoint(&format!("auth/{path}/oidc/callback"));
        let request = self
            .http_client
            .get(&url)
            .query(&[("code", code), ("state", state), ("nonce", nonce)]);
        let response = self.send(self.prepare(request, None)).await?;
        Self::login_token(response).await
    }

    async fn approle_login(&self, role_id: &str, secret_id: &str) -> Result<Option<String>> {
        let url = self.endpoint("auth/approle/login");
        let request = self
            .http_client
            .post(&url)
            .json(&json!({ "role_id": role_id, "secret_id": secret_id }));
        let response = self.send(self.prepare(request, None)).await?;
        Self::login_token(response).await
    }

    async fn is_authenticated(&self, token: &str) -> Result<bool> {
        let url = self.endpoint("auth/token/lookup-self");
        let request = self.http_client.get(&url);
        let response = self.send(self.prepare(request, Some(token))).await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                debug!("Token rejected by lookup-self");
                Ok(false)
            }
            _ => {
                warn!(status = %response.status(), "Unexpected lookup-self status");
                Self::ensure_success(response).await.map(|_| false)
            }
        }
    }

    async fn read_secret(
        &self,
        token: &str,
        path: &str,
        mount_point: &str,
    ) -> Result<SecretPayload> {
        let url = self.endpoint(&format!(
            "{}/data/{}",
            mount_point.trim_matches('/'),
            path.trim_matches('/')
        ));
        let request = self.http_client.get(&url);
        let response = self.send(self.prepare(request, Some(token))).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(Error::SecretNotFound(path.to_string()));
        }
        let response = Self::ensure_success(response).await?;
        let body: KvReadResponse = response
            .json()
            .await
            .map_err(|e| Error::BackendUnavailable(format!("Failed to parse secret response: {e}")))?;
        Ok(body.data.data)
    }
}

/// Vault errors arrive as `{"errors": ["..."]}`; fall back to the raw body
fn vault_error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        errors: Vec<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.errors.is_empty() => parsed.errors.join("; "),
        _ => body.to_string(),
    }
}
