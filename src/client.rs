//! Client for a running broker
//!
//! Used by the `stop`, `authenticate` and `fetch-secret` subcommands.

use std::time::Duration;

use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::{Error, Result};

/// Connect timeout; requests themselves may wait on an interactive login
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure body returned by the broker
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    token: String,
}

#[derive(Debug, Deserialize)]
struct SecretBody {
    secret: Value,
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    message: String,
}

/// HTTP client for the broker API
#[derive(Debug, Clone)]
pub struct BrokerClient {
    http_client: Client,
    base_url: String,
}

impl BrokerClient {
    /// Create a client for the broker at `base_url`
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        // The broker is local; never route through a proxy
        let http_client = Client::builder()
            .no_proxy()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Broker base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `POST /authenticate`
    pub async fn authenticate(&self) -> Result<String> {
        let body: TokenBody = self.post("/authenticate", None).await?;
        Ok(body.token)
    }

    /// `POST /fetch-secret`
    pub async fn fetch_secret(&self, path: &str, key: Option<&str>) -> Result<Value> {
        let request = json!({ "path": path, "key": key });
        let body: SecretBody = self.post("/fetch-secret", Some(request)).await?;
        Ok(body.secret)
    }

    /// `POST /shutdown`
    pub async fn shutdown(&self) -> Result<String> {
        let body: MessageBody = self.post("/shutdown", None).await?;
        Ok(body.message)
    }

    async fn post<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let url = format!("{}{endpoint}", self.base_url);
        debug!(%url, "Calling broker");

        let mut request = self.http_client.post(&url);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await.map_err(|e| {
            Error::BackendUnavailable(format!("Broker at {} unreachable: {e}", self.base_url))
        })?;
        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        let bytes = response.bytes().await?;

        if status.is_success() {
            return Ok(serde_json::from_slice(&bytes)?);
        }

        let message = match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(ErrorBody {
                error,
                kind: Some(kind),
            }) => format!("{error} ({kind})"),
            Ok(ErrorBody { error, kind: None }) => error,
            Err(_) => String::from_utf8_lossy(&bytes).into_owned(),
        };
        Err(Error::BackendRejected {
            status: status.as_u16(),
            message,
        })
    }
}
