//! HTTP router and handlers

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::Error;
use crate::cache::SecretCache;

/// Shared application state
pub struct AppState {
    /// Secret cache; also owns the authenticate guard
    pub cache: Arc<SecretCache>,
    /// Fired by `POST /shutdown`
    pub shutdown_tx: broadcast::Sender<()>,
}

/// Body of `POST /fetch-secret`
#[derive(Debug, Deserialize)]
pub struct FetchSecretRequest {
    /// Secret path under the mount point
    #[serde(default)]
    pub path: Option<String>,
    /// Single key to return instead of the whole payload
    #[serde(default)]
    pub key: Option<String>,
}

/// Error crossing the API boundary, rendered as `{"error", "kind"}`
#[derive(Debug)]
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        if status.is_server_error() {
            warn!(error = %self.0, kind = self.0.kind(), "Request failed");
        }
        (
            status,
            Json(json!({
                "error": self.0.to_string(),
                "kind": self.0.kind(),
            })),
        )
            .into_response()
    }
}

/// Create the router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/authenticate", post(authenticate_handler))
        .route("/fetch-secret", post(fetch_secret_handler))
        .route("/shutdown", post(shutdown_handler))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "cache": state.cache.stats(),
    }))
}

/// POST /authenticate
async fn authenticate_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let token = state.cache.authenticate().await?;
    Ok(Json(json!({ "token": token })))
}

/// POST /fetch-secret
async fn fetch_secret_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<FetchSecretRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|e| Error::InvalidRequest(e.body_text()))?;
    let path = request
        .path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::InvalidRequest("'path' is required".to_string()))?;

    let secret = state
        .cache
        .fetch_secret(&path, request.key.as_deref())
        .await?;
    Ok(Json(json!({ "secret": secret })))
}

/// POST /shutdown
async fn shutdown_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("Shutdown requested over HTTP");
    // No receiver only means shutdown is already under way
    let _ = state.shutdown_tx.send(());
    (
        StatusCode::OK,
        Json(json!({ "message": "Server shutting down..." })),
    )
}
