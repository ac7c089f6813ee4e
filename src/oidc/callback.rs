//! OIDC Callback Listener
//!
//! A short-lived HTTP listener that receives the authorization code after
//! the user has logged in through the browser.
//!
//! The socket is bound by [`CallbackListener::bind`], before the browser is
//! pointed at the identity provider, so a redirect can never race the bind.
//! [`CallbackListener::wait`] serves until the first request on
//! [`CALLBACK_PATH`] has been answered, then shuts the server down and joins
//! it. The port is free again when `wait` returns, on every path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{Error, Result};

/// Path the identity provider redirects to
pub const CALLBACK_PATH: &str = "/oidc/callback";

/// Upper bound on draining the browser connection after the callback
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

const SELF_CLOSING_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Authentication Successful</title>
    <script>
        window.onload = function load() {
            window.open("", "_self", "");
            window.close();
        };
    </script>
</head>
<body>
    <p>Authentication successful, you can close the browser now.</p>
    <script>setTimeout(function() { window.close() }, 5000);</script>
</body>
</html>"#;

const ALREADY_HANDLED_PAGE: &str = r"<!DOCTYPE html>
<html>
<body>
    <p>This login has already been completed. You can close this window.</p>
</body>
</html>";

/// OIDC callback query parameters
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,

    /// State parameter (for CSRF protection)
    pub state: Option<String>,

    /// Error code
    pub error: Option<String>,

    /// Error description
    pub error_description: Option<String>,
}

/// Accepted redirect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackResult {
    /// Authorization code
    pub code: String,

    /// State echoed by the identity provider, if any
    pub state: Option<String>,
}

/// State shared with the callback handler
struct CallbackState {
    expected_state: Option<String>,
    tx: Option<oneshot::Sender<Result<CallbackResult>>>,
}

/// Bound, not yet serving, callback listener
pub struct CallbackListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    expected_state: Option<String>,
}

/// Aborts the server task if `wait` is dropped mid-flight
struct ServerTask(JoinHandle<std::io::Result<()>>);

impl Drop for ServerTask {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl CallbackListener {
    /// Bind the callback port. Port 0 picks an ephemeral port.
    pub async fn bind(host: &str, port: u16) -> Result<Self> {
        let listener = TcpListener::bind((host, port))
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind callback listener on {host}:{port}: {e}")))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::Internal(format!("Failed to get callback listener address: {e}")))?;

        info!(addr = %local_addr, "OIDC callback listener bound");
        Ok(Self {
            listener,
            local_addr,
            expected_state: None,
        })
    }

    /// Reject redirects whose `state` differs from `state`
    #[must_use]
    pub fn expect_state(mut self, state: impl Into<String>) -> Self {
        self.expected_state = Some(state.into());
        self
    }

    /// Address the listener is bound to
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serve until one redirect has been handled or `timeout` elapses
    pub async fn wait(self, timeout: Duration) -> Result<CallbackResult> {
        let (tx, rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(Mutex::new(CallbackState {
            expected_state: self.expected_state,
            tx: Some(tx),
        }));

        let app = Router::new()
            .route(CALLBACK_PATH, get(handle_callback))
            .with_state(state);

        let listener = self.listener;
        let mut server = ServerTask(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        }));

        let outcome = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::CallbackNotReceived(
                "callback listener stopped before a redirect arrived".to_string(),
            )),
            Err(_) => Err(Error::CallbackTimeout(timeout)),
        };

        // Let the handler's response reach the browser, then release the port
        let _ = shutdown_tx.send(());
        match tokio::time::timeout(SHUTDOWN_GRACE, &mut server.0).await {
            Ok(Ok(Ok(()))) => debug!("Callback listener stopped"),
            Ok(Ok(Err(e))) => warn!(error = %e, "Callback listener failed"),
            Ok(Err(e)) => warn!(error = %e, "Callback listener task failed"),
            Err(_) => {
                warn!("Callback listener did not drain in time, aborting");
                server.0.abort();
                let _ = (&mut server.0).await;
            }
        }

        outcome
    }
}

/// Handle the OIDC redirect
async fn handle_callback(
    State(state): State<Arc<Mutex<CallbackState>>>,
    Query(params): Query<CallbackParams>,
) -> impl IntoResponse {
    debug!(
        has_code = params.code.is_some(),
        has_state = params.state.is_some(),
        error = ?params.error,
        "Received OIDC callback"
    );

    let mut state = state.lock().await;
    let Some(tx) = state.tx.take() else {
        return (StatusCode::OK, Html(ALREADY_HANDLED_PAGE.to_string()));
    };

    let (result, response) = evaluate(&params, state.expected_state.as_deref());
    let _ = tx.send(result);
    response
}

fn evaluate(
    params: &CallbackParams,
    expected_state: Option<&str>,
) -> (Result<CallbackResult>, (StatusCode, Html<String>)) {
    if let Some(error) = &params.error {
        let description = params
            .error_description
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string());
        let page = error_page(error, &description);
        return (
            Err(Error::AuthorizationDenied(format!("{error} - {description}"))),
            (StatusCode::BAD_REQUEST, Html(page)),
        );
    }

    let Some(code) = params.code.clone().filter(|c| !c.is_empty()) else {
        return (
            Err(Error::MissingAuthorizationCode),
            (
                StatusCode::BAD_REQUEST,
                Html(error_page("missing_code", "Authorization code not provided")),
            ),
        );
    };

    if let (Some(expected), Some(received)) = (expected_state, params.state.as_deref()) {
        if expected != received {
            return (
                Err(Error::StateMismatch),
                (
                    StatusCode::BAD_REQUEST,
                    Html(error_page("state_mismatch", "Invalid state parameter")),
                ),
            );
        }
    }

    (
        Ok(CallbackResult {
            code,
            state: params.state.clone(),
        }),
        (StatusCode::OK, Html(SELF_CLOSING_PAGE.to_string())),
    )
}

fn error_page(error: &str, description: &str) -> String {
    let error = html_escape(error);
    let description = html_escape(description);
    format!(
        r"<!DOCTYPE html>
<html>
<head><title>Authentication Failed</title></head>
<body>
    <h1>Authentication Failed</h1>
    <p>{description}</p>
    <p>Error: <code>{error}</code></p>
</body>
</html>"
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
