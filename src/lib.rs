//! Vault Broker Library
//!
//! Local broker between applications and a HashiCorp Vault server.
//!
//! # Features
//!
//! - **Authentication**: static token, `AppRole`, or browser-based OIDC with a
//!   one-shot local callback listener (interactive or headless browser)
//! - **Token reuse**: the last validated token is kept and revalidated before
//!   any new login
//! - **Secret cache**: TTL + LRU cache of KV v2 payloads; a single guard
//!   serializes authenticate-then-fetch so concurrent misses log in once
//! - **HTTP API**: `/authenticate`, `/fetch-secret`, `/shutdown`, `/health`

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod oidc;
pub mod server;
pub mod vault;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };

    installed.map_err(|e| Error::Internal(format!("Failed to install tracing subscriber: {e}")))
}
