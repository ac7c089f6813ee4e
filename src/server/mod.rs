//! Broker HTTP server

mod router;

pub use router::{ApiError, AppState, FetchSecretRequest, create_router};

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::auth::{Authenticator, TokenStore};
use crate::cache::SecretCache;
use crate::config::{Config, ServerConfig};
use crate::oidc::{OidcOrchestrator, OidcSettings, driver_for};
use crate::vault::{VaultApi, VaultClient};
use crate::{Error, Result};

/// Lower bound for the cache maintenance interval
const MIN_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Vault broker server
pub struct BrokerServer {
    /// Listen address
    config: ServerConfig,
    /// Secret cache shared by all handlers
    cache: Arc<SecretCache>,
}

impl BrokerServer {
    /// Create a new server
    #[must_use]
    pub fn new(config: ServerConfig, cache: Arc<SecretCache>) -> Self {
        Self { config, cache }
    }

    /// Wire the Vault client, authenticator and cache from configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the Vault HTTP client cannot be built.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend: Arc<dyn VaultApi> = Arc::new(
            VaultClient::new(&config.vault)?.with_oidc_mount(&config.oidc.mount),
        );
        let oidc = Arc::new(OidcOrchestrator::new(
            Arc::clone(&backend),
            driver_for(&config.oidc),
            OidcSettings::from_config(config),
        ));
        let authenticator = Arc::new(Authenticator::new(
            Arc::clone(&backend),
            Arc::new(TokenStore::new()),
            oidc,
            config.auth_settings(),
        ));
        let cache = Arc::new(SecretCache::new(
            &config.cache,
            config.vault.mount_point.clone(),
            authenticator,
            backend,
        ));

        info!(
            vault = %config.vault.url,
            mount = %config.vault.mount_point,
            oidc_headless = config.oidc.headless,
            "Vault backend configured"
        );
        Ok(Self::new(config.server.clone(), cache))
    }

    /// Secret cache served by this server
    pub fn cache(&self) -> &Arc<SecretCache> {
        &self.cache
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| {
                Error::Config(format!(
                    "Cannot bind {}:{}: {e}",
                    self.config.host, self.config.port
                ))
            })?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(AppState {
            cache: Arc::clone(&self.cache),
            shutdown_tx: shutdown_tx.clone(),
        });
        let app = create_router(state);

        let addr = listener.local_addr()?;
        info!("============================================================");
        info!("VAULT BROKER v{}", env!("CARGO_PKG_VERSION"));
        info!("============================================================");
        info!(%addr, "Listening");
        info!("  POST /authenticate");
        info!("  POST /fetch-secret");
        info!("  POST /shutdown");
        info!("  GET  /health");
        info!(ttl = ?self.cache.ttl(), "Secret cache ready");
        info!("============================================================");

        // Lookups only drop the entry they touch
        let cache = Arc::clone(&self.cache);
        let period = self.cache.ttl().max(MIN_MAINTENANCE_INTERVAL);
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = cache.evict_expired();
                        if evicted > 0 {
                            debug!(evicted, "Evicted expired secrets");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        let requested = shutdown_tx.subscribe();
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx, requested))
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Broker stopped");
        Ok(())
    }
}

/// Resolves on Ctrl-C, SIGTERM or `POST /shutdown`, then notifies all tasks
async fn shutdown_signal(
    shutdown_tx: broadcast::Sender<()>,
    mut requested: broadcast::Receiver<()>,
) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Shutdown signal received"),
        () = terminate => info!("Shutdown signal received"),
        _ = requested.recv() => info!("Shutdown requested"),
    }

    let _ = shutdown_tx.send(());
}
