//! Vault Broker - local authentication and secret cache for HashiCorp Vault

use std::process::ExitCode;

use clap::Parser;
use serde_json::Value;
use tracing::{error, info};

use vault_broker::{
    cli::{Cli, Command},
    client::BrokerClient,
    config::Config,
    server::BrokerServer,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    // Load configuration
    let config = match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            // Apply CLI overrides
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Serve) | None => run_server(&config).await,
        Some(Command::Stop) => {
            with_client(&config, |client| async move { client.shutdown().await }).await
        }
        Some(Command::Authenticate) => {
            with_client(&config, |client| async move { client.authenticate().await }).await
        }
        Some(Command::FetchSecret { path, key }) => {
            with_client(&config, |client| async move {
                client
                    .fetch_secret(&path, key.as_deref())
                    .await
                    .map(|secret| render_secret(&secret))
            })
            .await
        }
    }
}

/// Run the broker server
async fn run_server(config: &Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        "Starting Vault broker"
    );

    let server = match BrokerServer::from_config(config) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create broker: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = server.run().await {
        error!("Broker error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Broker shutdown complete");
    ExitCode::SUCCESS
}

/// Run one request against a running broker and print its result
async fn with_client<F, Fut>(config: &Config, request: F) -> ExitCode
where
    F: FnOnce(BrokerClient) -> Fut,
    Fut: Future<Output = vault_broker::Result<String>>,
{
    let client = match BrokerClient::new(&config.server.base_url()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    match request(client).await {
        Ok(output) => {
            println!("{output}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Plain strings print bare, anything else as pretty JSON
fn render_secret(secret: &Value) -> String {
    match secret {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
