//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Local Vault broker - authenticates once, serves cached secrets over HTTP
#[derive(Parser, Debug)]
#[command(name = "vault-broker")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "VAULT_BROKER_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port of the broker API
    #[arg(short, long, global = true)]
    pub port: Option<u16>,

    /// Host of the broker API and OIDC callback
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "VAULT_BROKER_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "VAULT_BROKER_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the broker server (default)
    Serve,

    /// Ask a running broker to shut down
    Stop,

    /// Authenticate through a running broker and print the token
    Authenticate,

    /// Fetch a secret through a running broker
    FetchSecret {
        /// Secret path under the mount point
        #[arg(required = true)]
        path: String,

        /// Print only this key of the secret
        key: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["vault-broker"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn fetch_secret_takes_path_and_optional_key() {
        let cli =
            Cli::try_parse_from(["vault-broker", "fetch-secret", "app/db", "password"]).unwrap();
        match cli.command {
            Some(Command::FetchSecret { path, key }) => {
                assert_eq!(path, "app/db");
                assert_eq!(key.as_deref(), Some("password"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_follow_subcommand() {
        let cli = Cli::try_parse_from(["vault-broker", "stop", "--port", "9001"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Stop)));
        assert_eq!(cli.port, Some(9001));
    }

    #[test]
    fn fetch_secret_requires_path() {
        assert!(Cli::try_parse_from(["vault-broker", "fetch-secret"]).is_err());
    }
}
