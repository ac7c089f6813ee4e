//! Browser drivers for the OIDC login
//!
//! The callback always arrives over the real network, whichever driver is
//! used: the driver only gets the browser to the authorization URL.

use std::process::Stdio;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::OidcConfig;
use crate::{Error, Result};

/// Gets a browser to the authorization URL
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Start navigating to `url`.
    ///
    /// The returned session stays open until closed or dropped.
    async fn navigate(&self, url: &str) -> Result<BrowserSession>;
}

/// Handle on a browser started by a driver
#[derive(Debug, Default)]
pub struct BrowserSession {
    child: Option<Child>,
    profile: Option<TempDir>,
}

impl BrowserSession {
    /// Session for a browser the broker does not own (the user's own)
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Whether closing this session terminates a browser process
    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.child.is_some()
    }

    /// Terminate an owned browser and remove its profile
    pub async fn close(mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Browser already exited");
            }
        }
        if let Some(profile) = self.profile.take() {
            if let Err(e) = profile.close() {
                warn!(error = %e, "Failed to remove browser profile");
            }
        }
    }
}

/// Opens the URL in the user's default browser
#[derive(Debug, Default)]
pub struct InteractiveBrowser;

#[async_trait]
impl BrowserDriver for InteractiveBrowser {
    async fn navigate(&self, url: &str) -> Result<BrowserSession> {
        info!("Opening browser for OIDC login");
        let target = url.to_string();
        let opened = tokio::task::spawn_blocking(move || open::that(&target))
            .await
            .map_err(|e| Error::Internal(format!("Browser launcher task failed: {e}")))?;

        if let Err(e) = opened {
            warn!(error = %e, "Failed to open browser automatically");
            eprintln!("\nPlease complete the login by visiting:\n{url}\n");
        }
        Ok(BrowserSession::detached())
    }
}

/// Runs a headless Firefox with Kerberos/SPNEGO negotiation enabled
#[derive(Debug, Clone)]
pub struct HeadlessBrowser {
    command: String,
    trusted_uris: Vec<String>,
    delegation_uris: Vec<String>,
}

impl HeadlessBrowser {
    /// Create a driver from the OIDC configuration
    #[must_use]
    pub fn new(config: &OidcConfig) -> Self {
        Self {
            command: config.browser_command.clone(),
            trusted_uris: config.trusted_uris.clone(),
            delegation_uris: config.delegation_uris.clone(),
        }
    }

    /// Contents of the profile's `user.js`
    fn user_prefs(&self) -> String {
        let prefs = [
            ("network.negotiate-auth.trusted-uris", self.trusted_uris.join(",")),
            ("network.negotiate-auth.delegation-uris", self.delegation_uris.join(",")),
        ];

        let mut out = String::new();
        for (name, value) in prefs {
            // JSON string literals are valid JS string literals
            let value = serde_json::Value::String(value).to_string();
            out.push_str(&format!("user_pref(\"{name}\", {value});\n"));
        }
        out.push_str("user_pref(\"browser.shell.checkDefaultBrowser\", false);\n");
        out.push_str("user_pref(\"datareporting.policy.dataSubmissionEnabled\", false);\n");
        out
    }
}

#[async_trait]
impl BrowserDriver for HeadlessBrowser {
    async fn navigate(&self, url: &str) -> Result<BrowserSession> {
        let profile = tempfile::Builder::new()
            .prefix("vault-broker-profile-")
            .tempdir()?;
        tokio::fs::write(profile.path().join("user.js"), self.user_prefs()).await?;

        let child = Command::new(&self.command)
            .arg("--headless")
            .arg("--no-remote")
            .arg("--profile")
            .arg(profile.path())
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Browser(format!("Failed to launch '{}': {e}", self.command)))?;

        info!(command = %self.command, pid = ?child.id(), "Headless browser started");
        Ok(BrowserSession {
            child: Some(child),
            profile: Some(profile),
        })
    }
}

/// Pick the driver matching the configuration
#[must_use]
pub fn driver_for(config: &OidcConfig) -> Box<dyn BrowserDriver> {
    if config.headless {
        Box::new(HeadlessBrowser::new(config))
    } else {
        Box::new(InteractiveBrowser)
    }
}
