//! Nonce/state extraction from an authorization URL

use url::Url;

use crate::{Error, Result};

/// Correlation values embedded in an authorization URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUrlParams {
    /// Anti-replay value echoed to the token exchange
    pub nonce: String,
    /// Anti-CSRF value echoed by the redirect
    pub state: String,
}

/// Parse `nonce` and `state` out of an authorization URL.
///
/// The first non-empty occurrence of each parameter wins.
pub fn extract_auth_url_params(auth_url: &str) -> Result<AuthUrlParams> {
    let malformed = || Error::MalformedAuthorizationUrl(auth_url.to_string());

    let url = Url::parse(auth_url).map_err(|_| malformed())?;
    if url.query().is_none() {
        return Err(malformed());
    }

    let param = |name: &str| {
        url.query_pairs()
            .find(|(k, v)| k == name && !v.is_empty())
            .map(|(_, v)| v.into_owned())
    };

    Ok(AuthUrlParams {
        nonce: param("nonce").ok_or_else(malformed)?,
        state: param("state").ok_or_else(malformed)?,
    })
}
