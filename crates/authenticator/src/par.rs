//! Pushed authorization requests (RFC 9126)
//!
//! The authorization parameters are POSTed to the PAR endpoint first; the
//! returned `request_uri` then stands in for them on the authorization URL,
//! so they can't be tampered with or leaked through the browser.

use oauth_core::constants::RESPONSE_TYPE_CODE;
use oauth_core::http::{body_text, form_post};
use oauth_core::{AppCredentials, HttpClient, PkceVerifier};
use provider::ParResponse;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};

#[derive(Deserialize)]
struct PushResponse {
    #[serde(default)]
    request_uri: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Push the authorization parameters to `endpoint`.
pub async fn push_authorization_request(
    http: &dyn HttpClient,
    endpoint: &str,
    credentials: &AppCredentials,
    state: &str,
    pkce: &PkceVerifier,
) -> Result<ParResponse> {
    let scope = credentials.scope_string();
    let challenge = pkce.challenge();
    let mut params = vec![
        ("client_id", credentials.client_id.as_str()),
        ("response_type", RESPONSE_TYPE_CODE),
        ("state", state),
        ("redirect_uri", credentials.callback_url.as_str()),
        ("code_challenge", challenge.value.as_str()),
        ("code_challenge_method", challenge.method.as_str()),
    ];
    if !scope.is_empty() {
        params.push(("scope", scope.as_str()));
    }

    let request = form_post(endpoint, &params)?;
    let response = http.send(request).await?;

    let status = response.status();
    if !status.is_success() {
        warn!(endpoint, status = status.as_u16(), "pushed authorization request rejected");
        return Err(oauth_core::Error::Transport(format!(
            "PAR endpoint returned {status}: {}",
            body_text(&response)
        ))
        .into());
    }

    let body: PushResponse = serde_json::from_slice(response.body())
        .map_err(|e| oauth_core::Error::Parse(format!("PAR response: {e}")))?;

    let request_uri = body
        .request_uri
        .filter(|uri| !uri.is_empty())
        .ok_or(Error::MissingRequestUri)?;

    debug!(endpoint, "pushed authorization request accepted");
    Ok(ParResponse {
        request_uri,
        expires_in: body.expires_in.unwrap_or_default(),
    })
}
