//! OAuth token endpoint exchange and refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Authorization code exchange (initial flow completion, with the PKCE
//!    verifier)
//! 2. Token refresh
//!
//! Both POST a form-encoded body through the [`HttpClient`] bridge and
//! parse the standard RFC 6749 JSON response into a [`Login`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{GRANT_AUTHORIZATION_CODE, GRANT_REFRESH_TOKEN};
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpResponse, body_text, form_post};
use crate::model::{AppCredentials, Login, Token};

/// Response from the token endpoint for both exchange and refresh.
///
/// `expires_in` values are deltas in seconds from the response time; they
/// are converted to absolute expiries by [`TokenResponse::into_login`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token_expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenResponse {
    /// Convert to a [`Login`].
    ///
    /// When `expected_token_type` is given, the response's `token_type` must
    /// match it (case-insensitively) or the response is rejected with
    /// `UnexpectedTokenType`. A missing `token_type` is accepted.
    pub fn into_login(
        self,
        expected_token_type: Option<&str>,
        issuing_server: Option<&str>,
    ) -> Result<Login> {
        if let (Some(expected), Some(actual)) = (expected_token_type, self.token_type.as_deref()) {
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(Error::UnexpectedTokenType(actual.to_string()));
            }
        }

        let access_token = match self.expires_in {
            Some(secs) => Token::expiring_in(self.access_token, Duration::from_secs(secs)),
            None => Token::new(self.access_token),
        };

        let mut login = Login::new(access_token);
        login.refresh_token = self.refresh_token.map(|value| match self.refresh_token_expires_in {
            Some(secs) => Token::expiring_in(value, Duration::from_secs(secs)),
            None => Token::new(value),
        });
        login.scopes = self.scope;
        login.issuing_server = issuing_server.map(str::to_string);
        Ok(login)
    }
}

/// Exchange an authorization code for tokens.
///
/// The PKCE `verifier` proves this client started the flow. The client
/// secret is only sent when one is configured (public clients have none).
pub async fn exchange_code(
    http: &dyn HttpClient,
    token_url: &str,
    credentials: &AppCredentials,
    code: &str,
    verifier: Option<&str>,
) -> Result<TokenResponse> {
    let redirect_uri = credentials.callback_url.as_str();
    let mut params = vec![
        ("grant_type", GRANT_AUTHORIZATION_CODE),
        ("code", code),
        ("client_id", credentials.client_id.as_str()),
        ("redirect_uri", redirect_uri),
    ];
    if let Some(verifier) = verifier {
        params.push(("code_verifier", verifier));
    }
    if !credentials.client_secret.is_empty() {
        params.push(("client_secret", credentials.client_secret.expose().as_str()));
    }

    let request = form_post(token_url, &params)?;
    let response = http.send(request).await?;
    debug!(status = response.status().as_u16(), "token exchange completed");
    parse_response(response, "token exchange")
}

/// Obtain a new access token with a refresh token.
pub async fn refresh_token(
    http: &dyn HttpClient,
    token_url: &str,
    credentials: &AppCredentials,
    refresh: &str,
) -> Result<TokenResponse> {
    let mut params = vec![
        ("grant_type", GRANT_REFRESH_TOKEN),
        ("refresh_token", refresh),
        ("client_id", credentials.client_id.as_str()),
    ];
    if !credentials.client_secret.is_empty() {
        params.push(("client_secret", credentials.client_secret.expose().as_str()));
    }

    let request = form_post(token_url, &params)?;
    let response = http.send(request).await?;
    debug!(status = response.status().as_u16(), "token refresh completed");
    parse_response(response, "token refresh")
}

fn parse_response(response: HttpResponse, operation: &str) -> Result<TokenResponse> {
    let status = response.status();
    if !status.is_success() {
        let body = body_text(&response);

        // 401/403 means the grant is revoked or the client is not authorized
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "{operation} rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "{operation} returned {status}: {body}"
        )));
    }

    serde_json::from_slice(response.body())
        .map_err(|e| Error::TokenExchange(format!("invalid {operation} response: {e}")))
}
