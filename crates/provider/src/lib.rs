//! Protocol strategy surface for OAuth providers
//!
//! Defines the `TokenHandling` trait that decouples the credential lifecycle
//! coordinator from any one authorization server. A strategy supplies four
//! capabilities:
//! - `authorization_url` builds the URL the user consents at
//! - `login` turns the consent callback into a `Login`
//! - `refresh` renews a `Login` (optional; unsupported by default)
//! - `classify_response` tells the coordinator what a protected-resource
//!   response means for the credential
//!
//! `StandardProvider` implements it for any RFC 6749 server with a known
//! authorize/token endpoint pair.

pub mod standard;

pub use standard::StandardProvider;

use http::StatusCode;
use oauth_core::{
    AppCredentials, BoxFuture, Error, HttpClient, HttpResponse, Login, PkceVerifier, Result,
};
use serde::{Deserialize, Serialize};
use url::Url;

/// What an executed request's response means for the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseStatus {
    /// Return the response to the caller as-is
    Valid,
    /// Refresh the login and retry once
    Refresh,
    /// Run a full authorization and retry once
    Authorize,
    /// Refresh, falling back to full authorization, then retry once
    RefreshOrAuthorize,
}

/// Pushed authorization request result: the handle that replaces inline
/// authorization parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParResponse {
    pub request_uri: String,
    /// Seconds the request URI stays usable
    pub expires_in: u64,
}

/// Inputs for building the authorization URL.
#[derive(Debug, Clone, Copy)]
pub struct AuthorizationUrlParams<'a> {
    pub credentials: &'a AppCredentials,
    pub pkce: &'a PkceVerifier,
    pub state: &'a str,
    /// Present when the parameters were pushed to a PAR endpoint first
    pub par: Option<&'a ParResponse>,
}

/// Inputs for exchanging the consent callback for a login.
#[derive(Clone, Copy)]
pub struct LoginParams<'a> {
    pub callback_url: &'a Url,
    pub authorization_url: &'a Url,
    pub credentials: &'a AppCredentials,
    pub pkce: &'a PkceVerifier,
    pub state: &'a str,
    pub http: &'a dyn HttpClient,
}

/// Authorization strategy for one provider.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn TokenHandling>`).
pub trait TokenHandling: Send + Sync {
    fn authorization_url(&self, params: &AuthorizationUrlParams<'_>) -> Result<Url>;

    fn login<'a>(&'a self, params: LoginParams<'a>) -> BoxFuture<'a, Result<Login>>;

    /// Whether `refresh` does anything. The coordinator never calls
    /// `refresh` when this is false.
    fn supports_refresh(&self) -> bool {
        false
    }

    fn refresh<'a>(
        &'a self,
        _login: &'a Login,
        _credentials: &'a AppCredentials,
        _http: &'a dyn HttpClient,
    ) -> BoxFuture<'a, Result<Login>> {
        Box::pin(async { Err(Error::RefreshUnsupported) })
    }

    fn classify_response(&self, response: &HttpResponse) -> ResponseStatus {
        refresh_when_unauthorized(response)
    }
}

/// Default policy: 401 means refresh, everything else is valid.
pub fn refresh_when_unauthorized(response: &HttpResponse) -> ResponseStatus {
    if response.status() == StatusCode::UNAUTHORIZED {
        ResponseStatus::Refresh
    } else {
        ResponseStatus::Valid
    }
}

/// Policy for resources whose responses never say anything about the
/// credential.
pub fn all_responses_valid(_response: &HttpResponse) -> ResponseStatus {
    ResponseStatus::Valid
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn response(status: StatusCode) -> HttpResponse {
        let mut response = http::Response::new(Bytes::new());
        *response.status_mut() = status;
        response
    }

    struct Minimal;

    impl TokenHandling for Minimal {
        fn authorization_url(&self, _params: &AuthorizationUrlParams<'_>) -> Result<Url> {
            Url::parse("my://auth?client_id=abc").map_err(|e| Error::InvalidUrl(e.to_string()))
        }

        fn login<'a>(&'a self, _params: LoginParams<'a>) -> BoxFuture<'a, Result<Login>> {
            Box::pin(async { Ok(Login::from_token("TOKEN")) })
        }
    }

    #[test]
    fn default_classification_refreshes_on_401_only() {
        assert_eq!(
            refresh_when_unauthorized(&response(StatusCode::UNAUTHORIZED)),
            ResponseStatus::Refresh
        );
        assert_eq!(
            refresh_when_unauthorized(&response(StatusCode::FORBIDDEN)),
            ResponseStatus::Valid
        );
        assert_eq!(
            refresh_when_unauthorized(&response(StatusCode::OK)),
            ResponseStatus::Valid
        );
    }

    #[test]
    fn all_valid_ignores_status() {
        assert_eq!(
            all_responses_valid(&response(StatusCode::UNAUTHORIZED)),
            ResponseStatus::Valid
        );
    }

    #[tokio::test]
    async fn trait_defaults_disable_refresh() {
        let strategy = Minimal;
        assert!(!strategy.supports_refresh());
        assert_eq!(
            strategy.classify_response(&response(StatusCode::UNAUTHORIZED)),
            ResponseStatus::Refresh
        );

        let credentials =
            AppCredentials::new("abc", "", vec![], "my://callback").unwrap();
        let http = oauth_core::client_fn(|_| async {
            Err(Error::Transport("unreachable".into()))
        });
        let err = strategy
            .refresh(&Login::from_token("a"), &credentials, &http)
            .await
            .unwrap_err();
        assert_eq!(err, Error::RefreshUnsupported);
    }

    #[test]
    fn par_response_parses_wire_format() {
        let par: ParResponse = serde_json::from_str(
            r#"{"request_uri":"urn:ietf:params:oauth:request_uri:abc","expires_in":60}"#,
        )
        .unwrap();
        assert_eq!(par.request_uri, "urn:ietf:params:oauth:request_uri:abc");
        assert_eq!(par.expires_in, 60);
    }
}
