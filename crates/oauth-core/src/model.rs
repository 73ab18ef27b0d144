//! Credential value types
//!
//! `Token` and `Login` are plain values: they are cloned between the store,
//! the coordinator and in-flight operations, never shared mutably.
//! Expirations are unix timestamps in milliseconds (absolute, not deltas).

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use common::Secret;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Current wall-clock time as unix milliseconds.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// An access or refresh token with an optional expiry.
///
/// A token without an expiry is always valid.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires: Option<u64>,
}

impl Token {
    /// A token that never expires.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            expires: None,
        }
    }

    /// A token expiring at `expires` (unix milliseconds).
    pub fn with_expiry(value: impl Into<String>, expires: u64) -> Self {
        Self {
            value: value.into(),
            expires: Some(expires),
        }
    }

    /// A token expiring `lifetime` from now, as computed from `expires_in`.
    /// Lifetimes past the end of the clock saturate to `u64::MAX`.
    pub fn expiring_in(value: impl Into<String>, lifetime: Duration) -> Self {
        let lifetime = u64::try_from(lifetime.as_millis()).unwrap_or(u64::MAX);
        Self::with_expiry(value, now_millis().saturating_add(lifetime))
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn expires(&self) -> Option<u64> {
        self.expires
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_millis())
    }

    /// Valid iff there is no expiry or the expiry lies strictly after `now`.
    pub fn is_valid_at(&self, now: u64) -> bool {
        match self.expires {
            None => true,
            Some(expires) => expires > now,
        }
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"[REDACTED]")
            .field("expires", &self.expires)
            .finish()
    }
}

/// One credential generation, as produced by an authorization or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Login {
    pub access_token: Token,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Token>,
    /// Scopes the user actually granted, space separated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<String>,
    /// Authorization server that issued the tokens (DPoP-bound flows)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuing_server: Option<String>,
}

impl Login {
    pub fn new(access_token: Token) -> Self {
        Self {
            access_token,
            refresh_token: None,
            scopes: None,
            issuing_server: None,
        }
    }

    /// A login carrying a single non-expiring access token.
    pub fn from_token(value: impl Into<String>) -> Self {
        Self::new(Token::new(value))
    }

    pub fn with_refresh_token(mut self, refresh_token: Token) -> Self {
        self.refresh_token = Some(refresh_token);
        self
    }

    pub fn with_scopes(mut self, scopes: impl Into<String>) -> Self {
        self.scopes = Some(scopes.into());
        self
    }

    pub fn with_issuing_server(mut self, issuing_server: impl Into<String>) -> Self {
        self.issuing_server = Some(issuing_server.into());
        self
    }

    /// The refresh token, if present and still valid.
    pub fn usable_refresh_token(&self) -> Option<&Token> {
        self.refresh_token.as_ref().filter(|t| t.is_valid())
    }
}

/// Static per-application OAuth client configuration.
#[derive(Debug, Clone)]
pub struct AppCredentials {
    pub client_id: String,
    pub client_secret: Secret<String>,
    pub scopes: Vec<String>,
    pub callback_url: Url,
}

impl AppCredentials {
    /// Build credentials, parsing `callback_url`.
    ///
    /// A callback without a scheme cannot be routed back to the application
    /// by the user-consent collaborator and is rejected with `MissingScheme`.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<Secret<String>>,
        scopes: Vec<String>,
        callback_url: &str,
    ) -> Result<Self> {
        let callback_url = Url::parse(callback_url).map_err(|e| match e {
            url::ParseError::RelativeUrlWithoutBase => Error::MissingScheme,
            other => Error::InvalidUrl(format!("callback URL {callback_url}: {other}")),
        })?;

        Ok(Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes,
            callback_url,
        })
    }

    /// Scopes joined with a single space, as sent on the wire.
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    /// Scheme the user-consent collaborator listens for.
    pub fn callback_scheme(&self) -> &str {
        self.callback_url.scheme()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_without_expiry_is_always_valid() {
        let token = Token::new("abc");
        assert!(token.is_valid());
        assert!(token.is_valid_at(u64::MAX));
    }

    #[test]
    fn token_validity_is_strictly_before_expiry() {
        let token = Token::with_expiry("abc", 1_000);
        assert!(token.is_valid_at(999));
        assert!(!token.is_valid_at(1_000));
        assert!(!token.is_valid_at(1_001));
    }

    #[test]
    fn distant_past_token_is_invalid() {
        assert!(!Token::with_expiry("EXPIRED", 0).is_valid());
    }

    #[test]
    fn expiring_in_is_valid_now() {
        let token = Token::expiring_in("abc", Duration::from_secs(3600));
        assert!(token.is_valid());
        assert!(token.expires().unwrap() > now_millis());
    }

    #[test]
    fn token_debug_redacts_value() {
        let debug = format!("{:?}", Token::new("super-secret-token"));
        assert!(!debug.contains("super-secret-token"), "got: {debug}");
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn login_serde_roundtrip_omits_absent_fields() {
        let login = Login::from_token("TOKEN");
        let json = serde_json::to_string(&login).unwrap();
        assert_eq!(json, r#"{"access_token":{"value":"TOKEN"}}"#);

        let parsed: Login = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, login);
    }

    #[test]
    fn usable_refresh_token_skips_expired() {
        let login = Login::from_token("a").with_refresh_token(Token::with_expiry("r", 0));
        assert!(login.usable_refresh_token().is_none());

        let login = Login::from_token("a").with_refresh_token(Token::new("r"));
        assert_eq!(login.usable_refresh_token().unwrap().value(), "r");
    }

    #[test]
    fn app_credentials_scope_string_and_scheme() {
        let creds = AppCredentials::new(
            "abc",
            "def",
            vec!["read".into(), "write".into()],
            "my://callback",
        )
        .unwrap();
        assert_eq!(creds.scope_string(), "read write");
        assert_eq!(creds.callback_scheme(), "my");
    }

    #[test]
    fn app_credentials_reject_relative_callback() {
        let err = AppCredentials::new("abc", "", vec![], "/callback").unwrap_err();
        assert_eq!(err, Error::MissingScheme);
    }
}
