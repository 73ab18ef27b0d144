//! Error types for OAuth protocol, transport and storage operations

/// Errors from OAuth protocol, transport and storage operations.
///
/// Payloads are strings so the type is `Clone`: one failed login
/// acquisition is delivered to every caller waiting on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("callback URL has no scheme")]
    MissingScheme,

    #[error("callback URL carries no authorization code")]
    MissingAuthorizationCode,

    #[error("authorization URL could not be built")]
    MissingAuthorizationUrl,

    #[error("token URL could not be built")]
    MissingTokenUrl,

    #[error("login has no refresh token")]
    MissingRefreshToken,

    #[error("callback URL carries no granted scope")]
    MissingScope,

    #[error("state token in callback does not match the one sent")]
    StateMismatch,

    #[error("unexpected token type: {0}")]
    UnexpectedTokenType(String),

    #[error("provider does not support token refresh")]
    RefreshUnsupported,

    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
