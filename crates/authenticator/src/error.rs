//! Error types for credential lifecycle operations

/// Errors from the credential lifecycle coordinator.
///
/// `Clone` because every caller joined onto one in-flight login
/// acquisition receives the same result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No valid credential and automatic authorization is disabled
    #[error("user authentication required; call authenticate()")]
    ManualAuthenticationRequired,

    /// The acquired login's access token is not valid
    #[error("acquired access token is not valid")]
    TokenInvalid,

    /// A response demanded a refresh that could not be performed
    #[error("response required a refresh but none was possible")]
    UnauthorizedRefreshFailed,

    /// The PAR endpoint answered without a request URI
    #[error("pushed authorization response has no request_uri")]
    MissingRequestUri,

    #[error("user cancelled authentication")]
    ConsentCancelled,

    #[error("user authentication failed: {0}")]
    Consent(String),

    #[error("credential store error: {0}")]
    Store(String),

    #[error(transparent)]
    Core(#[from] oauth_core::Error),

    #[error(transparent)]
    Dpop(#[from] dpop::Error),
}

/// Result alias for coordinator operations.
pub type Result<T> = std::result::Result<T, Error>;
