//! Error types for proof construction and signed requests

/// Errors from DPoP signing.
///
/// `Clone` so a failure inside a shared login acquisition can reach every
/// waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The request has no absolute URL to bind a proof to
    #[error("request cannot be signed: {0}")]
    RequestInvalid(String),

    #[error("proof signing failed: {0}")]
    Signing(String),

    #[error(transparent)]
    Core(#[from] oauth_core::Error),
}

/// Result alias for DPoP operations.
pub type Result<T> = std::result::Result<T, Error>;
