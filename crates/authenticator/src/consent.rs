//! User-consent collaborator
//!
//! Presents the authorization URL to the user (browser, device prompt,
//! terminal) and returns the callback URL the authorization server
//! redirected to. Returning `Error::ConsentCancelled` fails the pending
//! login acquisition and releases it so later callers can try again.

use std::sync::Arc;

use oauth_core::BoxFuture;
use url::Url;

use crate::error::{Error, Result};

/// Interactive authorization step.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
/// (`Arc<dyn UserAuthenticator>`).
pub trait UserAuthenticator: Send + Sync {
    /// Show `url` to the user and wait for the redirect to a URL with
    /// scheme `callback_scheme`.
    fn present<'a>(&'a self, url: &'a Url, callback_scheme: &'a str) -> BoxFuture<'a, Result<Url>>;
}

impl<T: UserAuthenticator + ?Sized> UserAuthenticator for Arc<T> {
    fn present<'a>(&'a self, url: &'a Url, callback_scheme: &'a str) -> BoxFuture<'a, Result<Url>> {
        self.as_ref().present(url, callback_scheme)
    }
}

/// Always fails. Placeholder for configurations where interactive consent
/// is unavailable and `authenticate()` is driven with an explicit
/// authenticator instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingUserAuthenticator;

impl UserAuthenticator for FailingUserAuthenticator {
    fn present<'a>(&'a self, _url: &'a Url, _callback_scheme: &'a str) -> BoxFuture<'a, Result<Url>> {
        Box::pin(async { Err(Error::Consent("failing user authenticator used".into())) })
    }
}
