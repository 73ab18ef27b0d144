//! Reading values out of an authorization callback URL
//!
//! After the user-consent step the authorization server redirects to the
//! application's callback URL with `code`, `state` and sometimes `scope`
//! in the query string.

use url::Url;

use crate::error::{Error, Result};

/// All values of the query parameter `name`, in order of appearance.
pub fn query_values(url: &Url, name: &str) -> Vec<String> {
    url.query_pairs()
        .filter(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .collect()
}

fn first_value(url: &Url, name: &str) -> Option<String> {
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// The `code` parameter of a callback.
pub fn authorization_code(url: &Url) -> Result<String> {
    first_value(url, "code").ok_or(Error::MissingAuthorizationCode)
}

/// The `scope` parameter: the scopes the user actually granted.
pub fn granted_scope(url: &Url) -> Result<String> {
    first_value(url, "scope").ok_or(Error::MissingScope)
}

/// The `state` parameter, if any.
pub fn state(url: &Url) -> Option<String> {
    first_value(url, "state")
}

/// Check that the callback echoes the `state` sent with the authorization
/// request.
pub fn verify_state(url: &Url, expected: &str) -> Result<()> {
    match state(url) {
        Some(actual) if actual == expected => Ok(()),
        _ => Err(Error::StateMismatch),
    }
}
