//! Credential lifecycle coordination for OAuth 2.x clients
//!
//! `Authenticator` is the entry point: it attaches the current credential to
//! outgoing requests and keeps that credential usable. Obtaining a new one
//! (store load, refresh, interactive authorization) is single-flight across
//! all concurrent callers.
//!
//! Request lifecycle:
//! 1. Acquire a login: cached → stored → refreshed → user authorization
//! 2. Attach it as `Bearer`, or as a DPoP-bound token with a fresh proof
//! 3. Classify the response via the provider strategy
//! 4. On `Refresh` / `Authorize` / `RefreshOrAuthorize`, renew once and
//!    resend; the second response is final
//!
//! Interactive consent is delegated to a `UserAuthenticator`; PAR (RFC 9126)
//! is used when a pushed authorization request endpoint is configured.

pub mod authenticator;
pub mod config;
pub mod consent;
pub mod error;
pub mod par;

pub use authenticator::Authenticator;
pub use config::{Configuration, DpopBinding, StatusHandler, UserAuthenticationMode};
pub use consent::{FailingUserAuthenticator, UserAuthenticator};
pub use error::{Error, Result};
pub use par::push_authorization_request;
