//! OAuth client core types and wire helpers
//!
//! Value types, the PKCE generator, origin computation, the HTTP execution
//! bridge, credential storage and token endpoint helpers shared by the
//! provider strategies, the DPoP signer and the credential lifecycle
//! coordinator. No dependency on any binary; usable on its own.
//!
//! Authorization-code flow, as the pieces fit together:
//! 1. `PkceVerifier::generate()` once per attempt
//! 2. A provider strategy builds the authorization URL with the challenge
//! 3. After consent, `callback::authorization_code()` reads the code
//! 4. `token::exchange_code()` trades it (plus the verifier) for tokens
//! 5. `TokenResponse::into_login()` produces the `Login` that a
//!    `LoginStore` persists
//! 6. `token::refresh_token()` renews it later

pub mod callback;
pub mod constants;
pub mod error;
pub mod http;
pub mod metadata;
pub mod model;
pub mod origin;
pub mod pkce;
pub mod store;
pub mod token;

pub use self::http::{
    BoxFuture, HttpClient, HttpRequest, HttpResponse, ReqwestClient, client_fn, clone_request,
};
pub use error::{Error, Result};
pub use metadata::{ClientMetadata, ProtectedResourceMetadata, ServerMetadata};
pub use model::{AppCredentials, Login, Token, now_millis};
pub use origin::{origin, origin_of};
pub use pkce::{Challenge, PkceVerifier, compute_challenge};
pub use store::{FileLoginStore, LoginStore, MemoryLoginStore};
pub use token::{TokenResponse, exchange_code, refresh_token};
