//! `HttpClient` wrapper that signs every request
//!
//! Used for calls that carry no access token but must still prove key
//! possession: token endpoint exchange and refresh, PAR. Provider
//! strategies receive it as their HTTP bridge and stay unaware of DPoP.

use std::sync::Arc;

use oauth_core::{BoxFuture, HttpClient, HttpRequest, HttpResponse, origin};

use crate::error::Error;
use crate::proof::ProofGenerator;
use crate::signer::DpopSigner;

/// Signs each request with a token-less proof, then sends it through
/// `inner` with the nonce retry.
#[derive(Clone)]
pub struct DpopClient {
    inner: Arc<dyn HttpClient>,
    signer: Arc<DpopSigner>,
    generator: Arc<dyn ProofGenerator>,
    authorization_server: Option<String>,
}

impl DpopClient {
    pub fn new(
        inner: Arc<dyn HttpClient>,
        signer: Arc<DpopSigner>,
        generator: Arc<dyn ProofGenerator>,
    ) -> Self {
        Self {
            inner,
            signer,
            generator,
            authorization_server: None,
        }
    }

    /// Authorization server whose 400 `use_dpop_nonce` errors are retried.
    /// Without one, every request's own origin is treated as the issuer.
    pub fn with_authorization_server(mut self, server: impl Into<String>) -> Self {
        self.authorization_server = Some(server.into());
        self
    }
}

impl HttpClient for DpopClient {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, oauth_core::Result<HttpResponse>> {
        Box::pin(async move {
            let issuer = self
                .authorization_server
                .clone()
                .or_else(|| origin(request.uri()));

            self.signer
                .sign_and_send(
                    request,
                    self.generator.as_ref(),
                    None,
                    None,
                    issuer.as_deref(),
                    self.inner.as_ref(),
                )
                .await
                .map_err(into_core)
        })
    }
}

fn into_core(error: Error) -> oauth_core::Error {
    match error {
        Error::Core(e) => e,
        Error::RequestInvalid(msg) => oauth_core::Error::InvalidUrl(msg),
        Error::Signing(msg) => oauth_core::Error::Transport(format!("dpop signing: {msg}")),
    }
}
