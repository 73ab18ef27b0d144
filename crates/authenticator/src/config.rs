//! Coordinator configuration

use std::fmt;
use std::sync::Arc;

use dpop::{DpopSigner, ProofGenerator};
use oauth_core::{AppCredentials, Login, LoginStore, MemoryLoginStore};
use provider::TokenHandling;

use crate::consent::UserAuthenticator;
use crate::error::Result;

/// Observer invoked with the outcome of every login acquisition.
pub type StatusHandler = Arc<dyn Fn(&Result<Login>) + Send + Sync>;

/// Whether the coordinator may start the interactive flow on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UserAuthenticationMode {
    /// Any request lacking a usable credential triggers user consent.
    #[default]
    Automatic,
    /// Only an explicit `authenticate()` call may prompt the user.
    ManualOnly,
}

/// Binds access tokens to a proof-of-possession key.
#[derive(Clone)]
pub struct DpopBinding {
    pub signer: Arc<DpopSigner>,
    pub generator: Arc<dyn ProofGenerator>,
    /// Issuer used for resource requests when the login doesn't record one
    pub authorization_server: Option<String>,
}

impl DpopBinding {
    pub fn new(generator: Arc<dyn ProofGenerator>) -> Self {
        Self {
            signer: Arc::new(DpopSigner::new()),
            generator,
            authorization_server: None,
        }
    }

    pub fn with_signer(mut self, signer: Arc<DpopSigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_authorization_server(mut self, server: impl Into<String>) -> Self {
        self.authorization_server = Some(server.into());
        self
    }
}

/// Everything an `Authenticator` needs besides its HTTP client.
#[derive(Clone)]
pub struct Configuration {
    pub credentials: AppCredentials,
    pub strategy: Arc<dyn TokenHandling>,
    pub store: Arc<dyn LoginStore>,
    pub user_authenticator: Arc<dyn UserAuthenticator>,
    pub mode: UserAuthenticationMode,
    /// Pushed authorization request endpoint; authorization goes through
    /// PAR when set
    pub par_endpoint: Option<String>,
    pub dpop: Option<DpopBinding>,
    pub status_handler: Option<StatusHandler>,
    /// Clear the stored login when a refresh fails
    pub clear_login_on_refresh_failure: bool,
}

impl Configuration {
    /// Defaults: in-memory store, automatic mode, no PAR, bearer tokens.
    pub fn new(
        credentials: AppCredentials,
        strategy: Arc<dyn TokenHandling>,
        user_authenticator: Arc<dyn UserAuthenticator>,
    ) -> Self {
        Self {
            credentials,
            strategy,
            store: Arc::new(MemoryLoginStore::new()),
            user_authenticator,
            mode: UserAuthenticationMode::default(),
            par_endpoint: None,
            dpop: None,
            status_handler: None,
            clear_login_on_refresh_failure: true,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn LoginStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_mode(mut self, mode: UserAuthenticationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_par_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.par_endpoint = Some(endpoint.into());
        self
    }

    pub fn with_dpop(mut self, binding: DpopBinding) -> Self {
        self.dpop = Some(binding);
        self
    }

    pub fn with_status_handler(
        mut self,
        handler: impl Fn(&Result<Login>) + Send + Sync + 'static,
    ) -> Self {
        self.status_handler = Some(Arc::new(handler));
        self
    }

    pub fn with_clear_login_on_refresh_failure(mut self, clear: bool) -> Self {
        self.clear_login_on_refresh_failure = clear;
        self
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("client_id", &self.credentials.client_id)
            .field("mode", &self.mode)
            .field("par_endpoint", &self.par_endpoint)
            .field("dpop", &self.dpop.is_some())
            .field(
                "clear_login_on_refresh_failure",
                &self.clear_login_on_refresh_failure,
            )
            .finish_non_exhaustive()
    }
}
