//! Credential lifecycle coordinator
//!
//! `Authenticator` owns the current `Login` and serializes every operation
//! that produces a new one (store load, refresh, user authorization) into a
//! single in-flight task. Concurrent callers join that task instead of
//! starting their own, so N simultaneous requests with an expired token
//! cause exactly one refresh and N simultaneous requests with no token
//! cause exactly one consent prompt.
//!
//! Lock discipline: `State` is only held to inspect or swap the in-flight
//! handle and the cached login, and across a store save so a superseded
//! task can't persist its login. Never across token or resource requests.

use std::sync::Arc;

use dpop::token_hash;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use http::header::{AUTHORIZATION, HeaderValue};
use oauth_core::pkce::random_string;
use oauth_core::{
    HttpClient, HttpRequest, HttpResponse, Login, PkceVerifier, clone_request,
};
use provider::{AuthorizationUrlParams, LoginParams, ResponseStatus};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Configuration, DpopBinding, UserAuthenticationMode};
use crate::consent::UserAuthenticator;
use crate::error::{Error, Result};
use crate::par::push_authorization_request;

const STATE_LENGTH: usize = 32;

type LoginTask = Shared<BoxFuture<'static, Result<Login>>>;

/// What an in-flight task does to produce a login.
enum Operation {
    /// Stored login if valid, else refresh if possible, else authorize
    Acquire {
        manual: bool,
        consent: Arc<dyn UserAuthenticator>,
    },
    Authorize,
    Refresh(Login),
    RefreshOrAuthorize(Login),
}

/// How to treat an existing in-flight task or cached login.
enum Join {
    /// Join the in-flight task, else reuse a valid cached login whose access
    /// token differs from `stale`, else start a new task
    Existing { stale: Option<String> },
    /// Retry after task `after` produced an unusable login. Every waiter of
    /// that task shares the same retry.
    Retry { after: u64 },
}

#[derive(Clone)]
struct InFlight {
    id: u64,
    task: LoginTask,
}

impl InFlight {
    fn handle(&self) -> (u64, LoginTask) {
        (self.id, self.task.clone())
    }
}

/// The retry started for a failed task, kept after it settles so late
/// waiters of the failed task join it instead of starting another.
struct RetryTask {
    after: u64,
    flight: InFlight,
}

#[derive(Default)]
struct State {
    cached: Option<Login>,
    in_flight: Option<InFlight>,
    retry: Option<RetryTask>,
    next_id: u64,
}

struct Inner {
    config: Configuration,
    /// Resource requests
    http: Arc<dyn HttpClient>,
    /// Token endpoint and PAR requests (DPoP-signed when bound)
    token_http: Arc<dyn HttpClient>,
    state: Mutex<State>,
}

/// Attaches credentials to requests and keeps them fresh.
///
/// Cheap to clone; clones share the same credential state.
#[derive(Clone)]
pub struct Authenticator {
    inner: Arc<Inner>,
}

impl Authenticator {
    pub fn new(config: Configuration, http: Arc<dyn HttpClient>) -> Self {
        let token_http: Arc<dyn HttpClient> = match &config.dpop {
            Some(binding) => {
                let mut client = dpop::DpopClient::new(
                    http.clone(),
                    binding.signer.clone(),
                    binding.generator.clone(),
                );
                if let Some(server) = &binding.authorization_server {
                    client = client.with_authorization_server(server.clone());
                }
                Arc::new(client)
            }
            None => http.clone(),
        };

        Self {
            inner: Arc::new(Inner {
                config,
                http,
                token_http,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.inner.config
    }

    /// Send `request` with credentials attached.
    ///
    /// Acquires a login first (joining any in-flight acquisition). If the
    /// strategy classifies the response as needing new credentials, renews
    /// them single-flight and resends exactly once; the second response is
    /// returned whatever it is.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let login = self.acquire(false, None).await?;
        let response = self.send_with_login(clone_request(&request), &login).await?;

        let status = self.inner.config.strategy.classify_response(&response);
        let operation = match status {
            ResponseStatus::Valid => return Ok(response),
            ResponseStatus::Authorize => Operation::Authorize,
            ResponseStatus::Refresh => Operation::Refresh(login.clone()),
            ResponseStatus::RefreshOrAuthorize => Operation::RefreshOrAuthorize(login.clone()),
        };

        info!(
            status = ?status,
            response_status = response.status().as_u16(),
            "credential rejected, renewing and retrying once"
        );

        let renewed = self
            .login_from_task(
                operation,
                Join::Existing {
                    stale: Some(login.access_token.value().to_string()),
                },
            )
            .await;
        self.report(&renewed);
        let renewed = renewed?;

        self.send_with_login(request, &renewed).await
    }

    /// Acquire a login, allowing the user-consent step even in
    /// `ManualOnly` mode. `consent` overrides the configured collaborator
    /// for this call.
    pub async fn authenticate(
        &self,
        consent: Option<Arc<dyn UserAuthenticator>>,
    ) -> Result<Login> {
        self.acquire(true, consent).await
    }

    /// Current usable login, if one is cached. Never touches the store.
    pub async fn current_login(&self) -> Option<Login> {
        let state = self.inner.state.lock().await;
        state
            .cached
            .as_ref()
            .filter(|login| login.access_token.is_valid())
            .cloned()
    }

    /// Drop the cached and stored login. In-flight tasks are unaffected.
    pub async fn logout(&self) -> Result<()> {
        self.inner.state.lock().await.cached = None;
        self.inner.config.store.clear().await.map_err(store_error)?;
        info!("login cleared");
        Ok(())
    }

    async fn acquire(
        &self,
        manual: bool,
        consent: Option<Arc<dyn UserAuthenticator>>,
    ) -> Result<Login> {
        let consent = consent.unwrap_or_else(|| self.inner.config.user_authenticator.clone());
        let operation = || Operation::Acquire {
            manual,
            consent: consent.clone(),
        };

        let result = match self.settle(operation(), Join::Existing { stale: None }).await {
            (id, Err(Error::TokenInvalid)) => {
                debug!(task = id, "acquired login already invalid, retrying once");
                self.settle(operation(), Join::Retry { after: id }).await.1
            }
            (_, other) => other,
        };

        self.report(&result);
        result
    }

    async fn login_from_task(&self, operation: Operation, join: Join) -> Result<Login> {
        self.settle(operation, join).await.1
    }

    /// Run `operation` as the single in-flight task, or join/reuse per
    /// `join`, returning the id of the task that produced the result (0 for
    /// a reused cached login). The handle is released when the task
    /// settles, but only if it hasn't been superseded meanwhile.
    async fn settle(&self, operation: Operation, join: Join) -> (u64, Result<Login>) {
        let (id, task) = {
            let mut state = self.inner.state.lock().await;

            let existing = match &join {
                Join::Existing { .. } => state.in_flight.as_ref().map(InFlight::handle),
                Join::Retry { after } => match &state.retry {
                    Some(retry) if retry.after == *after => Some(retry.flight.handle()),
                    _ => state
                        .in_flight
                        .as_ref()
                        .filter(|flight| flight.id > *after)
                        .map(InFlight::handle),
                },
            };

            match existing {
                Some(found) => found,
                None => {
                    if let Join::Existing { stale } = &join {
                        let reusable = state.cached.as_ref().filter(|login| {
                            login.access_token.is_valid()
                                && stale.as_deref() != Some(login.access_token.value())
                        });
                        if let Some(login) = reusable {
                            return (0, Ok(login.clone()));
                        }
                    }

                    state.next_id += 1;
                    let id = state.next_id;
                    let task = Arc::clone(&self.inner).run(id, operation).boxed().shared();
                    let flight = InFlight {
                        id,
                        task: task.clone(),
                    };
                    if let Join::Retry { after } = join {
                        state.retry = Some(RetryTask {
                            after,
                            flight: flight.clone(),
                        });
                    }
                    state.in_flight = Some(flight);
                    (id, task)
                }
            }
        };

        let result = task.await;

        let mut state = self.inner.state.lock().await;
        let current = state.in_flight.as_ref().is_some_and(|flight| flight.id == id);
        if current {
            state.in_flight = None;
        }

        let outcome = match result {
            Ok(login) if !login.access_token.is_valid() => Err(Error::TokenInvalid),
            Ok(login) => {
                if current {
                    state.cached = Some(login.clone());
                }
                Ok(login)
            }
            Err(e) => Err(e),
        };
        (id, outcome)
    }

    async fn send_with_login(
        &self,
        mut request: HttpRequest,
        login: &Login,
    ) -> Result<HttpResponse> {
        let token = login.access_token.value();

        match &self.inner.config.dpop {
            Some(DpopBinding {
                signer,
                generator,
                authorization_server,
            }) => {
                let issuer = login
                    .issuing_server
                    .as_deref()
                    .or(authorization_server.as_deref());
                let ath = token_hash(token);
                let response = signer
                    .sign_and_send(
                        request,
                        generator.as_ref(),
                        Some(token),
                        Some(&ath),
                        issuer,
                        self.inner.http.as_ref(),
                    )
                    .await?;
                Ok(response)
            }
            None => {
                let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| {
                    oauth_core::Error::InvalidCredentials(
                        "access token is not a valid header value".into(),
                    )
                })?;
                request.headers_mut().insert(AUTHORIZATION, value);
                Ok(self.inner.http.send(request).await?)
            }
        }
    }

    fn report(&self, result: &Result<Login>) {
        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!("oauth_login_acquisitions_total", "outcome" => outcome).increment(1);

        if let Some(handler) = &self.inner.config.status_handler {
            handler(result);
        }
    }
}

impl Inner {
    async fn run(self: Arc<Self>, id: u64, operation: Operation) -> Result<Login> {
        match operation {
            Operation::Acquire { manual, consent } => {
                self.acquisition(id, manual, consent.as_ref()).await
            }
            Operation::Authorize => {
                self.authorize(id, false, self.config.user_authenticator.as_ref())
                    .await
            }
            Operation::Refresh(login) => self
                .refresh(id, &login)
                .await?
                .ok_or(Error::UnauthorizedRefreshFailed),
            Operation::RefreshOrAuthorize(login) => match self.refresh(id, &login).await {
                Ok(Some(refreshed)) => Ok(refreshed),
                Ok(None) => {
                    self.authorize(id, false, self.config.user_authenticator.as_ref())
                        .await
                }
                Err(e) => {
                    warn!(error = %e, "refresh failed, falling back to authorization");
                    self.authorize(id, false, self.config.user_authenticator.as_ref())
                        .await
                }
            },
        }
    }

    /// Persist `login` unless task `id` has been superseded.
    async fn save_if_current(&self, id: u64, login: &Login) -> Result<()> {
        let state = self.state.lock().await;
        if !state.in_flight.as_ref().is_some_and(|flight| flight.id == id) {
            debug!(task = id, "task superseded, login not persisted");
            return Ok(());
        }
        self.config
            .store
            .save(login.clone())
            .await
            .map_err(store_error)
    }

    async fn acquisition(
        &self,
        id: u64,
        manual: bool,
        consent: &dyn UserAuthenticator,
    ) -> Result<Login> {
        let stored = self.config.store.load().await.map_err(store_error)?;

        let Some(login) = stored else {
            debug!("no stored login");
            return self.authorize(id, manual, consent).await;
        };

        if login.access_token.is_valid() {
            debug!("stored login is valid");
            return Ok(login);
        }

        match self.refresh(id, &login).await? {
            Some(refreshed) => Ok(refreshed),
            None => self.authorize(id, manual, consent).await,
        }
    }

    /// Refresh `login` if the strategy supports it and a usable refresh
    /// token exists. `Ok(None)` means refresh wasn't possible.
    async fn refresh(&self, id: u64, login: &Login) -> Result<Option<Login>> {
        if !self.config.strategy.supports_refresh() {
            return Ok(None);
        }
        if login.usable_refresh_token().is_none() {
            debug!("no usable refresh token");
            return Ok(None);
        }

        let result = self
            .config
            .strategy
            .refresh(login, &self.config.credentials, self.token_http.as_ref())
            .await;

        match result {
            Ok(refreshed) => {
                metrics::counter!("oauth_refresh_total", "outcome" => "success").increment(1);
                self.save_if_current(id, &refreshed).await?;
                info!(
                    expires = ?refreshed.access_token.expires(),
                    "access token refreshed"
                );
                Ok(Some(refreshed))
            }
            Err(e) => {
                metrics::counter!("oauth_refresh_total", "outcome" => "failure").increment(1);
                warn!(error = %e, "token refresh failed");

                if self.config.clear_login_on_refresh_failure {
                    self.state.lock().await.cached = None;
                    if let Err(clear_err) = self.config.store.clear().await {
                        warn!(error = %clear_err, "failed to clear stored login");
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Full interactive authorization: PKCE, optional PAR, user consent,
    /// code exchange, persist.
    async fn authorize(
        &self,
        id: u64,
        manual: bool,
        consent: &dyn UserAuthenticator,
    ) -> Result<Login> {
        if !manual && self.config.mode == UserAuthenticationMode::ManualOnly {
            debug!("automatic authorization disabled");
            return Err(Error::ManualAuthenticationRequired);
        }

        let result = self.authorize_inner(id, consent).await;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        metrics::counter!("oauth_authorizations_total", "outcome" => outcome).increment(1);
        result
    }

    async fn authorize_inner(&self, id: u64, consent: &dyn UserAuthenticator) -> Result<Login> {
        let credentials = &self.config.credentials;
        let pkce = PkceVerifier::generate();
        let state = random_string(STATE_LENGTH);

        let par = match &self.config.par_endpoint {
            Some(endpoint) => Some(
                push_authorization_request(
                    self.token_http.as_ref(),
                    endpoint,
                    credentials,
                    &state,
                    &pkce,
                )
                .await?,
            ),
            None => None,
        };

        let authorization_url = self.config.strategy.authorization_url(&AuthorizationUrlParams {
            credentials,
            pkce: &pkce,
            state: &state,
            par: par.as_ref(),
        })?;

        info!(
            client_id = %credentials.client_id,
            pushed = par.is_some(),
            "requesting user authorization"
        );
        let callback_url = consent
            .present(&authorization_url, credentials.callback_scheme())
            .await?;

        let login = self
            .config
            .strategy
            .login(LoginParams {
                callback_url: &callback_url,
                authorization_url: &authorization_url,
                credentials,
                pkce: &pkce,
                state: &state,
                http: self.token_http.as_ref(),
            })
            .await?;

        self.save_if_current(id, &login).await?;
        info!(scopes = ?login.scopes, "user authorization complete");
        Ok(login)
    }
}

fn store_error(error: oauth_core::Error) -> Error {
    Error::Store(error.to_string())
}
