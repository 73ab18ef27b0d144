//! Standards-based authorization-code provider
//!
//! Works against any RFC 6749 server with an authorize endpoint and a token
//! endpoint: PKCE-protected authorization URL (or a PAR `request_uri`),
//! state-checked callback, form-encoded code exchange and refresh.

use oauth_core::constants::RESPONSE_TYPE_CODE;
use oauth_core::{
    AppCredentials, BoxFuture, Error, HttpClient, HttpResponse, Login, Result, callback,
    exchange_code, refresh_token,
};
use tracing::{debug, info};
use url::Url;

use crate::{AuthorizationUrlParams, LoginParams, ResponseStatus, TokenHandling};

/// Authorization-code strategy for a configured endpoint pair.
#[derive(Debug, Clone)]
pub struct StandardProvider {
    authorize_url: Url,
    token_url: Url,
    token_type: Option<String>,
    issuing_server: Option<String>,
    extra_params: Vec<(String, String)>,
    refresh: bool,
    on_unauthorized: ResponseStatus,
}

impl StandardProvider {
    /// Strategy for the given endpoints. Refresh is enabled and a 401 from
    /// the resource maps to `Refresh`.
    pub fn new(authorize_url: &str, token_url: &str) -> Result<Self> {
        let authorize_url = Url::parse(authorize_url).map_err(|_| Error::MissingAuthorizationUrl)?;
        let token_url = Url::parse(token_url).map_err(|_| Error::MissingTokenUrl)?;

        Ok(Self {
            authorize_url,
            token_url,
            token_type: None,
            issuing_server: None,
            extra_params: Vec::new(),
            refresh: true,
            on_unauthorized: ResponseStatus::Refresh,
        })
    }

    /// Require the token endpoint to report this `token_type`
    /// (e.g. "Bearer", "DPoP").
    pub fn with_token_type(mut self, token_type: impl Into<String>) -> Self {
        self.token_type = Some(token_type.into());
        self
    }

    /// Record the authorization server on every login this strategy issues.
    pub fn with_issuing_server(mut self, issuing_server: impl Into<String>) -> Self {
        self.issuing_server = Some(issuing_server.into());
        self
    }

    /// Extra query parameter on the authorization URL (e.g. `login_hint`).
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_params.push((name.into(), value.into()));
        self
    }

    pub fn without_refresh(mut self) -> Self {
        self.refresh = false;
        self
    }

    /// Classification for a 401 from the protected resource.
    pub fn with_unauthorized_status(mut self, status: ResponseStatus) -> Self {
        self.on_unauthorized = status;
        self
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }
}

impl TokenHandling for StandardProvider {
    fn authorization_url(&self, params: &AuthorizationUrlParams<'_>) -> Result<Url> {
        let mut url = self.authorize_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &params.credentials.client_id);

            match params.par {
                Some(par) => {
                    query.append_pair("request_uri", &par.request_uri);
                }
                None => {
                    let challenge = params.pkce.challenge();
                    query
                        .append_pair("response_type", RESPONSE_TYPE_CODE)
                        .append_pair("redirect_uri", params.credentials.callback_url.as_str())
                        .append_pair("state", params.state)
                        .append_pair("code_challenge", &challenge.value)
                        .append_pair("code_challenge_method", &challenge.method);

                    let scope = params.credentials.scope_string();
                    if !scope.is_empty() {
                        query.append_pair("scope", &scope);
                    }
                    for (name, value) in &self.extra_params {
                        query.append_pair(name, value);
                    }
                }
            }
        }

        debug!(
            authorize_url = %self.authorize_url,
            pushed = params.par.is_some(),
            "built authorization URL"
        );
        Ok(url)
    }

    fn login<'a>(&'a self, params: LoginParams<'a>) -> BoxFuture<'a, Result<Login>> {
        Box::pin(async move {
            callback::verify_state(params.callback_url, params.state)?;
            let code = callback::authorization_code(params.callback_url)?;

            let response = exchange_code(
                params.http,
                self.token_url.as_str(),
                params.credentials,
                &code,
                Some(params.pkce.verifier()),
            )
            .await?;

            let mut login =
                response.into_login(self.token_type.as_deref(), self.issuing_server.as_deref())?;

            // Servers that report granted scopes on the callback instead of
            // the token response
            if login.scopes.is_none() {
                login.scopes = callback::granted_scope(params.callback_url).ok();
            }

            info!(token_url = %self.token_url, "authorization code exchanged");
            Ok(login)
        })
    }

    fn supports_refresh(&self) -> bool {
        self.refresh
    }

    fn refresh<'a>(
        &'a self,
        login: &'a Login,
        credentials: &'a AppCredentials,
        http: &'a dyn HttpClient,
    ) -> BoxFuture<'a, Result<Login>> {
        Box::pin(async move {
            if !self.refresh {
                return Err(Error::RefreshUnsupported);
            }
            let current = login.refresh_token.as_ref().ok_or(Error::MissingRefreshToken)?;

            let response =
                refresh_token(http, self.token_url.as_str(), credentials, current.value()).await?;
            let mut refreshed =
                response.into_login(self.token_type.as_deref(), self.issuing_server.as_deref())?;

            // Servers without refresh token rotation omit it from the response
            if refreshed.refresh_token.is_none() {
                refreshed.refresh_token = login.refresh_token.clone();
            }
            if refreshed.scopes.is_none() {
                refreshed.scopes = login.scopes.clone();
            }

            info!(token_url = %self.token_url, "login refreshed");
            Ok(refreshed)
        })
    }

    fn classify_response(&self, response: &HttpResponse) -> ResponseStatus {
        if response.status() == http::StatusCode::UNAUTHORIZED {
            self.on_unauthorized
        } else {
            ResponseStatus::Valid
        }
    }
}
