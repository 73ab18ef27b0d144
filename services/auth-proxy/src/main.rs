//! OAuth auth proxy
//!
//! Local forward proxy that puts an OAuth 2.x credential in front of one
//! protected upstream:
//! 1. Loads the client registration and endpoints from TOML
//! 2. Listens for incoming requests
//! 3. Attaches the current access token (Bearer or DPoP-bound), renewing it
//!    single-flight when it expires or the upstream rejects it
//! 4. Proxies to the configured upstream
//!
//! Consent happens on the terminal: the authorization URL is logged and the
//! redirect URL is read back from stdin.

mod config;
mod consent;
mod metrics;
mod proxy;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use authenticator::{
    Authenticator, Configuration, DpopBinding, UserAuthenticationMode, UserAuthenticator,
};
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use dpop::{DpopKey, DpopSigner, Es256Generator};
use metrics_exporter_prometheus::PrometheusHandle;
use oauth_core::{
    AppCredentials, FileLoginStore, HttpClient, LoginStore, MemoryLoginStore, ReqwestClient,
    origin_of,
};
use provider::StandardProvider;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, Mode};
use crate::consent::ConsoleAuthenticator;
use crate::proxy::{ProxyState, ServiceMetrics, classify_error, error_response};

/// How long in-flight requests may drain after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    proxy: ProxyState,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/login", post(login_handler))
        .route("/logout", post(logout_handler))
        .fallback(proxy_handler)
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// Wire the coordinator from configuration.
fn build_authenticator(
    config: &Config,
    consent: Arc<dyn UserAuthenticator>,
    http: Arc<dyn HttpClient>,
) -> Result<Authenticator> {
    let oauth = &config.oauth;
    let secret = oauth
        .client_secret
        .as_ref()
        .map(|s| s.expose().clone())
        .unwrap_or_default();
    let credentials = AppCredentials::new(
        oauth.client_id.clone(),
        secret,
        oauth.scopes.clone(),
        &oauth.callback_url,
    )
    .context("invalid OAuth client registration")?;

    let mut strategy = StandardProvider::new(&oauth.authorize_url, &oauth.token_url)
        .context("invalid OAuth endpoints")?;

    let binding = match config.dpop_enabled() {
        Some(dpop) => {
            let key = match &dpop.key_path {
                Some(path) => load_or_create_key(path)?,
                None => DpopKey::generate().context("failed to generate DPoP key")?,
            };
            let generator = Es256Generator::new(&key).context("invalid DPoP key")?;
            info!(key_id = %key.id, thumbprint = %generator.jwk().thumbprint(), "DPoP binding enabled");

            strategy = strategy.with_token_type("DPoP");
            let mut binding = DpopBinding::new(Arc::new(generator)).with_signer(Arc::new(
                DpopSigner::with_nonce_capacity(dpop.nonce_cache_capacity),
            ));
            if let Some(server) = dpop.authorization_server.as_deref().and_then(origin_of) {
                strategy = strategy.with_issuing_server(server.clone());
                binding = binding.with_authorization_server(server);
            }
            Some(binding)
        }
        None => None,
    };

    let store: Arc<dyn LoginStore> = match &oauth.credentials_path {
        Some(path) => Arc::new(FileLoginStore::new(path.clone())),
        None => Arc::new(MemoryLoginStore::new()),
    };

    let mode = match oauth.mode {
        Mode::Automatic => UserAuthenticationMode::Automatic,
        Mode::ManualOnly => UserAuthenticationMode::ManualOnly,
    };

    let mut configuration = Configuration::new(credentials, Arc::new(strategy), consent)
        .with_store(store)
        .with_mode(mode)
        .with_status_handler(|result| match result {
            Ok(login) => info!(expires = ?login.access_token.expires(), "login available"),
            Err(e) => warn!(error = %e, "login acquisition failed"),
        });
    if let Some(par_url) = &oauth.par_url {
        configuration = configuration.with_par_endpoint(par_url.clone());
    }
    if let Some(binding) = binding {
        configuration = configuration.with_dpop(binding);
    }

    Ok(Authenticator::new(configuration, http))
}

/// Read the DPoP key from `path`, or generate one and persist it (0600).
fn load_or_create_key(path: &Path) -> Result<DpopKey> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .with_context(|| format!("invalid DPoP key file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let key = DpopKey::generate().context("failed to generate DPoP key")?;
            let json = serde_json::to_string(&key).context("failed to serialize DPoP key")?;
            std::fs::write(path, json)
                .with_context(|| format!("failed to write DPoP key {}", path.display()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                    .with_context(|| format!("failed to restrict {}", path.display()))?;
            }
            info!(path = %path.display(), key_id = %key.id, "generated DPoP key");
            Ok(key)
        }
        Err(e) => Err(e).with_context(|| format!("failed to read DPoP key {}", path.display())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs; LOG_LEVEL, then RUST_LOG, then info
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting auth-proxy");

    // Before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.proxy.listen_addr,
        upstream_url = %config.proxy.upstream_url,
        client_id = %config.oauth.client_id,
        par = config.oauth.par_url.is_some(),
        dpop = config.dpop_enabled().is_some(),
        "configuration loaded"
    );

    let http: Arc<dyn HttpClient> = Arc::new(
        ReqwestClient::new(reqwest::Client::new())
            .with_timeout(Duration::from_secs(config.proxy.timeout_secs)),
    );
    let authenticator = build_authenticator(&config, Arc::new(ConsoleAuthenticator::stdin()), http)?;

    let metrics = ServiceMetrics::new();
    let app_state = AppState {
        proxy: ProxyState {
            authenticator,
            upstream_url: config.proxy.upstream_url.clone(),
            metrics: metrics.clone(),
        },
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.proxy.max_connections);

    let listen_addr = config.proxy.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    let in_flight = metrics.in_flight.clone();

    // The drain timer starts at signal receipt, not at server start
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    info!("shutdown complete");
    Ok(())
}

/// JSON health: uptime, request counters, whether a usable login is cached.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let metrics = &state.proxy.metrics;
    let logged_in = state.proxy.authenticator.current_login().await.is_some();

    let body = serde_json::json!({
        "status": "healthy",
        "logged_in": logged_in,
        "uptime_seconds": metrics.started_at.elapsed().as_secs(),
        "requests_served": metrics.requests_total.load(Ordering::Relaxed),
        "errors_total": metrics.errors_total.load(Ordering::Relaxed),
    });

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

/// Explicit login; the only way to authorize in manual_only mode.
async fn login_handler(State(state): State<AppState>) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());

    match state.proxy.authenticator.authenticate(None).await {
        Ok(login) => {
            let body = serde_json::json!({
                "status": "authenticated",
                "scopes": login.scopes,
                "expires": login.access_token.expires(),
            });
            (
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, "application/json")],
                body.to_string(),
            )
                .into_response()
        }
        Err(e) => {
            let (status, kind, _) = classify_error(&e);
            warn!(error = %e, request_id = %request_id, "login failed");
            error_response(status, kind, &e.to_string(), &request_id)
        }
    }
}

async fn logout_handler(State(state): State<AppState>) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());

    match state.proxy.authenticator.logout().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!(error = %e, request_id = %request_id, "logout failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "proxy_error",
                &e.to_string(),
                &request_id,
            )
        }
    }
}

/// Catch-all handler that proxies everything else to upstream.
async fn proxy_handler(
    State(state): State<AppState>,
    request: axum::http::Request<axum::body::Body>,
) -> Response {
    let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
    proxy::proxy_request(&state.proxy, request, request_id).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
