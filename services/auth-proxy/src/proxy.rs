//! HTTP proxy logic
//!
//! Receives inbound requests, strips hop-by-hop headers and any inbound
//! credentials, and forwards to the upstream URL through the
//! `Authenticator`, which attaches (and renews) the OAuth credential.
//! Returns the upstream response verbatim, including error statuses.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use authenticator::{Authenticator, Error};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tracing::{error, info, instrument, warn};

use crate::metrics;

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Inbound credentials never reach upstream; the authenticator owns them.
const CREDENTIAL_HEADERS: &[&str] = &["authorization", "dpop"];

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Request counters shared between handlers and the health endpoint
#[derive(Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            in_flight: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub authenticator: Authenticator,
    pub upstream_url: String,
    pub metrics: ServiceMetrics,
}

/// JSON error response: {"error":{"type":"...","message":"...","request_id":"req_..."}}
pub fn error_response(status: StatusCode, kind: &str, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": kind,
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
        .into_response()
}

/// Status, error type and metrics label for a failed authenticated request.
pub fn classify_error(err: &Error) -> (StatusCode, &'static str, &'static str) {
    match err {
        Error::ManualAuthenticationRequired
        | Error::ConsentCancelled
        | Error::Consent(_)
        | Error::UnauthorizedRefreshFailed
        | Error::TokenInvalid => (
            StatusCode::UNAUTHORIZED,
            "authentication_error",
            "authentication",
        ),
        Error::Core(oauth_core::Error::InvalidCredentials(_))
        | Error::Core(oauth_core::Error::TokenExchange(_)) => (
            StatusCode::UNAUTHORIZED,
            "authentication_error",
            "token_endpoint",
        ),
        Error::Core(oauth_core::Error::Transport(_)) => {
            (StatusCode::BAD_GATEWAY, "proxy_error", "connection")
        }
        _ => (StatusCode::BAD_GATEWAY, "proxy_error", "other"),
    }
}

/// Forward an inbound request to upstream with credentials attached.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    state.metrics.in_flight.fetch_add(1, Ordering::Relaxed);

    let method = request.method().clone();
    let response = forward(state, request, &request_id).await;

    state.metrics.in_flight.fetch_sub(1, Ordering::Relaxed);
    if response.status().is_server_error() {
        state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(
    state: &ProxyState,
    request: axum::http::Request<axum::body::Body>,
    request_id: &str,
) -> Response {
    let (parts, body) = request.into_parts();

    let upstream_url = match parts.uri.path_and_query() {
        Some(pq) => format!("{}{}", state.upstream_url.trim_end_matches('/'), pq),
        None => state.upstream_url.clone(),
    };

    let body: Bytes = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid request body: {e}"),
                request_id,
            );
        }
    };

    let mut outbound = match http::Request::builder()
        .method(parts.method)
        .uri(&upstream_url)
        .body(body)
    {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, url = %upstream_url, "invalid upstream URL");
            return error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("invalid request target: {e}"),
                request_id,
            );
        }
    };

    for (name, value) in &parts.headers {
        if !is_hop_by_hop(name.as_str())
            && !is_credential(name.as_str())
            && *name != header::HOST
        {
            outbound.headers_mut().append(name.clone(), value.clone());
        }
    }

    match state.authenticator.execute(outbound).await {
        Ok(upstream) => {
            let (parts, body) = upstream.into_parts();
            let mut response = Response::builder().status(parts.status);
            for (name, value) in &parts.headers {
                if !is_hop_by_hop(name.as_str()) {
                    response = response.header(name, value);
                }
            }
            response
                .body(axum::body::Body::from(body))
                .unwrap_or_else(|e| {
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "proxy_error",
                        &format!("response build error: {e}"),
                        request_id,
                    )
                })
        }
        Err(e) => {
            let (status, kind, label) = classify_error(&e);
            metrics::record_upstream_error(label);
            if status == StatusCode::UNAUTHORIZED {
                info!(error = %e, "request not authorized");
            } else {
                error!(error = %e, "upstream request failed");
            }
            error_response(status, kind, &e.to_string(), request_id)
        }
    }
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn is_credential(name: &str) -> bool {
    CREDENTIAL_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
