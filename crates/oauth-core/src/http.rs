//! HTTP execution bridge
//!
//! `HttpClient` is the only network primitive the runtime uses. The
//! coordinator, the DPoP signer and provider strategies all go through it,
//! so any transport (reqwest, a test double, a closure) can sit underneath.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Arc<dyn HttpClient>`).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::error::{Error, Result};

pub type HttpRequest = http::Request<Bytes>;
pub type HttpResponse = http::Response<Bytes>;

/// Boxed future alias used by the runtime's dyn-compatible traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Sends one request and returns the full response.
///
/// Non-2xx statuses are responses, not errors; only transport failures
/// return `Err`.
pub trait HttpClient: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        self.as_ref().send(request)
    }
}

impl<C: HttpClient + ?Sized> HttpClient for &C {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        (**self).send(request)
    }
}

/// `HttpClient` backed by a `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl ReqwestClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: None,
        }
    }

    /// Apply a per-request timeout to every request sent.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin(async move {
            let mut request = reqwest::Request::try_from(request)
                .map_err(|e| Error::Transport(format!("invalid request: {e}")))?;
            if let Some(timeout) = self.timeout {
                *request.timeout_mut() = Some(timeout);
            }

            let method = request.method().clone();
            let url = request.url().clone();

            let response = self
                .client
                .execute(request)
                .await
                .map_err(|e| Error::Transport(format!("{method} {url}: {e}")))?;

            let status = response.status();
            let version = response.version();
            let headers = response.headers().clone();
            let body = response
                .bytes()
                .await
                .map_err(|e| Error::Transport(format!("reading response body: {e}")))?;

            debug!(%method, %url, status = status.as_u16(), "http request completed");

            let mut out = http::Response::new(body);
            *out.status_mut() = status;
            *out.version_mut() = version;
            *out.headers_mut() = headers;
            Ok(out)
        })
    }
}

/// `HttpClient` adapter over a plain async function.
pub struct FnClient<F>(F);

/// Wrap an async function as an `HttpClient`.
pub fn client_fn<F, Fut>(f: F) -> FnClient<F>
where
    F: Fn(HttpRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
{
    FnClient(f)
}

impl<F, Fut> HttpClient for FnClient<F>
where
    F: Fn(HttpRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<HttpResponse>> + Send + 'static,
{
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Box::pin((self.0)(request))
    }
}

/// Copy a request so it can be sent again (method, URI, version, headers
/// and body; extensions are not carried over).
pub fn clone_request(request: &HttpRequest) -> HttpRequest {
    let mut cloned = http::Request::new(request.body().clone());
    *cloned.method_mut() = request.method().clone();
    *cloned.uri_mut() = request.uri().clone();
    *cloned.version_mut() = request.version();
    *cloned.headers_mut() = request.headers().clone();
    cloned
}

/// Build a form-encoded POST request.
pub fn form_post(url: &str, params: &[(&str, &str)]) -> Result<HttpRequest> {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();

    http::Request::post(url)
        .header(http::header::CONTENT_TYPE, crate::constants::FORM_CONTENT_TYPE)
        .header(http::header::ACCEPT, crate::constants::JSON_CONTENT_TYPE)
        .body(Bytes::from(body))
        .map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))
}

/// Build a GET request that asks for JSON.
pub fn json_get(url: &str) -> Result<HttpRequest> {
    http::Request::get(url)
        .header(http::header::ACCEPT, crate::constants::JSON_CONTENT_TYPE)
        .body(Bytes::new())
        .map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))
}

/// Response body as lossy UTF-8, for error messages.
pub fn body_text(response: &HttpResponse) -> String {
    let body = String::from_utf8_lossy(response.body());
    if body.is_empty() {
        String::from("<no body>")
    } else {
        body.into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[tokio::test]
    async fn client_fn_forwards_request() {
        let client = client_fn(|request: HttpRequest| async move {
            assert_eq!(request.uri(), "https://example.com/resource");
            let mut response = http::Response::new(Bytes::from_static(b"ok"));
            *response.status_mut() = StatusCode::ACCEPTED;
            Ok(response)
        });

        let request = http::Request::get("https://example.com/resource")
            .body(Bytes::new())
            .unwrap();
        let response = client.send(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(response.body().as_ref(), b"ok");
    }

    #[tokio::test]
    async fn arc_dyn_client_delegates() {
        let client: Arc<dyn HttpClient> = Arc::new(client_fn(|_| async {
            Err(Error::Transport("connection refused".into()))
        }));
        let request = http::Request::get("https://example.com").body(Bytes::new()).unwrap();
        let err = client.send(request).await.unwrap_err();
        assert_eq!(err, Error::Transport("connection refused".into()));
    }

    #[test]
    fn clone_request_copies_everything_but_extensions() {
        let request = http::Request::post("https://example.com/a?b=c")
            .header("x-custom", "1")
            .body(Bytes::from_static(b"payload"))
            .unwrap();
        let cloned = clone_request(&request);
        assert_eq!(cloned.method(), http::Method::POST);
        assert_eq!(cloned.uri(), request.uri());
        assert_eq!(cloned.headers().get("x-custom").unwrap(), "1");
        assert_eq!(cloned.body().as_ref(), b"payload");
    }

    #[test]
    fn form_post_encodes_params() {
        let request = form_post(
            "https://auth.example.com/token",
            &[("grant_type", "authorization_code"), ("redirect_uri", "my://cb?x=1")],
        )
        .unwrap();
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(
            request.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/x-www-form-urlencoded"
        );
        assert_eq!(
            request.body().as_ref(),
            b"grant_type=authorization_code&redirect_uri=my%3A%2F%2Fcb%3Fx%3D1"
        );
    }

    #[test]
    fn body_text_placeholder_for_empty_body() {
        let response = http::Response::new(Bytes::new());
        assert_eq!(body_text(&response), "<no body>");
    }

    #[tokio::test]
    async fn reqwest_client_reports_transport_errors() {
        // Port 9 (discard) on localhost is expected to refuse connections
        let client = ReqwestClient::default().with_timeout(Duration::from_secs(2));
        let request = http::Request::get("http://127.0.0.1:9/").body(Bytes::new()).unwrap();
        let err = client.send(request).await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)), "got: {err:?}");
    }
}
