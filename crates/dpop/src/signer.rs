//! Signed request execution with the one-shot nonce retry
//!
//! `DpopSigner::sign_and_send` attaches a fresh proof (and the
//! `Authorization: DPoP <token>` header when a token is bound), sends the
//! request, learns any `DPoP-Nonce` the server returns, and when the
//! failure was specifically a nonce challenge re-signs with the new nonce
//! and resends exactly once.
//!
//! Nonce challenges recognised:
//! - 401 with `WWW-Authenticate: DPoP error="use_dpop_nonce"` from any origin
//! - 400 with JSON body `{"error":"use_dpop_nonce"}`, only when the request
//!   targets the issuing authorization server's origin

use http::header::{AUTHORIZATION, HeaderName, HeaderValue, WWW_AUTHENTICATE};
use http::{StatusCode, Uri};
use oauth_core::{HttpClient, HttpRequest, HttpResponse, clone_request, origin, origin_of};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::nonce::NonceCache;
use crate::proof::{PROOF_TYPE, ProofGenerator, ProofParameters};

/// Request header carrying the proof
pub const DPOP_HEADER: HeaderName = HeaderName::from_static("dpop");

/// Response header carrying a server-issued nonce
pub const DPOP_NONCE_HEADER: HeaderName = HeaderName::from_static("dpop-nonce");

/// Error code servers use to demand a (fresh) nonce
pub const USE_DPOP_NONCE: &str = "use_dpop_nonce";

const AUTHORIZATION_SCHEME: &str = "DPoP";

/// Signs requests and owns the per-origin nonce state.
pub struct DpopSigner {
    nonces: NonceCache,
}

impl DpopSigner {
    pub fn new() -> Self {
        Self::with_nonce_capacity(crate::nonce::DEFAULT_CAPACITY)
    }

    pub fn with_nonce_capacity(capacity: usize) -> Self {
        Self {
            nonces: NonceCache::with_capacity(capacity),
        }
    }

    pub fn nonces(&self) -> &NonceCache {
        &self.nonces
    }

    /// Attach a proof (and the bound token, if any) to `request`.
    ///
    /// `issuing_server` should already be an origin; it is placed in the
    /// proof parameters as-is.
    pub fn authenticate_request(
        &self,
        request: &mut HttpRequest,
        generator: &dyn ProofGenerator,
        token: Option<&str>,
        token_hash: Option<&str>,
        issuing_server: Option<&str>,
        nonce: Option<String>,
    ) -> Result<()> {
        let params = ProofParameters {
            key_type: PROOF_TYPE.to_string(),
            http_method: request.method().as_str().to_string(),
            request_endpoint: request_endpoint(request.uri())?,
            nonce,
            token_hash: token_hash.map(str::to_string),
            issuing_server: issuing_server.map(str::to_string),
        };

        let proof = generator.generate(&params)?;
        let proof = HeaderValue::from_str(&proof)
            .map_err(|e| Error::Signing(format!("proof is not a valid header value: {e}")))?;
        request.headers_mut().insert(DPOP_HEADER, proof);

        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("{AUTHORIZATION_SCHEME} {token}"))
                .map_err(|e| Error::RequestInvalid(format!("token is not a valid header value: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(())
    }

    /// Sign and send `request`, retrying once on a nonce challenge.
    ///
    /// The second attempt's response is returned whatever it is.
    pub async fn sign_and_send(
        &self,
        request: HttpRequest,
        generator: &dyn ProofGenerator,
        token: Option<&str>,
        token_hash: Option<&str>,
        issuing_server: Option<&str>,
        http: &dyn HttpClient,
    ) -> Result<HttpResponse> {
        let request_origin = origin(request.uri()).ok_or_else(|| {
            Error::RequestInvalid(format!("{} has no origin", request.uri()))
        })?;
        let issuer_origin =
            issuing_server.map(|server| origin_of(server).unwrap_or_else(|| server.to_string()));
        let targets_issuer = issuer_origin.as_deref() == Some(request_origin.as_str());

        let cached = self.nonces.get(&request_origin).await;

        let mut first = clone_request(&request);
        self.authenticate_request(
            &mut first,
            generator,
            token,
            token_hash,
            issuer_origin.as_deref(),
            cached.clone(),
        )?;
        let response = http.send(first).await?;

        let fresh = response_nonce(&response);
        if let Some(fresh) = &fresh {
            if cached.as_deref() != Some(fresh.as_str()) {
                self.nonces.insert(&request_origin, fresh.clone()).await;
                debug!(origin = %request_origin, "cached dpop nonce");
            }
        }

        if !is_nonce_challenge(&response, targets_issuer) {
            return Ok(response);
        }

        let Some(nonce) = fresh else {
            warn!(
                origin = %request_origin,
                status = response.status().as_u16(),
                "nonce challenge without a DPoP-Nonce header, not retrying"
            );
            return Ok(response);
        };

        info!(origin = %request_origin, "retrying request with fresh dpop nonce");
        metrics::counter!("dpop_nonce_retries_total").increment(1);

        let mut retry = request;
        self.authenticate_request(
            &mut retry,
            generator,
            token,
            token_hash,
            issuer_origin.as_deref(),
            Some(nonce),
        )?;
        let response = http.send(retry).await?;

        // The retry may rotate the nonce again; keep it for the next request
        if let Some(rotated) = response_nonce(&response) {
            self.nonces.insert(&request_origin, rotated).await;
        }
        Ok(response)
    }
}

impl Default for DpopSigner {
    fn default() -> Self {
        Self::new()
    }
}

/// `htu`: scheme, authority and path of the request, without query or
/// fragment.
fn request_endpoint(uri: &Uri) -> Result<String> {
    match (uri.scheme_str(), uri.authority()) {
        (Some(scheme), Some(authority)) => Ok(format!("{scheme}://{authority}{}", uri.path())),
        _ => Err(Error::RequestInvalid(format!("{uri} is not an absolute URL"))),
    }
}

/// The `DPoP-Nonce` header of a response, if present and readable.
pub fn response_nonce(response: &HttpResponse) -> Option<String> {
    response
        .headers()
        .get(DPOP_NONCE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Whether the response demands a (fresh) nonce.
pub fn is_nonce_challenge(response: &HttpResponse, targets_issuer: bool) -> bool {
    match response.status() {
        StatusCode::UNAUTHORIZED => response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .any(is_use_dpop_nonce_challenge),
        StatusCode::BAD_REQUEST if targets_issuer => {
            #[derive(Deserialize)]
            struct ErrorBody {
                error: Option<String>,
            }
            serde_json::from_slice::<ErrorBody>(response.body())
                .ok()
                .and_then(|body| body.error)
                .is_some_and(|error| error == USE_DPOP_NONCE)
        }
        _ => false,
    }
}

/// `DPoP error="use_dpop_nonce"` (scheme case-insensitive, quoting optional).
fn is_use_dpop_nonce_challenge(value: &str) -> bool {
    let Some((scheme, params)) = value.trim().split_once(char::is_whitespace) else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case(AUTHORIZATION_SCHEME) {
        return false;
    }
    params
        .split(',')
        .filter_map(|param| param.split_once('='))
        .any(|(name, value)| {
            name.trim().eq_ignore_ascii_case("error") && value.trim().trim_matches('"') == USE_DPOP_NONCE
        })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;
    use oauth_core::client_fn;

    use super::*;
    use crate::proof::decode_unverified;
    use crate::{DpopKey, Es256Generator};

    /// Generator that encodes the nonce it was given, so tests can read it
    /// back from the request header.
    fn echo_generator(params: &ProofParameters) -> Result<String> {
        Ok(format!(
            "proof;nonce={};htu={}",
            params.nonce.as_deref().unwrap_or("-"),
            params.request_endpoint
        ))
    }

    fn get(uri: &str) -> HttpRequest {
        http::Request::get(uri).body(Bytes::new()).unwrap()
    }

    fn response(status: StatusCode, headers: &[(&str, &str)], body: &'static str) -> HttpResponse {
        let mut response = http::Response::new(Bytes::from_static(body.as_bytes()));
        *response.status_mut() = status;
        for (name, value) in headers {
            response.headers_mut().append(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        response
    }

    type Sent = Arc<Mutex<Vec<HttpRequest>>>;

    /// Mock transport answering with `responses` in order and recording every
    /// request.
    fn scripted(responses: Vec<HttpResponse>) -> (impl HttpClient, Sent) {
        let sent: Sent = Arc::default();
        let queue = Arc::new(Mutex::new(responses.into_iter()));
        let recorder = sent.clone();
        let client = client_fn(move |request: HttpRequest| {
            recorder.lock().unwrap().push(request);
            let next = queue.lock().unwrap().next();
            async move {
                next.ok_or_else(|| oauth_core::Error::Transport("no scripted response".into()))
            }
        });
        (client, sent)
    }

    fn proof_header(request: &HttpRequest) -> String {
        request.headers()[DPOP_HEADER].to_str().unwrap().to_string()
    }

    #[test]
    fn authenticate_request_sets_proof_and_token_headers() {
        let signer = DpopSigner::new();
        let mut request = get("https://example.com");
        signer
            .authenticate_request(
                &mut request,
                &|_: &ProofParameters| Ok::<_, Error>("my_fake_jwt".to_string()),
                Some("token"),
                Some("token_hash"),
                Some("issuer"),
                None,
            )
            .unwrap();

        assert_eq!(request.headers()[AUTHORIZATION], "DPoP token");
        assert_eq!(request.headers()[DPOP_HEADER], "my_fake_jwt");
    }

    #[tokio::test]
    async fn nonce_challenge_retries_exactly_once() {
        let (http, sent) = scripted(vec![
            response(
                StatusCode::UNAUTHORIZED,
                &[
                    ("www-authenticate", r#"DPoP error="use_dpop_nonce", error_description="nonce required""#),
                    ("dpop-nonce", "n-1"),
                ],
                "",
            ),
            response(StatusCode::OK, &[], "ok"),
        ]);
        let signer = DpopSigner::new();

        let result = signer
            .sign_and_send(
                get("https://api.example.com/resource?x=1"),
                &echo_generator,
                Some("TOKEN"),
                None,
                Some("https://auth.example.com"),
                &http,
            )
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::OK);
        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            proof_header(&sent[0]),
            "proof;nonce=-;htu=https://api.example.com/resource"
        );
        assert_eq!(
            proof_header(&sent[1]),
            "proof;nonce=n-1;htu=https://api.example.com/resource"
        );
        assert_eq!(
            signer.nonces().get("https://api.example.com").await.as_deref(),
            Some("n-1")
        );
    }

    #[tokio::test]
    async fn second_challenge_is_returned_not_retried() {
        let challenge = || {
            response(
                StatusCode::UNAUTHORIZED,
                &[("www-authenticate", r#"DPoP error="use_dpop_nonce""#), ("dpop-nonce", "n-2")],
                "",
            )
        };
        let (http, sent) = scripted(vec![challenge(), challenge(), response(StatusCode::OK, &[], "")]);

        let result = DpopSigner::new()
            .sign_and_send(get("https://api.example.com/"), &echo_generator, None, None, None, &http)
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn other_failures_are_returned_unretried() {
        let (http, sent) = scripted(vec![response(
            StatusCode::UNAUTHORIZED,
            &[("www-authenticate", r#"DPoP error="invalid_token""#), ("dpop-nonce", "n-1")],
            "",
        )]);
        let signer = DpopSigner::new();

        let result = signer
            .sign_and_send(get("https://api.example.com/"), &echo_generator, None, None, None, &http)
            .await
            .unwrap();

        assert_eq!(result.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(sent.lock().unwrap().len(), 1);
        // The nonce is still learned for the next request
        assert_eq!(
            signer.nonces().get("https://api.example.com").await.as_deref(),
            Some("n-1")
        );
    }

    #[tokio::test]
    async fn bad_request_nonce_error_only_retried_at_issuer() {
        let bad_request = || {
            response(
                StatusCode::BAD_REQUEST,
                &[("dpop-nonce", "as-1")],
                r#"{"error":"use_dpop_nonce"}"#,
            )
        };

        // Authorization server origin: retried
        let (http, sent) = scripted(vec![bad_request(), response(StatusCode::OK, &[], "{}")]);
        let result = DpopSigner::new()
            .sign_and_send(
                http::Request::post("https://auth.example.com/token").body(Bytes::new()).unwrap(),
                &echo_generator,
                None,
                None,
                Some("https://auth.example.com"),
                &http,
            )
            .await
            .unwrap();
        assert_eq!(result.status(), StatusCode::OK);
        assert_eq!(sent.lock().unwrap().len(), 2);

        // Resource server origin: returned as-is
        let (http, sent) = scripted(vec![bad_request()]);
        let result = DpopSigner::new()
            .sign_and_send(
                get("https://api.example.com/"),
                &echo_generator,
                None,
                None,
                Some("https://auth.example.com"),
                &http,
            )
            .await
            .unwrap();
        assert_eq!(result.status(), StatusCode::BAD_REQUEST);
        assert_eq!(sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn nonces_never_cross_origins() {
        let (http, sent) = scripted(vec![
            response(StatusCode::OK, &[("dpop-nonce", "api-nonce")], ""),
            response(StatusCode::OK, &[], ""),
        ]);
        let signer = DpopSigner::new();

        signer
            .sign_and_send(get("https://api.example.com/a"), &echo_generator, None, None, None, &http)
            .await
            .unwrap();
        signer
            .sign_and_send(get("https://auth.example.com/b"), &echo_generator, None, None, None, &http)
            .await
            .unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(proof_header(&sent[1]), "proof;nonce=-;htu=https://auth.example.com/b");
        assert_eq!(signer.nonces().get("https://auth.example.com").await, None);
    }

    #[tokio::test]
    async fn cached_nonce_is_offered_on_next_request() {
        let (http, sent) = scripted(vec![
            response(StatusCode::OK, &[("dpop-nonce", "n-1")], ""),
            response(StatusCode::OK, &[], ""),
        ]);
        let signer = DpopSigner::new();

        for _ in 0..2 {
            signer
                .sign_and_send(get("https://api.example.com:443/x"), &echo_generator, None, None, None, &http)
                .await
                .unwrap();
        }
        assert_eq!(
            proof_header(&sent.lock().unwrap()[1]),
            "proof;nonce=n-1;htu=https://api.example.com:443/x"
        );
    }

    #[tokio::test]
    async fn relative_request_is_invalid() {
        let (http, sent) = scripted(vec![]);
        let err = DpopSigner::new()
            .sign_and_send(get("/relative"), &echo_generator, None, None, None, &http)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RequestInvalid(_)), "got: {err:?}");
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_errors_propagate() {
        let (http, _) = scripted(vec![]);
        let err = DpopSigner::new()
            .sign_and_send(get("https://api.example.com/"), &echo_generator, None, None, None, &http)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Core(oauth_core::Error::Transport(_))));
    }

    #[tokio::test]
    async fn real_proofs_carry_token_hash_and_issuer_origin() {
        let (http, sent) = scripted(vec![response(StatusCode::OK, &[], "")]);
        let generator = Es256Generator::new(&DpopKey::generate().unwrap()).unwrap();

        DpopSigner::new()
            .sign_and_send(
                get("https://api.example.com/data"),
                &generator,
                Some("TOKEN"),
                Some("ath-value"),
                Some("https://auth.example.com/some/path"),
                &http,
            )
            .await
            .unwrap();

        let (header, claims) = decode_unverified(&proof_header(&sent.lock().unwrap()[0])).unwrap();
        assert_eq!(header.typ, "dpop+jwt");
        assert_eq!(claims.htm, "GET");
        assert_eq!(claims.htu, "https://api.example.com/data");
        assert_eq!(claims.ath.as_deref(), Some("ath-value"));
        assert_eq!(claims.iss.as_deref(), Some("https://auth.example.com"));
    }

    #[test]
    fn challenge_parsing() {
        assert!(is_use_dpop_nonce_challenge(r#"DPoP error="use_dpop_nonce""#));
        assert!(is_use_dpop_nonce_challenge(r#"dpop algs="ES256", error=use_dpop_nonce"#));
        assert!(!is_use_dpop_nonce_challenge(r#"Bearer error="use_dpop_nonce""#));
        assert!(!is_use_dpop_nonce_challenge(r#"DPoP error="invalid_token""#));
        assert!(!is_use_dpop_nonce_challenge("DPoP"));
    }
}
