//! Well-known metadata documents
//!
//! - Authorization server metadata (RFC 8414)
//! - Client ID metadata document
//! - Protected resource metadata (RFC 9728)
//!
//! All three are fetched through the [`HttpClient`] bridge with
//! `Accept: application/json`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::http::{HttpClient, body_text, json_get};
use crate::model::AppCredentials;

const AUTHORIZATION_SERVER_PATH: &str = "/.well-known/oauth-authorization-server";
const PROTECTED_RESOURCE_PATH: &str = "/.well-known/oauth-protected-resource";

/// Authorization server metadata (RFC 8414).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub response_types_supported: Vec<String>,
    #[serde(default)]
    pub grant_types_supported: Vec<String>,
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_methods_supported: Vec<String>,
    #[serde(default)]
    pub token_endpoint_auth_signing_alg_values_supported: Vec<String>,
    #[serde(default)]
    pub scopes_supported: Vec<String>,
    #[serde(default)]
    pub authorization_response_iss_parameter_supported: bool,
    #[serde(default)]
    pub require_pushed_authorization_requests: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushed_authorization_request_endpoint: Option<String>,
    #[serde(default)]
    pub dpop_signing_alg_values_supported: Vec<String>,
    #[serde(default)]
    pub require_request_uri_registration: bool,
    #[serde(default)]
    pub client_id_metadata_document_supported: bool,
}

impl ServerMetadata {
    /// Fetch `https://{host}/.well-known/oauth-authorization-server`.
    pub async fn load(host: &str, http: &dyn HttpClient) -> Result<Self> {
        fetch_json(&well_known_url(host, AUTHORIZATION_SERVER_PATH), http).await
    }
}

/// Client ID metadata document: the client id is itself the URL of this
/// document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub client_id: String,
    #[serde(default)]
    pub scope: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub dpop_bound_access_tokens: bool,
}

impl ClientMetadata {
    pub async fn load(client_id: &str, http: &dyn HttpClient) -> Result<Self> {
        fetch_json(client_id, http).await
    }

    /// Credentials for a public client described by this document: no
    /// secret, scopes split on spaces, first redirect URI as callback.
    pub fn credentials(&self) -> Result<AppCredentials> {
        let callback = self.redirect_uris.first().ok_or_else(|| {
            Error::InvalidUrl(format!("client metadata {} has no redirect_uris", self.client_id))
        })?;
        let scopes = self.scope.split_whitespace().map(str::to_string).collect();
        AppCredentials::new(self.client_id.clone(), "", scopes, callback)
    }
}

/// Protected resource metadata (RFC 9728).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_servers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_methods_supported: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_signing_alg_values_supported: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_documentation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_policy_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_tos_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_client_certificate_bound_access_tokens: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_details_types_supported: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpop_signing_alg_values_supported: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dpop_bound_access_tokens_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_metadata: Option<String>,
}

impl ProtectedResourceMetadata {
    /// Fetch `https://{host}/.well-known/oauth-protected-resource`.
    pub async fn load(host: &str, http: &dyn HttpClient) -> Result<Self> {
        fetch_json(&well_known_url(host, PROTECTED_RESOURCE_PATH), http).await
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::Parse(format!("protected resource metadata: {e}")))
    }
}

fn well_known_url(host: &str, path: &str) -> String {
    format!("https://{host}{path}")
}

async fn fetch_json<T: DeserializeOwned>(url: &str, http: &dyn HttpClient) -> Result<T> {
    let request = json_get(url)?;
    let response = http.send(request).await?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Transport(format!(
            "GET {url} returned {status}: {}",
            body_text(&response)
        )));
    }

    debug!(url, "fetched metadata document");
    serde_json::from_slice(response.body())
        .map_err(|e| Error::Parse(format!("metadata document {url}: {e}")))
}
