//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! The client secret is loaded from OAUTH_CLIENT_SECRET or
//! client_secret_file, never stored in the TOML directly.

use common::Secret;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub proxy: ProxyConfig,
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub dpop: Option<DpopConfig>,
}

/// HTTP proxy settings
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    pub listen_addr: SocketAddr,
    pub upstream_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Whether the proxy may prompt for consent when a request needs it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    #[default]
    Automatic,
    /// Requests fail until POST /login completes
    ManualOnly,
}

/// OAuth client registration and endpoints
#[derive(Debug, Deserialize)]
pub struct OAuthConfig {
    pub client_id: String,
    #[serde(skip)]
    pub client_secret: Option<Secret<String>>,
    /// Path to a file containing the client secret (alternative to
    /// OAUTH_CLIENT_SECRET)
    #[serde(default)]
    pub client_secret_file: Option<PathBuf>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub callback_url: String,
    pub authorize_url: String,
    pub token_url: String,
    #[serde(default)]
    pub par_url: Option<String>,
    #[serde(default)]
    pub mode: Mode,
    /// Persist the login here; in-memory only when unset
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

/// Proof-of-possession binding
#[derive(Debug, Deserialize)]
pub struct DpopConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub authorization_server: Option<String>,
    #[serde(default = "default_nonce_cache_capacity")]
    pub nonce_cache_capacity: usize,
    /// Persist the signing key here; a new key per process when unset
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

fn default_timeout() -> u64 {
    60
}

fn default_max_connections() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_nonce_cache_capacity() -> usize {
    64
}

fn require_http(field: &str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {value}"
        )))
    }
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// Client secret resolution order:
    /// 1. OAUTH_CLIENT_SECRET env var
    /// 2. client_secret_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        require_http("upstream_url", &config.proxy.upstream_url)?;
        require_http("authorize_url", &config.oauth.authorize_url)?;
        require_http("token_url", &config.oauth.token_url)?;
        if let Some(par_url) = &config.oauth.par_url {
            require_http("par_url", par_url)?;
        }

        if config.proxy.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if config.proxy.max_connections == 0 {
            return Err(common::Error::Config(
                "max_connections must be greater than 0".into(),
            ));
        }

        if config.oauth.client_id.trim().is_empty() {
            return Err(common::Error::Config("client_id must not be empty".into()));
        }

        if !config.oauth.callback_url.contains("://") {
            return Err(common::Error::Config(format!(
                "callback_url has no scheme: {}",
                config.oauth.callback_url
            )));
        }

        if let Some(dpop) = &config.dpop {
            if dpop.nonce_cache_capacity == 0 {
                return Err(common::Error::Config(
                    "nonce_cache_capacity must be greater than 0".into(),
                ));
            }
        }

        // Env var takes precedence over file
        if let Ok(secret) = std::env::var("OAUTH_CLIENT_SECRET") {
            config.oauth.client_secret = Some(Secret::new(secret));
        } else if let Some(ref secret_file) = config.oauth.client_secret_file {
            let secret = std::fs::read_to_string(secret_file).map_err(|e| {
                common::Error::Config(format!(
                    "failed to read client_secret_file {}: {e}",
                    secret_file.display()
                ))
            })?;
            let secret = secret.trim().to_owned();
            if !secret.is_empty() {
                config.oauth.client_secret = Some(Secret::new(secret));
            }
        }

        Ok(config)
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("auth-proxy.toml")
    }

    /// DPoP settings when the binding is enabled.
    pub fn dpop_enabled(&self) -> Option<&DpopConfig> {
        self.dpop.as_ref().filter(|d| d.enabled)
    }
}
