//! Configuration management

use std::path::Path;

use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Loaded in order; files that don't exist are skipped.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Token issuance/validation configuration
    pub jwt: JwtConfig,
    /// Consumer-side JWKS cache and refresh configuration
    pub jwks: JwksConfig,
    /// Revocation store configuration
    pub revocation: RevocationConfig,
    /// API key authentication configuration
    pub auth: AuthConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8750,
        }
    }
}

/// Token issuance and validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// `iss` claim stamped into issued tokens and required on validation
    pub issuer: String,
    /// `aud` claim stamped into issued tokens and required on validation
    pub audience: String,
    /// Default token lifetime in seconds
    pub token_ttl_secs: u64,
    /// Clock-skew tolerance applied to `exp`/`nbf` checks, in seconds.
    /// Absorbs drift between issuer and verifier hosts.
    pub clock_skew_secs: u64,
    /// Where the signing keypair PEM is persisted
    pub key_path: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: "https://keyfabric.local".to_string(),
            audience: "keyfabric-clients".to_string(),
            token_ttl_secs: 3600,
            clock_skew_secs: 300,
            key_path: "signing-key.pem".to_string(),
        }
    }
}

/// Cache backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local cache: fast, lost on restart, per-instance
    #[default]
    Memory,
    /// Redis-backed cache: survives restarts, shared across replicas
    Redis,
}

/// Consumer-side JWKS fetch/cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwksConfig {
    /// Full URL of the authority's JWKS document
    pub authority_url: String,
    /// Background refresh interval in seconds
    pub refresh_interval_secs: u64,
    /// Per-fetch HTTP timeout in seconds
    pub fetch_timeout_secs: u64,
    /// TTL applied to cached key sets in seconds
    pub cache_ttl_secs: u64,
    /// Which cache backend to use
    pub cache_backend: CacheBackend,
    /// Redis connection URL (required when `cache_backend: redis`)
    pub redis_url: Option<String>,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            authority_url: String::new(),
            refresh_interval_secs: 300,
            fetch_timeout_secs: 10,
            cache_ttl_secs: 600,
            cache_backend: CacheBackend::Memory,
            redis_url: None,
        }
    }
}

/// Revocation store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RevocationConfig {
    /// Which backend to use (memory is per-instance; use redis when scaled out)
    pub backend: CacheBackend,
    /// Redis connection URL (required when `backend: redis`)
    pub redis_url: Option<String>,
    /// How often the memory backend reaps naturally-expired entries, in seconds
    pub reap_interval_secs: u64,
}

impl Default for RevocationConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: None,
            reap_interval_secs: 60,
        }
    }
}

/// API key authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Paths that bypass API key authentication. Prefix-matched.
    pub public_paths: Vec<String>,
    /// Admin bearer token guarding the revocation endpoint.
    /// When unset the endpoint answers 503.
    pub admin_token: Option<String>,
    /// Credentials provisioned at startup. Without at least one entry no
    /// caller can reach the authenticated routes.
    pub credentials: Vec<CredentialSeed>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            public_paths: vec![
                "/health".to_string(),
                "/.well-known/".to_string(),
                "/docs".to_string(),
                "/oauth/".to_string(),
            ],
            admin_token: None,
            credentials: Vec::new(),
        }
    }
}

/// An API credential provisioned from configuration at startup.
///
/// The secret is plaintext here and bcrypt-hashed the moment it is
/// registered; keep the config file itself out of reach (or source it
/// from an env file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSeed {
    /// Owning service identifier
    pub client_id: String,
    /// Human-readable label
    pub name: String,
    /// Public lookup key the caller presents
    pub key: String,
    /// Plaintext secret, hashed before storing
    pub secret: String,
    /// Optional end of the validity window
    #[serde(default)]
    pub valid_till: Option<chrono::DateTime<chrono::Utc>>,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            // Env files must enter the process environment before the env
            // provider is evaluated, so pull just their list in a first
            // pass over the file.
            let pre: EnvFilesOnly = Figment::new()
                .merge(Yaml::file(p))
                .extract()
                .unwrap_or_default();
            load_env_files(&pre.env_files);
        }

        let mut figment = Figment::new();
        if let Some(p) = path {
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (KEYFABRIC_ prefix)
        figment = figment.merge(Env::prefixed("KEYFABRIC_").split("__"));

        figment.extract().map_err(|e| Error::Config(e.to_string()))
    }
}

/// First-pass projection of the config file: only the env file list.
#[derive(Debug, Default, Deserialize)]
struct EnvFilesOnly {
    #[serde(default)]
    env_files: Vec<String>,
}

/// Load environment files into the process environment.
/// Files that don't exist are silently skipped.
fn load_env_files(paths: &[String]) {
    for path_str in paths {
        let path = Path::new(path_str);
        if path.exists() {
            match dotenvy::from_path(path) {
                Ok(()) => {
                    tracing::info!("Loaded env file: {path_str}");
                }
                Err(e) => {
                    tracing::warn!("Failed to load env file {path_str}: {e}");
                }
            }
        } else {
            tracing::debug!("Env file not found (skipped): {path_str}");
        }
    }
}
