//! JWKS (RFC 7517) document publication.
//!
//! Only public components leave this module. The document shape is the
//! standard one every JWT library's JWKS fetcher understands, so consumers
//! need no bespoke client.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::store::KeyStore;

/// A single published RSA verification key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    /// Key type, always `RSA`
    pub kty: String,
    /// Intended use, always `sig`
    #[serde(rename = "use")]
    pub use_: String,
    /// Algorithm, always `RS256`
    pub alg: String,
    /// Key identifier matching the token header `kid`
    pub kid: String,
    /// Modulus, base64url without padding
    pub n: String,
    /// Public exponent, base64url without padding
    pub e: String,
}

/// The JWKS document served at `/.well-known/jwks.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JwksDocument {
    /// Published verification keys
    pub keys: Vec<Jwk>,
}

impl JwksDocument {
    /// Find a key by its identifier.
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

/// Liveness report served beside the JWKS document.
#[derive(Debug, Clone, Serialize)]
pub struct JwksHealth {
    /// Always `ok` when the service can answer at all
    pub status: String,
    /// Active key identifier
    pub kid: String,
    /// Signing algorithm
    pub algorithm: String,
    /// When this report was produced
    pub timestamp: DateTime<Utc>,
}

/// Builds the JWKS document from the active signing key.
///
/// The document carries a list so a future overlap window (old + new key
/// published together during rotation) needs no wire change.
#[derive(Clone)]
pub struct JwksPublisher {
    key_store: Arc<KeyStore>,
}

impl JwksPublisher {
    /// Create a publisher over the active key store.
    pub fn new(key_store: Arc<KeyStore>) -> Self {
        Self { key_store }
    }

    /// Liveness report for the publication endpoint.
    pub fn health(&self) -> JwksHealth {
        JwksHealth {
            status: "ok".to_string(),
            kid: self.key_store.kid().to_string(),
            algorithm: "RS256".to_string(),
            timestamp: Utc::now(),
        }
    }

    /// The current JWKS document.
    pub fn document(&self) -> JwksDocument {
        JwksDocument {
            keys: vec![Jwk {
                kty: "RSA".to_string(),
                use_: "sig".to_string(),
                alg: "RS256".to_string(),
                kid: self.key_store.kid().to_string(),
                n: self.key_store.modulus().to_string(),
                e: self.key_store.exponent().to_string(),
            }],
        }
    }
}
