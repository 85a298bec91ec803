//! Crate-level error types.
//!
//! Subsystem failure taxonomies (token validation, credential checks, key
//! fetches) live next to their subsystems; this is the boot/infrastructure
//! error a caller of the binary or the library constructors sees.

use std::io;

use thiserror::Error;

/// Result type alias for keyfabric
pub type Result<T> = std::result::Result<T, Error>;

/// Keyfabric errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The signing keypair could not be loaded nor generated-and-persisted.
    /// Fatal at boot: the service must not start without a usable key.
    #[error("Key persistence failure: {0}")]
    KeyPersistence(String),

    /// RSA key material could not be parsed or encoded
    #[error("Key material error: {0}")]
    KeyMaterial(String),

    /// Token signing failed
    #[error("Token signing failed: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    /// Shared-backend (Redis) connection or command error
    #[error("Shared backend error: {0}")]
    SharedBackend(#[from] redis::RedisError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
