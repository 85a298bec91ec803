//! Keyfabric — trust distribution for token-based service federation.
//!
//! One service issues RS256-signed identity tokens; any number of peer
//! services verify them without ever holding the private key. This crate
//! implements that trust-distribution core:
//!
//! - **Issuer side**: [`keys::KeyStore`] (create-once/persist/load RSA
//!   keypair), [`keys::TokenIssuer`], and JWKS publication.
//! - **Consumer side**: [`keys::JwksKeyCache`] (memory or Redis backend),
//!   [`keys::JwksRefreshService`] (interval refresh + single-flight
//!   on-demand fetch), and [`keys::TokenValidator`].
//! - **Cross-cutting**: [`revocation::RevocationStore`] and the
//!   [`credentials`] API key authenticator gating service-to-service
//!   calls before any user identity is considered.
//!
//! Verification fails closed: an unknown `kid` triggers one coalesced
//! refresh before rejection, and fetch failures never wipe the cache.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod keys;
pub mod revocation;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
