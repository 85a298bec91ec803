//! Signing-key lifecycle, JWKS publication, and the consumer-side
//! fetch/cache/validate pipeline.
//!
//! The issuer half ([`KeyStore`], [`TokenIssuer`], [`JwksPublisher`]) owns
//! the private key. The consumer half ([`JwksKeyCache`],
//! [`JwksRefreshService`], [`TokenValidator`]) only ever sees public
//! components fetched over HTTP.

pub mod cache;
pub mod issuer;
pub mod jwks;
pub mod refresh;
pub mod store;
pub mod validator;

pub use cache::{CachedKeySet, JwksKeyCache, MemoryKeyCache, RedisKeyCache};
pub use issuer::{Claims, IssuedToken, TokenIssuer};
pub use jwks::{Jwk, JwksDocument, JwksHealth, JwksPublisher};
pub use refresh::JwksRefreshService;
pub use store::KeyStore;
pub use validator::{
    KeyResolver, LocalKeyResolver, TokenValidator, ValidatedPrincipal, ValidationError,
};
