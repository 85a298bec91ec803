//! RS256 token validation.
//!
//! Validation fails closed: any doubt about the signature, the claims, or
//! the key material rejects the token. The error taxonomy below is for
//! internal logs and tests; HTTP boundaries collapse all of it into a
//! generic 401 so callers cannot probe which check failed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use jsonwebtoken::{errors::ErrorKind, Algorithm, DecodingKey, Validation};
use thiserror::Error;
use uuid::Uuid;

use super::jwks::{Jwk, JwksPublisher};
use super::refresh::JwksRefreshService;
use crate::revocation::RevocationStore;

/// Why a token was rejected.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Not a parseable JWS, or claims of the wrong shape
    #[error("malformed token")]
    Malformed,
    /// Header carries no `kid`
    #[error("token header missing kid")]
    MissingKeyId,
    /// No published key matches the header's `kid`, even after a refresh
    #[error("no verification key for kid {0}")]
    UnknownSigningKey(String),
    /// Signature does not verify under the selected key
    #[error("signature verification failed")]
    BadSignature,
    /// `exp` is in the past (beyond the skew allowance)
    #[error("token expired")]
    Expired,
    /// `nbf`/`iat` is in the future (beyond the skew allowance)
    #[error("token not yet valid")]
    NotYetValid,
    /// `iss` does not match the expected issuer
    #[error("issuer mismatch")]
    IssuerMismatch,
    /// `aud` does not match the expected audience
    #[error("audience mismatch")]
    AudienceMismatch,
    /// The token's `jti` has been revoked
    #[error("token revoked")]
    Revoked,
    /// Key resolution failed (fetch error, backend down, bad key material)
    #[error("key resolution failed: {0}")]
    KeyFetch(String),
}

/// The identity a successfully validated token asserts.
#[derive(Debug, Clone)]
pub struct ValidatedPrincipal {
    /// Stable user identifier (`sub`)
    pub user_id: Uuid,
    /// Display name
    pub username: String,
    /// Coarse-grained role
    pub role: String,
    /// Session the token belongs to
    pub session_id: Uuid,
    /// Token identifier, usable as a revocation handle
    pub jti: String,
    /// Expiry instant
    pub expires_at: chrono::DateTime<Utc>,
}

/// Where the validator gets verification keys from.
///
/// Local resolution (same process as the issuer) and remote resolution
/// (cache + fetch) plug in behind the same seam.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    /// Resolve the key for `kid`, or `None` if it is not published.
    async fn resolve(&self, kid: &str) -> Result<Option<Jwk>, ValidationError>;
}

#[async_trait]
impl KeyResolver for JwksRefreshService {
    async fn resolve(&self, kid: &str) -> Result<Option<Jwk>, ValidationError> {
        self.resolve_key(kid)
            .await
            .map_err(|e| ValidationError::KeyFetch(e.to_string()))
    }
}

/// Resolves keys straight from the co-located publisher, skipping HTTP.
/// Used by the issuing service to validate its own tokens.
pub struct LocalKeyResolver {
    publisher: JwksPublisher,
}

impl LocalKeyResolver {
    /// Wrap the local publisher.
    pub fn new(publisher: JwksPublisher) -> Self {
        Self { publisher }
    }
}

#[async_trait]
impl KeyResolver for LocalKeyResolver {
    async fn resolve(&self, kid: &str) -> Result<Option<Jwk>, ValidationError> {
        Ok(self.publisher.document().find(kid).cloned())
    }
}

/// Verifies tokens end to end: header parse, key selection, signature,
/// temporal and issuer/audience claims, then revocation.
pub struct TokenValidator {
    resolver: Arc<dyn KeyResolver>,
    revocations: Arc<dyn RevocationStore>,
    issuer: String,
    audience: String,
    leeway_secs: u64,
}

impl TokenValidator {
    /// Build a validator.
    pub fn new(
        resolver: Arc<dyn KeyResolver>,
        revocations: Arc<dyn RevocationStore>,
        issuer: String,
        audience: String,
        leeway_secs: u64,
    ) -> Self {
        Self {
            resolver,
            revocations,
            issuer,
            audience,
            leeway_secs,
        }
    }

    /// Validate a compact JWS and extract the principal it asserts.
    pub async fn validate(&self, token: &str) -> Result<ValidatedPrincipal, ValidationError> {
        let header =
            jsonwebtoken::decode_header(token).map_err(|_| ValidationError::Malformed)?;
        let kid = header.kid.ok_or(ValidationError::MissingKeyId)?;

        let jwk = self
            .resolver
            .resolve(&kid)
            .await?
            .ok_or_else(|| ValidationError::UnknownSigningKey(kid.clone()))?;

        let decoding_key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e)
            .map_err(|e| ValidationError::KeyFetch(format!("bad key material: {e}")))?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.leeway_secs;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.validate_nbf = true;

        let data = jsonwebtoken::decode::<super::issuer::Claims>(token, &decoding_key, &validation)
            .map_err(map_decode_error)?;
        let claims = data.claims;

        if self
            .revocations
            .is_revoked(&claims.jti)
            .await
            .map_err(|e| ValidationError::KeyFetch(e.to_string()))?
        {
            return Err(ValidationError::Revoked);
        }

        let user_id = Uuid::parse_str(&claims.sub).map_err(|_| ValidationError::Malformed)?;
        let session_id =
            Uuid::parse_str(&claims.session_id).map_err(|_| ValidationError::Malformed)?;
        let expires_at = Utc
            .timestamp_opt(claims.exp, 0)
            .single()
            .ok_or(ValidationError::Malformed)?;

        Ok(ValidatedPrincipal {
            user_id,
            username: claims.name,
            role: claims.role,
            session_id,
            jti: claims.jti,
            expires_at,
        })
    }
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> ValidationError {
    match err.kind() {
        ErrorKind::InvalidSignature => ValidationError::BadSignature,
        ErrorKind::ExpiredSignature => ValidationError::Expired,
        ErrorKind::ImmatureSignature => ValidationError::NotYetValid,
        ErrorKind::InvalidIssuer => ValidationError::IssuerMismatch,
        ErrorKind::InvalidAudience => ValidationError::AudienceMismatch,
        _ => ValidationError::Malformed,
    }
}
