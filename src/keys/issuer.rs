//! RS256 token issuance.

use std::sync::Arc;

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::store::KeyStore;
use crate::Result;

/// Claims carried by every issued token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user's stable identifier
    pub sub: String,
    /// Display name
    pub name: String,
    /// Coarse-grained role
    pub role: String,
    /// Session this token belongs to; revoking a session kills its tokens
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Unique token identifier, the revocation handle
    pub jti: String,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Issued-at, seconds since epoch
    pub iat: i64,
    /// Expiry, seconds since epoch
    pub exp: i64,
}

/// An issued token together with the identifiers a caller needs to
/// track or revoke it later.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// Compact JWS serialization
    pub token: String,
    /// The token's `jti`
    pub jti: String,
    /// Expiry, seconds since epoch
    pub expires_at: i64,
}

/// Signs tokens with the active key, stamping its `kid` into the header so
/// verifiers can select the matching JWKS entry.
#[derive(Clone)]
pub struct TokenIssuer {
    key_store: Arc<KeyStore>,
    issuer: String,
    audience: String,
    token_ttl: Duration,
}

impl TokenIssuer {
    /// Create an issuer over the active key store.
    pub fn new(key_store: Arc<KeyStore>, issuer: String, audience: String, ttl_secs: u64) -> Self {
        Self {
            key_store,
            issuer,
            audience,
            token_ttl: Duration::seconds(i64::try_from(ttl_secs).unwrap_or(i64::MAX)),
        }
    }

    /// Issue a token with the configured default lifetime.
    ///
    /// Each call mints a fresh `jti`; two tokens for the same session are
    /// still individually revocable.
    pub fn issue(
        &self,
        user_id: Uuid,
        name: &str,
        role: &str,
        session_id: Uuid,
    ) -> Result<IssuedToken> {
        self.issue_with_ttl(user_id, name, role, session_id, None)
    }

    /// Issue a token, optionally overriding the configured lifetime.
    pub fn issue_with_ttl(
        &self,
        user_id: Uuid,
        name: &str,
        role: &str,
        session_id: Uuid,
        ttl_secs: Option<u64>,
    ) -> Result<IssuedToken> {
        let ttl = match ttl_secs {
            Some(secs) => Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)),
            None => self.token_ttl,
        };
        let now = Utc::now();
        let expires = now + ttl;
        let jti = Uuid::new_v4().to_string();

        let claims = Claims {
            sub: user_id.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            session_id: session_id.to_string(),
            jti: jti.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: expires.timestamp(),
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.key_store.kid().to_string());

        let token = jsonwebtoken::encode(&header, &claims, self.key_store.encoding_key())?;

        Ok(IssuedToken {
            token,
            jti,
            expires_at: claims.exp,
        })
    }

    /// The `kid` stamped into issued tokens.
    pub fn kid(&self) -> &str {
        self.key_store.kid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issuer() -> TokenIssuer {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::load_or_generate(&dir.path().join("k.pem")).unwrap();
        TokenIssuer::new(
            Arc::new(store),
            "https://issuer.test".to_string(),
            "test-aud".to_string(),
            3600,
        )
    }

    #[test]
    fn header_carries_kid_and_rs256() {
        let iss = issuer();
        let issued = iss
            .issue(Uuid::new_v4(), "alice", "admin", Uuid::new_v4())
            .unwrap();

        let header = jsonwebtoken::decode_header(&issued.token).unwrap();
        assert_eq!(header.alg, Algorithm::RS256);
        assert_eq!(header.kid.as_deref(), Some(iss.kid()));
    }

    #[test]
    fn each_issue_mints_fresh_jti() {
        let iss = issuer();
        let session = Uuid::new_v4();
        let user = Uuid::new_v4();
        let a = iss.issue(user, "alice", "admin", session).unwrap();
        let b = iss.issue(user, "alice", "admin", session).unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn ttl_override_shortens_lifetime() {
        let iss = issuer();
        let issued = iss
            .issue_with_ttl(Uuid::new_v4(), "bob", "member", Uuid::new_v4(), Some(60))
            .unwrap();
        assert!(issued.expires_at <= Utc::now().timestamp() + 61);
    }

    #[test]
    fn expiry_reflects_ttl() {
        let iss = issuer();
        let before = Utc::now().timestamp();
        let issued = iss
            .issue(Uuid::new_v4(), "bob", "member", Uuid::new_v4())
            .unwrap();
        assert!(issued.expires_at >= before + 3599);
        assert!(issued.expires_at <= Utc::now().timestamp() + 3601);
    }
}
