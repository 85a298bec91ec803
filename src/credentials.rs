//! API key/secret authentication for service-to-service calls.
//!
//! A caller presents a key (lookup handle, stored plaintext) and a secret
//! (stored only as a bcrypt hash, shown once at creation). This gate runs
//! before any user token is considered: an unauthenticated service never
//! gets to exercise the token machinery at all.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::RngCore;
use thiserror::Error;
use uuid::Uuid;

use crate::{Error, Result};

/// Why a credential check failed. Collapsed to a generic 401 at the HTTP
/// boundary; the distinction exists for internal logging only.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// Key or secret header absent
    #[error("missing credential")]
    MissingCredential,
    /// Unknown key, wrong secret, inactive, or not yet valid
    #[error("invalid credential")]
    InvalidCredential,
    /// Credential exists and matches but its validity window has closed
    #[error("expired credential")]
    ExpiredCredential,
}

/// A registered API credential. The secret is never stored; only its
/// bcrypt hash survives registration.
#[derive(Debug, Clone)]
pub struct ApiCredential {
    /// Stable credential identifier
    pub id: Uuid,
    /// Public lookup key, `kf_`-prefixed
    pub key: String,
    /// bcrypt hash of the secret
    pub secret_hash: String,
    /// Which service this credential belongs to
    pub client_id: String,
    /// Human-readable label
    pub name: String,
    /// Start of the validity window
    pub valid_from: DateTime<Utc>,
    /// End of the validity window, open-ended when `None`
    pub valid_till: Option<DateTime<Utc>>,
    /// Deactivated credentials fail authentication without being deleted
    pub active: bool,
}

/// The service identity a successful credential check asserts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedClient {
    /// The credential that authenticated
    pub credential_id: Uuid,
    /// The owning service
    pub client_id: String,
    /// Credential label
    pub name: String,
}

/// A freshly created credential with its one-time plaintext secret.
#[derive(Debug)]
pub struct NewCredential {
    /// The stored credential record
    pub credential: ApiCredential,
    /// Plaintext secret. Shown once; only the hash is kept.
    pub secret: String,
}

/// Registry of API credentials and the authentication check over them.
#[derive(Default)]
pub struct ApiKeyAuthenticator {
    credentials: DashMap<String, ApiCredential>,
}

impl ApiKeyAuthenticator {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint and register a new credential for `client_id`.
    pub fn create(
        &self,
        client_id: &str,
        name: &str,
        valid_till: Option<DateTime<Utc>>,
    ) -> Result<NewCredential> {
        let key = format!("kf_{}", random_b64(16));
        let secret = random_b64(32);
        let credential = self.register(client_id, name, &key, &secret, valid_till)?;
        Ok(NewCredential { credential, secret })
    }

    /// Register a credential with a caller-chosen key and secret.
    ///
    /// This is the startup-provisioning path: the secret arrives in
    /// plaintext (from configuration) and only its hash is kept.
    /// Re-registering an existing key replaces it.
    pub fn register(
        &self,
        client_id: &str,
        name: &str,
        key: &str,
        secret: &str,
        valid_till: Option<DateTime<Utc>>,
    ) -> Result<ApiCredential> {
        let secret_hash = pwhash::bcrypt::hash(secret)
            .map_err(|e| Error::Internal(format!("secret hashing failed: {e}")))?;

        let credential = ApiCredential {
            id: Uuid::new_v4(),
            key: key.to_string(),
            secret_hash,
            client_id: client_id.to_string(),
            name: name.to_string(),
            valid_from: Utc::now(),
            valid_till,
            active: true,
        };
        self.credentials
            .insert(key.to_string(), credential.clone());

        Ok(credential)
    }

    /// Check a presented key/secret pair.
    pub fn authenticate(
        &self,
        key: &str,
        secret: &str,
    ) -> std::result::Result<AuthenticatedClient, CredentialError> {
        let Some(entry) = self.credentials.get(key) else {
            return Err(CredentialError::InvalidCredential);
        };
        let credential = entry.value();
        let now = Utc::now();

        if !credential.active || credential.valid_from > now {
            return Err(CredentialError::InvalidCredential);
        }
        if credential.valid_till.is_some_and(|till| till <= now) {
            return Err(CredentialError::ExpiredCredential);
        }
        if !pwhash::bcrypt::verify(secret, &credential.secret_hash) {
            return Err(CredentialError::InvalidCredential);
        }

        Ok(AuthenticatedClient {
            credential_id: credential.id,
            client_id: credential.client_id.clone(),
            name: credential.name.clone(),
        })
    }

    /// Deactivate a credential. It stays listed but stops authenticating.
    pub fn deactivate(&self, key: &str) -> bool {
        match self.credentials.get_mut(key) {
            Some(mut entry) => {
                entry.value_mut().active = false;
                true
            }
            None => false,
        }
    }

    /// Number of registered credentials.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Whether no credentials are registered.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

fn random_b64(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn created_credential_authenticates() {
        let auth = ApiKeyAuthenticator::new();
        let new = auth.create("svc-a", "primary", None).unwrap();

        let client = auth.authenticate(&new.credential.key, &new.secret).unwrap();
        assert_eq!(client.client_id, "svc-a");
        assert_eq!(client.credential_id, new.credential.id);
    }

    #[test]
    fn key_is_prefixed_and_secret_not_stored() {
        let auth = ApiKeyAuthenticator::new();
        let new = auth.create("svc-a", "primary", None).unwrap();

        assert!(new.credential.key.starts_with("kf_"));
        assert_ne!(new.credential.secret_hash, new.secret);
        assert!(new.credential.secret_hash.starts_with("$2"));
    }

    #[test]
    fn registered_credential_authenticates_with_chosen_pair() {
        let auth = ApiKeyAuthenticator::new();
        auth.register("svc-b", "seeded", "kf_seeded", "hunter2", None)
            .unwrap();

        let client = auth.authenticate("kf_seeded", "hunter2").unwrap();
        assert_eq!(client.client_id, "svc-b");
        assert_eq!(
            auth.authenticate("kf_seeded", "wrong"),
            Err(CredentialError::InvalidCredential)
        );
    }

    #[test]
    fn wrong_secret_and_unknown_key_are_invalid() {
        let auth = ApiKeyAuthenticator::new();
        let new = auth.create("svc-a", "primary", None).unwrap();

        assert_eq!(
            auth.authenticate(&new.credential.key, "nope"),
            Err(CredentialError::InvalidCredential)
        );
        assert_eq!(
            auth.authenticate("kf_unknown", &new.secret),
            Err(CredentialError::InvalidCredential)
        );
    }

    #[test]
    fn expired_window_is_distinguished() {
        let auth = ApiKeyAuthenticator::new();
        let new = auth
            .create("svc-a", "old", Some(Utc::now() - Duration::seconds(1)))
            .unwrap();

        assert_eq!(
            auth.authenticate(&new.credential.key, &new.secret),
            Err(CredentialError::ExpiredCredential)
        );
    }

    #[test]
    fn deactivated_credential_stops_authenticating() {
        let auth = ApiKeyAuthenticator::new();
        let new = auth.create("svc-a", "primary", None).unwrap();

        assert!(auth.deactivate(&new.credential.key));
        assert_eq!(
            auth.authenticate(&new.credential.key, &new.secret),
            Err(CredentialError::InvalidCredential)
        );
        // Still listed, just inert.
        assert_eq!(auth.len(), 1);
    }
}
