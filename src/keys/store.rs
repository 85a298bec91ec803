//! Signing keypair lifecycle: create once, persist, reload.
//!
//! The keypair is generated on first boot and written as PKCS#1 PEM to the
//! configured path; every later boot loads the same key so that tokens
//! issued before a restart keep verifying. Losing the file invalidates all
//! outstanding tokens, so the path should live on durable storage.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::EncodingKey;
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding},
    rand_core::OsRng,
    traits::PublicKeyParts,
    RsaPrivateKey,
};
use sha2::{Digest, Sha256};

use crate::{Error, Result};

const KEY_BITS: usize = 2048;

/// Holds the service's RSA signing keypair and everything derived from it.
///
/// Construction is fallible and fatal: a service that cannot load or
/// persist its key must not start.
pub struct KeyStore {
    encoding_key: EncodingKey,
    kid: String,
    /// Base64url (unpadded) big-endian modulus, as published in JWKS
    n: String,
    /// Base64url (unpadded) big-endian public exponent
    e: String,
    path: PathBuf,
}

impl KeyStore {
    /// Load the keypair from `path`, generating and persisting a new one
    /// if the file does not exist yet.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        let private_key = if path.exists() {
            let pem = std::fs::read_to_string(path)?;
            RsaPrivateKey::from_pkcs1_pem(&pem)
                .map_err(|e| Error::KeyMaterial(format!("{}: {e}", path.display())))?
        } else {
            let key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
                .map_err(|e| Error::KeyMaterial(format!("keypair generation failed: {e}")))?;
            persist_atomically(path, &key)?;
            tracing::info!(path = %path.display(), "Generated new signing keypair");
            key
        };

        Self::from_private_key(private_key, path.to_path_buf())
    }

    fn from_private_key(private_key: RsaPrivateKey, path: PathBuf) -> Result<Self> {
        let n_bytes = private_key.n().to_bytes_be();
        let e_bytes = private_key.e().to_bytes_be();

        let kid = derive_kid(&n_bytes);
        let n = URL_SAFE_NO_PAD.encode(&n_bytes);
        let e = URL_SAFE_NO_PAD.encode(&e_bytes);

        let pem = private_key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| Error::KeyMaterial(format!("PEM encoding failed: {e}")))?;
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())?;

        Ok(Self {
            encoding_key,
            kid,
            n,
            e,
            path,
        })
    }

    /// Key identifier stamped into token headers and the JWKS document.
    /// Deterministic for a given keypair, so every replica sharing the key
    /// file publishes the same `kid`.
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Signing key handle for the token issuer.
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Public modulus, base64url-encoded without padding.
    pub fn modulus(&self) -> &str {
        &self.n
    }

    /// Public exponent, base64url-encoded without padding.
    pub fn exponent(&self) -> &str {
        &self.e
    }

    /// Where the keypair is persisted.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// First 16 hex chars of SHA-256 over the big-endian modulus.
fn derive_kid(n_bytes: &[u8]) -> String {
    let digest = Sha256::digest(n_bytes);
    hex::encode(digest)[..16].to_string()
}

/// Write the key via a temp file in the same directory, then rename into
/// place. Two replicas racing on first boot both end up reading a complete
/// file; last rename wins and the loser's tokens simply never existed.
fn persist_atomically(path: &Path, key: &RsaPrivateKey) -> Result<()> {
    let pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| Error::KeyMaterial(format!("PEM encoding failed: {e}")))?;

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = dir {
        std::fs::create_dir_all(dir)
            .map_err(|e| Error::KeyPersistence(format!("{}: {e}", dir.display())))?;
    }

    let tmp = path.with_extension("pem.tmp");
    std::fs::write(&tmp, pem.as_bytes())
        .map_err(|e| Error::KeyPersistence(format!("{}: {e}", tmp.display())))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::KeyPersistence(format!("{}: {e}", tmp.display())))?;
    }

    std::fs::rename(&tmp, path)
        .map_err(|e| Error::KeyPersistence(format!("{}: {e}", path.display())))?;

    Ok(())
}
