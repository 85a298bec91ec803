//! Token revocation by `jti`.
//!
//! A revoked entry only needs to outlive the token it kills: once the
//! token's own `exp` passes, ordinary validation rejects it anyway, so
//! entries are stored with the token's natural expiry and reaped after.

use chrono::{DateTime, Utc};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;
use tokio::sync::broadcast;

use crate::Result;

/// Revocation backend. Memory is per-instance; Redis makes a revocation
/// visible to every replica immediately.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Revoke a token until its natural expiry. Revoking an already
    /// revoked or already expired token is a no-op, not an error.
    async fn revoke(&self, jti: &str, natural_expiry: DateTime<Utc>) -> Result<()>;

    /// Is this `jti` currently revoked?
    async fn is_revoked(&self, jti: &str) -> Result<bool>;
}

/// Process-local revocation store.
///
/// Expired entries are dropped lazily on lookup and swept by a periodic
/// reaper so a long-lived process doesn't accumulate dead entries for
/// tokens nobody checks again.
#[derive(Default)]
pub struct MemoryRevocationStore {
    entries: DashMap<String, DateTime<Utc>>,
}

impl MemoryRevocationStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove entries whose token has already expired.
    /// Returns the number of entries removed.
    pub fn reap_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, expiry| *expiry > now);
        before - self.entries.len()
    }

    /// Periodic reap loop, run as a background task.
    pub async fn run_reaper(
        &self,
        interval: std::time::Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.reap_expired();
                    if removed > 0 {
                        tracing::debug!(removed, "Reaped expired revocation entries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Revocation reaper shutting down");
                    break;
                }
            }
        }
    }

    /// Number of live entries (test hook).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl RevocationStore for MemoryRevocationStore {
    async fn revoke(&self, jti: &str, natural_expiry: DateTime<Utc>) -> Result<()> {
        if natural_expiry <= Utc::now() {
            // Already dead by expiry; nothing to remember.
            return Ok(());
        }
        self.entries.insert(jti.to_string(), natural_expiry);
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool> {
        if let Some(entry) = self.entries.get(jti) {
            if *entry.value() > Utc::now() {
                return Ok(true);
            }
            drop(entry);
            // Lazy eviction; the reaper would get it eventually.
            self.entries.remove(jti);
        }
        Ok(false)
    }
}

const REDIS_PREFIX: &str = "keyfabric:revoked:";

/// Redis-backed revocation store. Entries carry a server-side TTL equal
/// to the token's remaining lifetime, so Redis does the reaping.
pub struct RedisRevocationStore {
    client: redis::Client,
}

impl RedisRevocationStore {
    /// Connect lazily to Redis at `url`.
    pub fn new(url: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(url)?,
        })
    }
}

#[async_trait]
impl RevocationStore for RedisRevocationStore {
    async fn revoke(&self, jti: &str, natural_expiry: DateTime<Utc>) -> Result<()> {
        let remaining = (natural_expiry - Utc::now()).num_seconds();
        if remaining <= 0 {
            return Ok(());
        }
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        #[allow(clippy::cast_sign_loss)]
        conn.set_ex::<_, _, ()>(format!("{REDIS_PREFIX}{jti}"), 1u8, remaining as u64)
            .await?;
        Ok(())
    }

    async fn is_revoked(&self, jti: &str) -> Result<bool> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let exists: bool = conn.exists(format!("{REDIS_PREFIX}{jti}")).await?;
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn revoked_until_natural_expiry() {
        let store = MemoryRevocationStore::new();
        store
            .revoke("t1", Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        assert!(store.is_revoked("t1").await.unwrap());
        assert!(!store.is_revoked("other").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entry_reads_as_not_revoked() {
        let store = MemoryRevocationStore::new();
        store
            .revoke("t1", Utc::now() + Duration::milliseconds(20))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert!(!store.is_revoked("t1").await.unwrap());
        // Lazy eviction dropped it too.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn revoking_already_expired_token_is_noop() {
        let store = MemoryRevocationStore::new();
        store
            .revoke("dead", Utc::now() - Duration::seconds(5))
            .await
            .unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn reaper_sweeps_expired_entries() {
        let store = MemoryRevocationStore::new();
        store
            .revoke("short", Utc::now() + Duration::milliseconds(10))
            .await
            .unwrap();
        store
            .revoke("long", Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert_eq!(store.reap_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.is_revoked("long").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires a local redis"]
    async fn redis_backend_round_trip() {
        let store = RedisRevocationStore::new("redis://127.0.0.1/").unwrap();
        let jti = uuid::Uuid::new_v4().to_string();
        store
            .revoke(&jti, Utc::now() + Duration::minutes(1))
            .await
            .unwrap();
        assert!(store.is_revoked(&jti).await.unwrap());
    }
}
