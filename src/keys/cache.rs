//! Consumer-side verification-key cache.
//!
//! The cache always holds a complete key set and is replaced wholesale: a
//! reader either sees the previous set or the new one, never a torn mix.
//! TTL expiry only signals staleness to the refresh machinery; a fetch
//! failure never empties the cache (see [`super::refresh`]).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;

use super::jwks::Jwk;
use crate::Result;

/// A fetched key set with its freshness bookkeeping.
#[derive(Debug, Clone)]
pub struct CachedKeySet {
    /// The published verification keys
    pub keys: Vec<Jwk>,
    /// When this set was stored
    pub fetched_at: Instant,
}

/// Storage abstraction behind the key cache.
///
/// Memory is the default; Redis lets replicas share one fetched copy and
/// survive restarts without hammering the authority.
#[async_trait]
pub trait JwksKeyCache: Send + Sync {
    /// Look up a single key by `kid`. `None` means unknown or expired.
    async fn get(&self, kid: &str) -> Result<Option<Jwk>>;

    /// The full cached set, empty when nothing (fresh) is cached.
    async fn all(&self) -> Result<Vec<Jwk>>;

    /// Replace the cached set atomically.
    async fn store(&self, keys: Vec<Jwk>) -> Result<()>;

    /// Drop the cached set. Only for operator-driven resets; the refresh
    /// path never calls this.
    async fn invalidate(&self) -> Result<()>;
}

/// Process-local cache backend.
pub struct MemoryKeyCache {
    inner: RwLock<Option<Arc<CachedKeySet>>>,
    ttl: Duration,
}

impl MemoryKeyCache {
    /// Create a memory cache with the given entry TTL.
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(None),
            ttl,
        }
    }

    fn fresh_set(&self) -> Option<Arc<CachedKeySet>> {
        let guard = self.inner.read();
        guard
            .as_ref()
            .filter(|set| set.fetched_at.elapsed() < self.ttl)
            .cloned()
    }
}

#[async_trait]
impl JwksKeyCache for MemoryKeyCache {
    async fn get(&self, kid: &str) -> Result<Option<Jwk>> {
        Ok(self
            .fresh_set()
            .and_then(|set| set.keys.iter().find(|k| k.kid == kid).cloned()))
    }

    async fn all(&self) -> Result<Vec<Jwk>> {
        Ok(self.fresh_set().map(|set| set.keys.clone()).unwrap_or_default())
    }

    async fn store(&self, keys: Vec<Jwk>) -> Result<()> {
        let set = Arc::new(CachedKeySet {
            keys,
            fetched_at: Instant::now(),
        });
        *self.inner.write() = Some(set);
        Ok(())
    }

    async fn invalidate(&self) -> Result<()> {
        *self.inner.write() = None;
        Ok(())
    }
}

const REDIS_KEY: &str = "keyfabric:jwks";

/// Redis-backed cache backend. The whole set lives under one key written
/// with `SET .. EX`, so replacement stays atomic and TTL is server-side.
pub struct RedisKeyCache {
    client: redis::Client,
    ttl_secs: u64,
}

impl RedisKeyCache {
    /// Connect lazily to Redis at `url`.
    pub fn new(url: &str, ttl: Duration) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            ttl_secs: ttl.as_secs().max(1),
        })
    }

    async fn load(&self) -> Result<Option<Vec<Jwk>>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(REDIS_KEY).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl JwksKeyCache for RedisKeyCache {
    async fn get(&self, kid: &str) -> Result<Option<Jwk>> {
        Ok(self
            .load()
            .await?
            .and_then(|keys| keys.into_iter().find(|k| k.kid == kid)))
    }

    async fn all(&self) -> Result<Vec<Jwk>> {
        Ok(self.load().await?.unwrap_or_default())
    }

    async fn store(&self, keys: Vec<Jwk>) -> Result<()> {
        let json = serde_json::to_string(&keys)?;
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.set_ex::<_, _, ()>(REDIS_KEY, json, self.ttl_secs).await?;
        Ok(())
    }

    async fn invalidate(&self) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.del::<_, ()>(REDIS_KEY).await?;
        Ok(())
    }
}
