//! Background refresh and single-flight on-demand fetch of the
//! authority's JWKS document.
//!
//! Two paths feed the cache: a periodic loop, and a coalesced on-demand
//! fetch taken when validation meets a `kid` the cache doesn't know.
//! Both go through one mutex; a generation counter lets waiters detect
//! that somebody else already fetched while they queued, so a burst of
//! cache misses costs exactly one HTTP round trip.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, Mutex};

use super::cache::JwksKeyCache;
use super::jwks::{Jwk, JwksDocument};
use crate::{Error, Result};

/// Keeps the consumer-side key cache populated.
pub struct JwksRefreshService {
    http: reqwest::Client,
    authority_url: String,
    cache: Box<dyn JwksKeyCache>,
    refresh_interval: Duration,
    fetch_lock: Mutex<()>,
    /// Bumped after every successful store; waiters compare against their
    /// pre-lock snapshot to detect a fetch that happened while they queued.
    generation: AtomicU64,
    fetches: AtomicU64,
}

impl JwksRefreshService {
    /// Build a refresh service over the given cache backend.
    pub fn new(
        authority_url: String,
        cache: Box<dyn JwksKeyCache>,
        refresh_interval: Duration,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(fetch_timeout)
            .build()?;
        Ok(Self {
            http,
            authority_url,
            cache,
            refresh_interval,
            fetch_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        })
    }

    /// Periodic refresh loop. Fetch failures are logged and the loop
    /// continues; the cache keeps whatever it last stored.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.refresh_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.refresh_now().await {
                        tracing::warn!("JWKS refresh failed, keeping cached keys: {e}");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("JWKS refresh loop shutting down");
                    break;
                }
            }
        }
    }

    /// Fetch the document and replace the cache. Serialized with the
    /// on-demand path through the same lock.
    pub async fn refresh_now(&self) -> Result<()> {
        let _guard = self.fetch_lock.lock().await;
        self.fetch_and_store().await
    }

    /// Resolve a verification key, fetching on a cache miss.
    ///
    /// `Ok(None)` means the authority genuinely does not publish this
    /// `kid`; an `Err` means the cache missed and the fetch failed.
    pub async fn resolve_key(&self, kid: &str) -> Result<Option<Jwk>> {
        if let Some(key) = self.cache.get(kid).await? {
            return Ok(Some(key));
        }

        let seen = self.generation.load(Ordering::Acquire);
        let _guard = self.fetch_lock.lock().await;

        // Someone fetched while we waited for the lock; their result
        // answers us either way. A miss against the refreshed set means
        // the authority does not publish this kid, so refetching would
        // just hammer it once per waiter.
        if self.generation.load(Ordering::Acquire) != seen {
            return self.cache.get(kid).await;
        }

        self.fetch_and_store().await?;
        self.cache.get(kid).await
    }

    async fn fetch_and_store(&self) -> Result<()> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let doc: JwksDocument = self
            .http
            .get(&self.authority_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if doc.keys.is_empty() {
            return Err(Error::Internal(format!(
                "authority {} published an empty key set",
                self.authority_url
            )));
        }

        let count = doc.keys.len();
        self.cache.store(doc.keys).await?;
        self.generation.fetch_add(1, Ordering::Release);
        tracing::debug!(count, "Stored refreshed JWKS key set");
        Ok(())
    }

    /// Number of HTTP fetches performed so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}
