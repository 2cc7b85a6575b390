//! TTL cache for remote list resources.
//!
//! Entries are stored in a bounded `moka` cache; freshness is decided per
//! entry from the TTL the caller passed when fetching. Concurrent misses on
//! the same key share one in-flight fetch. Invalidating a key also detaches
//! its in-flight fetch, which then never writes the entry.

use crate::errors::AppError;
use futures::future::{BoxFuture, FutureExt, Shared};
use moka::future::Cache;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

type PendingFetch<T> = Shared<BoxFuture<'static, Result<T, AppError>>>;

/// The fetch currently registered for a key. Only the registered fetch may
/// store its result.
struct InFlight<T> {
    id: u64,
    pending: PendingFetch<T>,
}

type InFlightMap<T> = Arc<Mutex<HashMap<String, InFlight<T>>>>;

/// A cached value with the time it was fetched.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            fetched_at: Instant::now(),
            ttl,
        }
    }

    /// Reads at or after `fetched_at + ttl` count as misses.
    pub fn is_live(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Keyed TTL cache with single-flight fetching.
#[derive(Clone)]
pub struct ResourceCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    entries: Cache<String, CacheEntry<T>>,
    in_flight: InFlightMap<T>,
    next_fetch_id: Arc<AtomicU64>,
}

impl<T> ResourceCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a cache holding at most `max_capacity` keys.
    pub fn new(max_capacity: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(max_capacity).build(),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_fetch_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns the cached value for `key`, fetching it when missing or stale.
    ///
    /// A live entry is returned without calling `fetcher` unless
    /// `force_refresh` is set. If a fetch for `key` is already running, the
    /// caller waits for that fetch instead of starting another one. A failed
    /// fetch leaves any existing entry untouched.
    ///
    /// # Arguments
    ///
    /// * `key` - Cache key.
    /// * `fetcher` - Produces the fetch future; only called when a fetch starts.
    /// * `ttl` - Freshness of the value produced by this fetch.
    /// * `force_refresh` - Skip the live-entry check.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: &str,
        fetcher: F,
        ttl: Duration,
        force_refresh: bool,
    ) -> Result<T, AppError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
    {
        if !force_refresh {
            if let Some(value) = self.live_value(key).await {
                tracing::debug!("Cache HIT for '{}'", key);
                return Ok(value);
            }
        }

        let pending = {
            let mut in_flight = self.in_flight.lock().await;

            if let Some(current) = in_flight.get(key) {
                tracing::debug!("Joining in-flight fetch for '{}'", key);
                current.pending.clone()
            } else {
                // Another caller may have finished a fetch while we waited for the lock
                if !force_refresh {
                    if let Some(value) = self.live_value(key).await {
                        return Ok(value);
                    }
                }

                tracing::info!("Cache MISS for '{}', fetching", key);
                let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
                let pending = self.start_fetch(key.to_string(), id, fetcher(), ttl);
                in_flight.insert(
                    key.to_string(),
                    InFlight {
                        id,
                        pending: pending.clone(),
                    },
                );
                pending
            }
        };

        pending.await
    }

    /// Removes the entry for `key` unconditionally.
    ///
    /// A fetch already in flight for `key` is detached: callers that joined
    /// it still get its result, but it never writes the entry, and the next
    /// read starts a new fetch.
    pub async fn invalidate(&self, key: &str) {
        tracing::debug!("Invalidating cache entry '{}'", key);
        let mut in_flight = self.in_flight.lock().await;
        in_flight.remove(key);
        self.entries.invalidate(key).await;
    }

    /// Returns the stored entry, live or not.
    pub async fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries.get(key).await
    }

    async fn live_value(&self, key: &str) -> Option<T> {
        self.entries
            .get(key)
            .await
            .filter(CacheEntry::is_live)
            .map(|entry| entry.value)
    }

    fn start_fetch<Fut>(&self, key: String, id: u64, fetch: Fut, ttl: Duration) -> PendingFetch<T>
    where
        Fut: Future<Output = Result<T, AppError>> + Send + 'static,
    {
        let entries = self.entries.clone();
        let in_flight = Arc::clone(&self.in_flight);

        async move {
            let result = fetch.await;

            let mut in_flight = in_flight.lock().await;
            if in_flight.get(&key).map(|current| current.id) != Some(id) {
                tracing::debug!("Fetch for '{}' was invalidated, discarding its result", key);
                return result;
            }
            in_flight.remove(&key);

            match &result {
                Ok(value) => {
                    entries
                        .insert(key.clone(), CacheEntry::new(value.clone(), ttl))
                        .await;
                }
                Err(err) => {
                    tracing::warn!("Fetch for '{}' failed, keeping existing entry: {}", key, err);
                }
            }
            result
        }
        .boxed()
        .shared()
    }
}
