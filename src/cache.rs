//! Secret cache with TTL expiry and LRU capacity
//!
//! Maps a secret path to its decrypted key/value payload. Lookups of live
//! entries never touch the network. A miss takes the single process-wide
//! guard for the whole authenticate-then-fetch sequence, so concurrent
//! misses never log in twice; the path is checked again once the guard is
//! held, so callers queued behind a fetch for the same path reuse its
//! result.
//!
//! Entries are replaced, never edited: an entry older than the TTL counts as
//! absent, and inserting past capacity evicts the least recently used.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::auth::Authenticator;
use crate::config::CacheConfig;
use crate::vault::{SecretPayload, VaultApi};
use crate::{Error, Result};

/// Thread-safe secret cache backed by Vault
pub struct SecretCache {
    /// Cache entries keyed by secret path
    entries: DashMap<String, CachedSecret>,
    /// Cache statistics
    stats: CacheStats,
    /// Time-to-live of an entry
    ttl: Duration,
    /// Capacity before LRU eviction
    max_entries: usize,
    /// Monotonic access counter for LRU ordering
    tick: AtomicU64,
    /// Serializes authenticate-then-fetch sequences
    guard: Mutex<()>,
    authenticator: Arc<Authenticator>,
    backend: Arc<dyn VaultApi>,
    mount_point: String,
}

/// A cached payload with TTL metadata
struct CachedSecret {
    /// The decrypted payload
    payload: Arc<SecretPayload>,
    /// When this entry was inserted
    inserted_at: Instant,
    /// Tick of the most recent read
    last_used: AtomicU64,
}

impl CachedSecret {
    /// Check if this entry has expired
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() >= ttl
    }
}

/// Cache statistics tracked atomically
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Lookups served from cache
    pub hits: AtomicU64,
    /// Lookups that found no live entry
    pub misses: AtomicU64,
    /// Entries removed by expiry or capacity pressure
    pub evictions: AtomicU64,
}

impl CacheStats {
    /// Get current cache hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get current cache miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get current eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit rate as a percentage (0.0-1.0)
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

impl SecretCache {
    /// Create a cache in front of `backend`
    #[must_use]
    pub fn new(
        config: &CacheConfig,
        mount_point: impl Into<String>,
        authenticator: Arc<Authenticator>,
        backend: Arc<dyn VaultApi>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            stats: CacheStats::default(),
            ttl: config.ttl,
            max_entries: config.max_entries.max(1),
            tick: AtomicU64::new(0),
            guard: Mutex::new(()),
            authenticator,
            backend,
            mount_point: mount_point.into(),
        }
    }

    /// Authenticate under the cache guard
    pub async fn authenticate(&self) -> Result<String> {
        let _guard = self.guard.lock().await;
        self.authenticator.authenticate().await
    }

    /// Fetch a secret payload, or one key of it
    ///
    /// An empty `key` is treated as no key.
    pub async fn fetch_secret(&self, path: &str, key: Option<&str>) -> Result<Value> {
        let payload = match self.get(path) {
            Some(payload) => payload,
            None => self.fetch_and_store(path).await?,
        };

        match key.filter(|k| !k.is_empty()) {
            None => Ok(Value::Object((*payload).clone())),
            Some(key) => payload
                .get(key)
                .cloned()
                .ok_or_else(|| Error::SecretKeyNotFound {
                    path: path.to_string(),
                    key: key.to_string(),
                }),
        }
    }

    async fn fetch_and_store(&self, path: &str) -> Result<Arc<SecretPayload>> {
        let _guard = self.guard.lock().await;

        // Another caller may have fetched it while we waited
        if let Some(payload) = self.peek(path) {
            return Ok(payload);
        }

        let token = self.authenticator.authenticate().await?;
        debug!(%path, mount = %self.mount_point, "Fetching secret from Vault");
        let payload = Arc::new(
            self.backend
                .read_secret(&token, path, &self.mount_point)
                .await?,
        );
        self.insert(path, Arc::clone(&payload));
        Ok(payload)
    }

    /// Get a live entry, counting the hit or miss
    fn get(&self, path: &str) -> Option<Arc<SecretPayload>> {
        let found = self.peek(path);
        let counter = if found.is_some() {
            &self.stats.hits
        } else {
            &self.stats.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Get a live entry without touching the hit/miss counters
    ///
    /// Returns `None` if the path isn't cached or the entry has expired.
    /// Expired entries are evicted.
    fn peek(&self, path: &str) -> Option<Arc<SecretPayload>> {
        let entry = self.entries.get(path)?;
        if entry.is_expired(self.ttl) {
            drop(entry);
            let ttl = self.ttl;
            if self.entries.remove_if(path, |_, e| e.is_expired(ttl)).is_some() {
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
            }
            return None;
        }

        entry
            .last_used
            .store(self.next_tick(), Ordering::Relaxed);
        Some(Arc::clone(&entry.payload))
    }

    /// Store a payload, evicting to stay within capacity. Called under the guard.
    fn insert(&self, path: &str, payload: Arc<SecretPayload>) {
        if !self.entries.contains_key(path) {
            while self.entries.len() >= self.max_entries {
                if !self.evict_one() {
                    break;
                }
            }
        }

        self.entries.insert(
            path.to_string(),
            CachedSecret {
                payload,
                inserted_at: Instant::now(),
                last_used: AtomicU64::new(self.next_tick()),
            },
        );
    }

    /// Evict expired entries, or else the least recently used one
    fn evict_one(&self) -> bool {
        if self.evict_expired() > 0 {
            return true;
        }

        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().last_used.load(Ordering::Relaxed))
            .map(|entry| entry.key().clone());

        match victim {
            Some(path) => {
                self.entries.remove(&path);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(%path, "Evicted least recently used secret");
                true
            }
            None => false,
        }
    }

    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// Drop the entry for `path`
    pub fn invalidate(&self, path: &str) -> bool {
        self.entries.remove(path).is_some()
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        self.entries.clear();
        info!("Secret cache cleared");
    }

    /// Evict expired entries (background maintenance). Returns the count.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries.retain(|_, entry| !entry.is_expired(ttl));
        let count = before.saturating_sub(self.entries.len());

        if count > 0 {
            self.stats
                .evictions
                .fetch_add(count as u64, Ordering::Relaxed);
        }
        count
    }

    /// Time-to-live of an entry
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            evictions: self.stats.evictions(),
            size: self.entries.len(),
            hit_rate: self.stats.hit_rate(),
        }
    }
}

/// Snapshot of cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Total evictions
    pub evictions: u64,
    /// Current number of entries
    pub size: usize,
    /// Hit rate (0.0-1.0)
    pub hit_rate: f64,
}
