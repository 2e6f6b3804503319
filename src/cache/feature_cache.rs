//! Bounded TTL + LRU cache for one analytic feature.
//!
//! Recency is a strictly increasing counter, so the eviction order is total:
//! the entry least recently returned by `get` (or inserted, if never read)
//! goes first. Reads refresh recency but not the insertion timestamp, so a
//! hot entry still expires `ttl` after it was written.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::trace;

use crate::cache::key::CacheKey;

#[derive(Debug)]
struct CacheEntry<T> {
    value: T,
    inserted_at: Instant,
    /// Position in the recency index.
    recency: u64,
}

/// Hit/miss accounting for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    /// Hits as a fraction of lookups (0.0 when there were none).
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 / lookups as f64
    }
}

/// Per-feature cache. Invariant: `len() <= max_entries()`.
#[derive(Debug)]
pub struct FeatureCache<T> {
    max_entries: usize,
    ttl: Duration,
    entries: HashMap<CacheKey, CacheEntry<T>>,
    /// recency tick → key, oldest first.
    recency: BTreeMap<u64, CacheKey>,
    next_tick: u64,
    stats: CacheStats,
}

impl<T: Clone> FeatureCache<T> {
    /// Create a cache holding at most `max_entries` (minimum 1) for `ttl`.
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries: max_entries.max(1),
            ttl,
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            stats: CacheStats::default(),
        }
    }

    fn tick(&mut self) -> u64 {
        let t = self.next_tick;
        self.next_tick += 1;
        t
    }

    fn is_expired(&self, inserted_at: Instant, now: Instant) -> bool {
        now.saturating_duration_since(inserted_at) > self.ttl
    }

    /// Look up `key` at the current time.
    pub fn get(&mut self, key: &CacheKey) -> Option<T> {
        self.get_at(key, Instant::now())
    }

    /// Look up `key` as of `now`. Expired entries are removed and miss.
    pub fn get_at(&mut self, key: &CacheKey, now: Instant) -> Option<T> {
        let Some(entry) = self.entries.get(key) else {
            self.stats.misses += 1;
            return None;
        };

        if self.is_expired(entry.inserted_at, now) {
            self.remove(key);
            self.stats.expirations += 1;
            self.stats.misses += 1;
            trace!(key = %key, "Cache entry expired");
            return None;
        }

        let tick = self.tick();
        let entry = self.entries.get_mut(key)?;
        self.recency.remove(&entry.recency);
        entry.recency = tick;
        self.recency.insert(tick, key.clone());
        self.stats.hits += 1;

        Some(entry.value.clone())
    }

    /// Insert or overwrite `key` at the current time.
    pub fn set(&mut self, key: CacheKey, value: T) {
        self.set_at(key, value, Instant::now());
    }

    /// Insert or overwrite `key` as of `now`.
    ///
    /// Overwriting refreshes value, timestamp and recency. Inserting a new key
    /// into a full cache first evicts the least-recently-used entry.
    pub fn set_at(&mut self, key: CacheKey, value: T, now: Instant) {
        let tick = self.tick();

        if let Some(entry) = self.entries.get_mut(&key) {
            self.recency.remove(&entry.recency);
            entry.value = value;
            entry.inserted_at = now;
            entry.recency = tick;
            self.recency.insert(tick, key);
            self.stats.insertions += 1;
            return;
        }

        if self.entries.len() >= self.max_entries {
            self.evict_lru();
        }

        self.recency.insert(tick, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                recency: tick,
            },
        );
        self.stats.insertions += 1;
    }

    fn evict_lru(&mut self) {
        if let Some((_, key)) = self.recency.pop_first() {
            self.entries.remove(&key);
            self.stats.evictions += 1;
            trace!(key = %key, "Evicted LRU cache entry");
        }
    }

    fn remove(&mut self, key: &CacheKey) -> Option<T> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.recency);
        Some(entry.value)
    }

    /// Drop every expired entry. Returns the number removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|(_, e)| self.is_expired(e.inserted_at, now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.stats.expirations += expired.len() as u64;
        expired.len()
    }

    /// Drop all entries unconditionally.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
