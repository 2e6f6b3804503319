//! Per-feature request coordination.
//!
//! ```text
//! trigger ──debounce──▶ cache? ──hit──▶ Cached
//!                          │
//!                         miss ──in flight?──yes──▶ join ─┐
//!                                    │                    ├─▶ generation current? ─▶ Fresh | Superseded
//!                                    no ──▶ spawn call ───┘
//! ```
//!
//! Backend calls run as spawned tasks: a dropped or superseded waiter never
//! aborts one, and every successful call populates the cache exactly once.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::backend::BackendError;
use crate::cache::feature_cache::{CacheStats, FeatureCache};
use crate::cache::key::{CacheKey, Feature};
use crate::config::FeatureConfig;
use crate::coordinator::debouncer::Debouncer;
use crate::telemetry::Telemetry;

/// What a trigger or lookup delivers to its consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// Served from cache, no backend call.
    Cached(T),
    /// Produced by a backend call (possibly shared with other waiters).
    Fresh(T),
    /// A newer trigger replaced this one; nothing is delivered.
    Superseded,
    /// The backend failed or had nothing for this context.
    NoData,
}

impl<T> Outcome<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Outcome::Cached(v) | Outcome::Fresh(v) => Some(v),
            Outcome::Superseded | Outcome::NoData => None,
        }
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Outcome::Superseded)
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Outcome::Cached(v) => Outcome::Cached(f(v)),
            Outcome::Fresh(v) => Outcome::Fresh(f(v)),
            Outcome::Superseded => Outcome::Superseded,
            Outcome::NoData => Outcome::NoData,
        }
    }
}

/// Snapshot of one feature's coordination state.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureStats {
    pub feature: Feature,
    pub generation: u64,
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub debounce_ms: u64,
    pub in_flight: usize,
    pub hit_rate: f64,
    pub cache: CacheStats,
}

type Flight<T> = Shared<BoxFuture<'static, Option<T>>>;

pub struct FeatureCoordinator<T> {
    feature: Feature,
    debouncer: Debouncer,
    generation: AtomicU64,
    cache: Arc<Mutex<FeatureCache<T>>>,
    in_flight: Arc<Mutex<HashMap<CacheKey, Flight<T>>>>,
    telemetry: Arc<Telemetry>,
}

impl<T> FeatureCoordinator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(feature: Feature, config: &FeatureConfig, telemetry: Arc<Telemetry>) -> Self {
        Self {
            feature,
            debouncer: Debouncer::new(Duration::from_millis(config.debounce_ms)),
            generation: AtomicU64::new(0),
            cache: Arc::new(Mutex::new(FeatureCache::new(
                config.max_entries,
                Duration::from_secs(config.ttl_secs),
            ))),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            telemetry,
        }
    }

    pub fn feature(&self) -> Feature {
        self.feature
    }

    /// Current generation token.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation() == generation
    }

    /// Handle an editor event for `key`.
    ///
    /// Bumps the generation, waits out the debounce window, then resolves
    /// through cache and single-flight. `fetch` is only invoked if this
    /// trigger ends up issuing the backend call.
    pub async fn trigger<F, Fut>(&self, key: CacheKey, fetch: F) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.debouncer.settle().await {
            self.telemetry.superseded_trigger(self.feature);
            debug!(feature = %self.feature, key = %key, generation, "Trigger superseded in debounce window");
            return Outcome::Superseded;
        }

        self.resolve(key, generation, fetch).await
    }

    /// Resolve `key` immediately, without debounce or a new generation.
    ///
    /// For explicit requests; still deduplicated against in-flight calls and
    /// still superseded by any trigger that arrives before it completes.
    pub async fn lookup<F, Fut>(&self, key: CacheKey, fetch: F) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
    {
        let generation = self.generation();
        self.resolve(key, generation, fetch).await
    }

    async fn resolve<F, Fut>(&self, key: CacheKey, generation: u64, fetch: F) -> Outcome<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
    {
        let flight = {
            let mut in_flight = self.in_flight.lock().await;

            // Checked under the in-flight lock: a call that lands in between
            // has already written the cache before leaving the table.
            if let Some(value) = self.cache.lock().await.get(&key) {
                self.telemetry.cache_hit(self.feature);
                debug!(feature = %self.feature, key = %key, "Cache hit");
                return Outcome::Cached(value);
            }
            self.telemetry.cache_miss(self.feature);

            match in_flight.get(&key).cloned() {
                Some(existing) => {
                    debug!(feature = %self.feature, key = %key, generation, "Joining in-flight request");
                    existing
                }
                None => {
                    let flight = self.launch(key.clone(), generation, fetch());
                    in_flight.insert(key.clone(), flight.clone());
                    flight
                }
            }
        };

        match flight.await {
            None => Outcome::NoData,
            Some(value) if self.is_current(generation) => Outcome::Fresh(value),
            Some(_) => {
                self.telemetry.stale_result(self.feature);
                debug!(
                    feature = %self.feature,
                    key = %key,
                    generation,
                    current = self.generation(),
                    "Stale result cached but not delivered"
                );
                Outcome::Superseded
            }
        }
    }

    fn launch<Fut>(&self, key: CacheKey, generation: u64, request: Fut) -> Flight<T>
    where
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
    {
        let feature = self.feature;
        let cache = Arc::clone(&self.cache);
        let in_flight = Arc::clone(&self.in_flight);
        let telemetry = Arc::clone(&self.telemetry);
        let task_key = key.clone();

        debug!(feature = %feature, key = %key, generation, "Issuing backend request");

        let handle = tokio::spawn(async move {
            let key = task_key;
            let started = Instant::now();
            let result = request.await;
            telemetry.backend_call(feature, started.elapsed());

            let value = match result {
                Ok(value) => {
                    cache.lock().await.set(key.clone(), value.clone());
                    Some(value)
                }
                Err(e) if e.is_no_data() => {
                    telemetry.backend_failure(feature);
                    debug!(feature = %feature, key = %key, "Backend had no data");
                    None
                }
                Err(e) => {
                    telemetry.backend_failure(feature);
                    warn!(feature = %feature, key = %key, error = %e, "Backend request failed");
                    None
                }
            };

            in_flight.lock().await.remove(&key);
            value
        });

        let in_flight = Arc::clone(&self.in_flight);
        async move {
            match handle.await {
                Ok(value) => value,
                Err(e) => {
                    warn!(feature = %feature, key = %key, error = %e, "Backend task aborted");
                    in_flight.lock().await.remove(&key);
                    None
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Cached value for `key`, if fresh. Refreshes recency.
    pub async fn cached(&self, key: &CacheKey) -> Option<T> {
        self.cache.lock().await.get(key)
    }

    /// Drop cached values, cancel the pending trigger and invalidate every
    /// in-flight delivery.
    pub async fn clear(&self) {
        self.cache.lock().await.clear();
        self.debouncer.cancel();
        self.generation.fetch_add(1, Ordering::SeqCst);
        debug!(feature = %self.feature, "Feature cache cleared");
    }

    pub async fn in_flight_count(&self) -> usize {
        self.in_flight.lock().await.len()
    }

    /// Snapshot after dropping expired entries, so `entries` counts live ones.
    pub async fn stats(&self) -> FeatureStats {
        let in_flight = self.in_flight_count().await;
        let mut cache = self.cache.lock().await;
        let purged = cache.purge_expired(Instant::now());
        if purged > 0 {
            debug!(feature = %self.feature, purged, "Purged expired cache entries");
        }
        FeatureStats {
            feature: self.feature,
            generation: self.generation(),
            entries: cache.len(),
            max_entries: cache.max_entries(),
            ttl_secs: cache.ttl().as_secs(),
            debounce_ms: self.debouncer.window().as_millis() as u64,
            in_flight,
            hit_rate: cache.stats().hit_rate(),
            cache: cache.stats().clone(),
        }
    }
}
