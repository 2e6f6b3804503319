//! Request coordination across the four analytic features.
//!
//! - [`debouncer`]: trailing-edge debounce window
//! - [`feature`]: cache + single-flight + generation checks for one feature
//!
//! [`Coordinator`] owns one [`FeatureCoordinator`] per feature. Features share
//! nothing but the backend handle and the telemetry registry.

pub mod debouncer;
pub mod feature;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::types::{
    AutopanicResponse, EntropyResponse, GhostResponse, PrefixRequest, RanksRequest, RanksResponse,
    SaliencyRequest, SaliencyResponse,
};
use crate::backend::Backend;
use crate::cache::key::{CacheKey, Feature};
use crate::config::FeaturesConfig;
use crate::telemetry::Telemetry;

pub use feature::{FeatureCoordinator, FeatureStats, Outcome};

/// An explicit metrics request, tagged by feature.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "feature", rename_all = "lowercase")]
pub enum MetricsRequest {
    Entropy(PrefixRequest),
    Ghost(PrefixRequest),
    Autopanic(PrefixRequest),
    Saliency(SaliencyRequest),
}

impl MetricsRequest {
    pub fn feature(&self) -> Feature {
        match self {
            MetricsRequest::Entropy(_) => Feature::Entropy,
            MetricsRequest::Ghost(_) => Feature::Ghost,
            MetricsRequest::Autopanic(_) => Feature::Autopanic,
            MetricsRequest::Saliency(_) => Feature::Saliency,
        }
    }

    pub fn cache_key(&self) -> CacheKey {
        match self {
            MetricsRequest::Entropy(r) | MetricsRequest::Ghost(r) | MetricsRequest::Autopanic(r) => {
                CacheKey::for_prefix(self.feature(), &r.prefix)
            }
            MetricsRequest::Saliency(r) => {
                CacheKey::for_cursor(Feature::Saliency, &r.code, r.cursor_line, r.cursor_char)
            }
        }
    }
}

/// A delivered metrics value, tagged by feature.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "feature", content = "data", rename_all = "lowercase")]
pub enum Metrics {
    Entropy(EntropyResponse),
    Ghost(GhostResponse),
    Autopanic(AutopanicResponse),
    Saliency(SaliencyResponse),
}

impl Metrics {
    pub fn feature(&self) -> Feature {
        match self {
            Metrics::Entropy(_) => Feature::Entropy,
            Metrics::Ghost(_) => Feature::Ghost,
            Metrics::Autopanic(_) => Feature::Autopanic,
            Metrics::Saliency(_) => Feature::Saliency,
        }
    }
}

pub struct Coordinator {
    backend: Arc<dyn Backend>,
    entropy: FeatureCoordinator<EntropyResponse>,
    ghost: FeatureCoordinator<GhostResponse>,
    autopanic: FeatureCoordinator<AutopanicResponse>,
    saliency: FeatureCoordinator<SaliencyResponse>,
}

impl Coordinator {
    pub fn new(backend: Arc<dyn Backend>, features: &FeaturesConfig, telemetry: Arc<Telemetry>) -> Self {
        Self {
            backend,
            entropy: FeatureCoordinator::new(Feature::Entropy, &features.entropy, telemetry.clone()),
            ghost: FeatureCoordinator::new(Feature::Ghost, &features.ghost, telemetry.clone()),
            autopanic: FeatureCoordinator::new(
                Feature::Autopanic,
                &features.autopanic,
                telemetry.clone(),
            ),
            saliency: FeatureCoordinator::new(Feature::Saliency, &features.saliency, telemetry),
        }
    }

    // ─── Debounced triggers (editor events) ───────────────────────────────

    pub async fn entropy(&self, request: PrefixRequest) -> Outcome<EntropyResponse> {
        let key = CacheKey::for_prefix(Feature::Entropy, &request.prefix);
        let backend = self.backend.clone();
        self.entropy
            .trigger(key, move || async move { backend.entropy(&request).await })
            .await
    }

    pub async fn ghost(&self, request: PrefixRequest) -> Outcome<GhostResponse> {
        let key = CacheKey::for_prefix(Feature::Ghost, &request.prefix);
        let backend = self.backend.clone();
        self.ghost
            .trigger(key, move || async move { backend.ghost(&request).await })
            .await
    }

    pub async fn autopanic(&self, request: PrefixRequest) -> Outcome<AutopanicResponse> {
        let key = CacheKey::for_prefix(Feature::Autopanic, &request.prefix);
        let backend = self.backend.clone();
        self.autopanic
            .trigger(key, move || async move { backend.autopanic(&request).await })
            .await
    }

    pub async fn saliency(&self, request: SaliencyRequest) -> Outcome<SaliencyResponse> {
        let key = CacheKey::for_cursor(
            Feature::Saliency,
            &request.code,
            request.cursor_line,
            request.cursor_char,
        );
        let backend = self.backend.clone();
        self.saliency
            .trigger(key, move || async move { backend.saliency(&request).await })
            .await
    }

    // ─── Consumer surface ─────────────────────────────────────────────────

    /// Cached-or-fresh metrics for an explicit request, without debounce.
    pub async fn get_metrics(&self, request: MetricsRequest) -> Option<Metrics> {
        let key = request.cache_key();
        let backend = self.backend.clone();

        let outcome = match request {
            MetricsRequest::Entropy(r) => self
                .entropy
                .lookup(key, move || async move { backend.entropy(&r).await })
                .await
                .map(Metrics::Entropy),
            MetricsRequest::Ghost(r) => self
                .ghost
                .lookup(key, move || async move { backend.ghost(&r).await })
                .await
                .map(Metrics::Ghost),
            MetricsRequest::Autopanic(r) => self
                .autopanic
                .lookup(key, move || async move { backend.autopanic(&r).await })
                .await
                .map(Metrics::Autopanic),
            MetricsRequest::Saliency(r) => self
                .saliency
                .lookup(key, move || async move { backend.saliency(&r).await })
                .await
                .map(Metrics::Saliency),
        };

        outcome.into_value()
    }

    /// Cached value for `key` in `feature`'s cache, if present and fresh.
    pub async fn cached(&self, feature: Feature, key: &CacheKey) -> Option<Metrics> {
        match feature {
            Feature::Entropy => self.entropy.cached(key).await.map(Metrics::Entropy),
            Feature::Ghost => self.ghost.cached(key).await.map(Metrics::Ghost),
            Feature::Autopanic => self.autopanic.cached(key).await.map(Metrics::Autopanic),
            Feature::Saliency => self.saliency.cached(key).await.map(Metrics::Saliency),
        }
    }

    /// Per-token ranks of a whole document. Issued directly: ranking is an
    /// on-demand pass over the file, not a keystroke-driven feature.
    pub async fn token_ranks(&self, request: RanksRequest) -> Option<RanksResponse> {
        match self.backend.ranks(&request).await {
            Ok(ranks) => Some(ranks),
            Err(e) if e.is_no_data() => None,
            Err(e) => {
                warn!(uri = request.uri, error = %e, "Token ranking failed");
                None
            }
        }
    }

    /// Empty every cache, cancel pending triggers and invalidate in-flight deliveries.
    pub async fn clear_all(&self) {
        self.entropy.clear().await;
        self.ghost.clear().await;
        self.autopanic.clear().await;
        self.saliency.clear().await;
        info!("All feature caches cleared");
    }

    pub async fn stats(&self) -> Vec<FeatureStats> {
        vec![
            self.entropy.stats().await,
            self.ghost.stats().await,
            self.autopanic.stats().await,
            self.saliency.stats().await,
        ]
    }
}
