//! Prometheus counters for cache and backend behavior, labelled by feature.

use std::time::Duration;

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

use crate::cache::key::Feature;

pub struct Telemetry {
    registry: Registry,
    cache_hits: IntCounterVec,
    cache_misses: IntCounterVec,
    backend_calls: IntCounterVec,
    backend_failures: IntCounterVec,
    stale_results: IntCounterVec,
    superseded_triggers: IntCounterVec,
    backend_latency: HistogramVec,
}

fn counter(registry: &Registry, name: &str, help: &str) -> prometheus::Result<IntCounterVec> {
    let c = IntCounterVec::new(Opts::new(name, help).namespace("hud"), &["feature"])?;
    registry.register(Box::new(c.clone()))?;
    Ok(c)
}

impl Telemetry {
    /// Create a telemetry set on its own registry.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let backend_latency = HistogramVec::new(
            HistogramOpts::new("backend_latency_seconds", "Backend call latency")
                .namespace("hud")
                .buckets(vec![0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["feature"],
        )?;
        registry.register(Box::new(backend_latency.clone()))?;

        Ok(Self {
            cache_hits: counter(&registry, "cache_hits_total", "Lookups served from cache")?,
            cache_misses: counter(&registry, "cache_misses_total", "Lookups not in cache")?,
            backend_calls: counter(&registry, "backend_calls_total", "Backend calls issued")?,
            backend_failures: counter(
                &registry,
                "backend_failures_total",
                "Backend calls that produced no data",
            )?,
            stale_results: counter(
                &registry,
                "stale_results_total",
                "Results cached but not delivered after a newer trigger",
            )?,
            superseded_triggers: counter(
                &registry,
                "superseded_triggers_total",
                "Triggers dropped inside the debounce window",
            )?,
            backend_latency,
            registry,
        })
    }

    pub fn cache_hit(&self, feature: Feature) {
        self.cache_hits.with_label_values(&[feature.tag()]).inc();
    }

    pub fn cache_miss(&self, feature: Feature) {
        self.cache_misses.with_label_values(&[feature.tag()]).inc();
    }

    pub fn backend_call(&self, feature: Feature, elapsed: Duration) {
        self.backend_calls.with_label_values(&[feature.tag()]).inc();
        self.backend_latency
            .with_label_values(&[feature.tag()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn backend_failure(&self, feature: Feature) {
        self.backend_failures.with_label_values(&[feature.tag()]).inc();
    }

    pub fn stale_result(&self, feature: Feature) {
        self.stale_results.with_label_values(&[feature.tag()]).inc();
    }

    pub fn superseded_trigger(&self, feature: Feature) {
        self.superseded_triggers.with_label_values(&[feature.tag()]).inc();
    }

    /// Number of backend calls issued for `feature` so far.
    pub fn backend_calls(&self, feature: Feature) -> u64 {
        self.backend_calls.with_label_values(&[feature.tag()]).get()
    }

    /// Render every metric in the Prometheus text format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
