//! Integration tests for debounce, single-flight and staleness handling.
//!
//! All tests run on a paused clock, so timings are exact and instant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use hud_signals::analytics::probability::TokenLogprob;
use hud_signals::backend::types::{
    AutopanicResponse, EntropyResponse, GhostResponse, PrefixRequest, SaliencyRequest,
    SaliencyResponse,
};
use hud_signals::backend::{Backend, BackendError};
use hud_signals::cache::key::{CacheKey, Feature};
use hud_signals::config::FeaturesConfig;
use hud_signals::coordinator::{Coordinator, Metrics, MetricsRequest, Outcome};
use hud_signals::telemetry::Telemetry;

/// Backend with fixed latency that records when each call arrives.
struct Scripted {
    latency: Duration,
    calls: AtomicUsize,
    arrivals: Mutex<Vec<(Instant, String)>>,
    failing_prefix: Option<&'static str>,
}

impl Scripted {
    fn build(latency_ms: u64, failing_prefix: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            latency: Duration::from_millis(latency_ms),
            calls: AtomicUsize::new(0),
            arrivals: Mutex::new(Vec::new()),
            failing_prefix,
        })
    }

    fn new(latency_ms: u64) -> Arc<Self> {
        Self::build(latency_ms, None)
    }

    fn failing_on(latency_ms: u64, prefix: &'static str) -> Arc<Self> {
        Self::build(latency_ms, Some(prefix))
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn arrivals(&self) -> Vec<(Instant, String)> {
        self.arrivals.lock().unwrap().clone()
    }

    async fn arrive(&self, what: &str) -> Result<(), BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.arrivals
            .lock()
            .unwrap()
            .push((Instant::now(), what.to_string()));
        sleep(self.latency).await;
        if self.failing_prefix == Some(what) {
            return Err(BackendError::Status {
                status: 500,
                body: "boom".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Backend for Scripted {
    async fn entropy(&self, request: &PrefixRequest) -> Result<EntropyResponse, BackendError> {
        self.arrive(&request.prefix).await?;
        Ok(EntropyResponse {
            entropy: request.prefix.len() as f64,
            max_logprob: -0.5,
            top_logprobs: vec![TokenLogprob::new("x", -0.5)],
            token_count: 1,
        })
    }

    async fn ghost(&self, request: &PrefixRequest) -> Result<GhostResponse, BackendError> {
        self.arrive(&request.prefix).await?;
        Ok(GhostResponse {
            primary: TokenLogprob::new("a", -0.6),
            secondary: TokenLogprob::new("b", -0.8),
            margin: 0.1,
            should_show_ghost: true,
        })
    }

    async fn autopanic(&self, request: &PrefixRequest) -> Result<AutopanicResponse, BackendError> {
        self.arrive(&request.prefix).await?;
        Err(BackendError::NoData)
    }

    async fn saliency(&self, request: &SaliencyRequest) -> Result<SaliencyResponse, BackendError> {
        self.arrive(&request.code).await?;
        Ok(SaliencyResponse {
            tokens: Vec::new(),
            base_entropy: 1.0,
        })
    }
}

fn setup(backend: Arc<Scripted>) -> (Arc<Coordinator>, Arc<Telemetry>) {
    let telemetry = Arc::new(Telemetry::new().unwrap());
    let coordinator = Coordinator::new(backend, &FeaturesConfig::default(), telemetry.clone());
    (Arc::new(coordinator), telemetry)
}

fn entropy_request(prefix: &str) -> PrefixRequest {
    PrefixRequest::new(prefix, "file:///demo.py")
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_lookups_share_one_call() {
    let backend = Scripted::new(200);
    let (coordinator, telemetry) = setup(backend.clone());

    let request = MetricsRequest::Entropy(entropy_request("def handler(event):"));
    let (a, b) = tokio::join!(
        coordinator.get_metrics(request.clone()),
        coordinator.get_metrics(request.clone()),
    );

    assert_eq!(backend.calls(), 1);
    assert_eq!(telemetry.backend_calls(Feature::Entropy), 1);
    assert!(matches!(a, Some(Metrics::Entropy(_))));
    assert_eq!(a, b);

    // The single call populated the cache once; a third lookup is served from it.
    let c = coordinator.get_metrics(request).await;
    assert_eq!(c, a);
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_triggers_fires_once_after_last() {
    let backend = Scripted::new(10);
    let (coordinator, telemetry) = setup(backend.clone());
    let start = Instant::now();

    let mut handles = Vec::new();
    for (i, prefix) in ["d", "de", "def", "def "].iter().enumerate() {
        if i > 0 {
            sleep(Duration::from_millis(30)).await;
        }
        let c = coordinator.clone();
        let request = entropy_request(prefix);
        handles.push(tokio::spawn(async move { c.entropy(request).await }));
    }

    let mut outcomes = Vec::new();
    for h in handles {
        outcomes.push(h.await.unwrap());
    }

    // Last trigger at 90ms, entropy window 100ms.
    let arrivals = backend.arrivals();
    assert_eq!(arrivals.len(), 1);
    assert_eq!(arrivals[0].1, "def ");
    let fired_at = arrivals[0].0 - start;
    assert!(fired_at >= Duration::from_millis(190));
    assert!(fired_at < Duration::from_millis(195));

    assert!(outcomes[..3].iter().all(Outcome::is_superseded));
    assert!(matches!(outcomes[3], Outcome::Fresh(ref r) if r.entropy == 4.0));

    let metrics = telemetry.render().unwrap();
    assert!(metrics.contains("hud_superseded_triggers_total{feature=\"entropy\"} 3"));
}

#[tokio::test(start_paused = true)]
async fn test_stale_result_is_cached_not_delivered() {
    let backend = Scripted::new(200);
    let (coordinator, telemetry) = setup(backend.clone());

    let first = tokio::spawn({
        let c = coordinator.clone();
        async move { c.entropy(entropy_request("import os")).await }
    });

    // Past the 100ms window: the first call is in flight.
    sleep(Duration::from_millis(150)).await;
    assert_eq!(backend.calls(), 1);

    let second = tokio::spawn({
        let c = coordinator.clone();
        async move { c.entropy(entropy_request("import sys")).await }
    });

    assert_eq!(first.await.unwrap(), Outcome::Superseded);
    assert!(matches!(second.await.unwrap(), Outcome::Fresh(_)));
    assert_eq!(backend.calls(), 2);

    // The superseded call still landed in the cache.
    let stale_key = CacheKey::for_prefix(Feature::Entropy, "import os");
    assert!(matches!(
        coordinator.cached(Feature::Entropy, &stale_key).await,
        Some(Metrics::Entropy(_))
    ));
    assert!(telemetry
        .render()
        .unwrap()
        .contains("hud_stale_results_total{feature=\"entropy\"} 1"));
}

#[tokio::test(start_paused = true)]
async fn test_trigger_served_from_cache() {
    let backend = Scripted::new(50);
    let (coordinator, _) = setup(backend.clone());

    let fresh = coordinator.ghost(entropy_request("for i in")).await;
    assert!(matches!(fresh, Outcome::Fresh(_)));

    let start = Instant::now();
    let cached = coordinator.ghost(entropy_request("for i in")).await;
    assert!(matches!(cached, Outcome::Cached(_)));
    // Only the 50ms ghost window elapsed; no backend latency.
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert!(start.elapsed() < Duration::from_millis(55));
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_failure_is_not_cached() {
    let backend = Scripted::failing_on(20, "broken(");
    let (coordinator, telemetry) = setup(backend.clone());

    let request = MetricsRequest::Entropy(entropy_request("broken("));
    assert_eq!(coordinator.get_metrics(request.clone()).await, None);
    assert_eq!(coordinator.get_metrics(request.clone()).await, None);
    assert_eq!(backend.calls(), 2);
    assert_eq!(coordinator.cached(Feature::Entropy, &request.cache_key()).await, None);

    let metrics = telemetry.render().unwrap();
    assert!(metrics.contains("hud_backend_failures_total{feature=\"entropy\"} 2"));
}

#[tokio::test(start_paused = true)]
async fn test_no_data_delivers_nothing() {
    let backend = Scripted::new(10);
    let (coordinator, _) = setup(backend.clone());

    let outcome = coordinator.autopanic(entropy_request("foo(bar")).await;
    assert_eq!(outcome, Outcome::NoData);
}

#[tokio::test(start_paused = true)]
async fn test_features_do_not_supersede_each_other() {
    let backend = Scripted::new(10);
    let (coordinator, _) = setup(backend.clone());

    let (entropy, ghost) = tokio::join!(
        coordinator.entropy(entropy_request("x = ")),
        coordinator.ghost(entropy_request("x = ")),
    );
    assert!(matches!(entropy, Outcome::Fresh(_)));
    assert!(matches!(ghost, Outcome::Fresh(_)));
    assert_eq!(backend.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clear_all_cancels_pending_and_in_flight() {
    let backend = Scripted::new(100);
    let (coordinator, _) = setup(backend.clone());

    let pending = tokio::spawn({
        let c = coordinator.clone();
        async move { c.entropy(entropy_request("while True:")).await }
    });
    let in_flight = tokio::spawn({
        let c = coordinator.clone();
        async move {
            c.get_metrics(MetricsRequest::Ghost(entropy_request("class A:")))
                .await
        }
    });

    sleep(Duration::from_millis(20)).await;
    coordinator.clear_all().await;

    assert_eq!(pending.await.unwrap(), Outcome::Superseded);
    assert_eq!(in_flight.await.unwrap(), None);
    // Only the explicit ghost lookup reached the backend.
    assert_eq!(backend.calls(), 1);

    let stats = coordinator.stats().await;
    assert!(stats.iter().all(|s| s.generation >= 1));
}

#[tokio::test(start_paused = true)]
async fn test_saliency_keyed_by_cursor() {
    let backend = Scripted::new(10);
    let (coordinator, _) = setup(backend.clone());

    let at = |character| SaliencyRequest {
        code: "total = 0\nfor n in nums:\n    total".to_string(),
        uri: String::new(),
        cursor_line: 3,
        cursor_char: character,
    };

    assert!(matches!(coordinator.saliency(at(9)).await, Outcome::Fresh(_)));
    assert!(matches!(coordinator.saliency(at(9)).await, Outcome::Cached(_)));
    assert!(matches!(coordinator.saliency(at(4)).await, Outcome::Fresh(_)));
    assert_eq!(backend.calls(), 2);
}
