//! hud-signals server.
//!
//! Fronts either a remote analytics backend or an in-process one built on an
//! OpenAI-compatible completions endpoint, and serves the coordinated,
//! cached signals to editor extensions over HTTP.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use hud_signals::backend::completions::CompletionsClient;
use hud_signals::backend::http::HttpBackend;
use hud_signals::backend::local::LocalBackend;
use hud_signals::backend::Backend;
use hud_signals::config::{BackendMode, Cli, Config};
use hud_signals::coordinator::Coordinator;
use hud_signals::server::api::{build_router, AppState};
use hud_signals::telemetry::Telemetry;

fn build_backend(config: &Config) -> anyhow::Result<Arc<dyn Backend>> {
    let backend = &config.backend;
    let timeout = backend.request_timeout();

    let built: Arc<dyn Backend> = match backend.mode {
        BackendMode::Remote => {
            info!(url = backend.url, "Using remote analytics backend");
            Arc::new(HttpBackend::new(backend.url.clone(), timeout)?)
        }
        BackendMode::Local => {
            let token = backend.api_token();
            if token.is_none() {
                tracing::warn!(env = backend.api_token_env, "No completions API token set");
            }
            info!(
                url = backend.completions_url,
                model = backend.model,
                top_logprobs = backend.top_logprobs,
                "Using local analytics over completions endpoint"
            );
            let source = CompletionsClient::new(
                backend.completions_url.clone(),
                backend.model.clone(),
                token,
                backend.top_logprobs,
                timeout,
            )?;
            Arc::new(LocalBackend::new(
                Arc::new(source),
                config.signals.clone(),
                config.saliency.clone(),
            )
            .with_ranks(config.ranks.clone()))
        }
    };
    Ok(built)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "hud_signals=debug,tower_http=debug"
    } else {
        "hud_signals=info,tower_http=info"
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| filter.into());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);
    if cli.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("hud-signals v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    config.validate()?;
    let config = Arc::new(config);

    for (name, f) in [
        ("entropy", &config.features.entropy),
        ("ghost", &config.features.ghost),
        ("autopanic", &config.features.autopanic),
        ("saliency", &config.features.saliency),
    ] {
        info!(
            feature = name,
            debounce_ms = f.debounce_ms,
            ttl_secs = f.ttl_secs,
            max_entries = f.max_entries,
            "Feature configured"
        );
    }

    let backend = build_backend(&config)?;
    let telemetry = Arc::new(Telemetry::new()?);
    let coordinator = Coordinator::new(backend, &config.features, telemetry.clone());

    // Build application state.
    let state = Arc::new(AppState {
        coordinator,
        telemetry,
        config: config.clone(),
        start_time: Instant::now(),
    });

    // Build the HTTP router.
    let app = build_router(state);

    // Start the server.
    let listen_addr = config.server.listen.clone();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
