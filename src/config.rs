//! Runtime configuration for hud-signals.
//!
//! Loaded from a JSON file; every section and field falls back to its
//! default when absent. Per-feature debounce and cache knobs live here.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::analytics::ranks::RanksConfig;
use crate::analytics::saliency::SaliencyConfig;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "hud-signals", about = "Uncertainty analytics service for code editors")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "hud-signals.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides `server.listen`).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub features: FeaturesConfig,
    pub signals: SignalConfig,
    pub saliency: SaliencyConfig,
    pub ranks: RanksConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:8000").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Where analytics come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Forward to a remote analytics backend speaking the four-route contract.
    #[default]
    Remote,
    /// Derive analytics in-process from a completions endpoint.
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub mode: BackendMode,

    /// Base URL of the remote analytics backend.
    pub url: String,

    /// OpenAI-compatible completions endpoint (local mode).
    pub completions_url: String,

    pub model: String,

    /// Environment variable holding the completions bearer token.
    pub api_token_env: String,

    /// Candidates requested per completion.
    pub top_logprobs: usize,

    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::Remote,
            url: "http://127.0.0.1:8001".to_string(),
            completions_url: "https://api.cerebras.ai/v1/completions".to_string(),
            model: "llama-3.1-8b".to_string(),
            api_token_env: "CEREBRAS_API_TOKEN".to_string(),
            top_logprobs: 10,
            request_timeout_secs: 10,
        }
    }
}

impl BackendConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Bearer token from the configured environment variable, if set and non-empty.
    pub fn api_token(&self) -> Option<String> {
        std::env::var(&self.api_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
    }
}

/// Debounce and cache settings for one feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub debounce_ms: u64,
    pub ttl_secs: u64,
    pub max_entries: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            ttl_secs: 30,
            max_entries: 200,
        }
    }
}

impl FeatureConfig {
    fn with_debounce(debounce_ms: u64) -> Self {
        Self {
            debounce_ms,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeaturesConfig {
    pub entropy: FeatureConfig,
    pub ghost: FeatureConfig,
    pub autopanic: FeatureConfig,
    pub saliency: FeatureConfig,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            entropy: FeatureConfig::with_debounce(100),
            ghost: FeatureConfig::with_debounce(50),
            autopanic: FeatureConfig::with_debounce(150),
            // N+1 backend calls per analysis: wait longer, keep longer.
            saliency: FeatureConfig {
                debounce_ms: 500,
                ttl_secs: 300,
                max_entries: 50,
            },
        }
    }
}

/// Thresholds for the derived display signals.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Show a ghost suggestion when the top-2 margin is below this.
    pub ghost_margin_threshold: f64,

    /// Report an expected close when closer mass reaches this.
    pub autopanic_confidence: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            ghost_margin_threshold: 0.15,
            autopanic_confidence: 0.5,
        }
    }
}

fn check_fraction(name: &str, value: f64) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{name} must be within [0, 1], got {value}");
    }
    Ok(())
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&data)
                .with_context(|| format!("parsing config {}", path.display()))?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        Ok(config)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, f) in [
            ("entropy", &self.features.entropy),
            ("ghost", &self.features.ghost),
            ("autopanic", &self.features.autopanic),
            ("saliency", &self.features.saliency),
        ] {
            if f.max_entries == 0 {
                bail!("features.{name}.max_entries must be at least 1");
            }
            if f.ttl_secs == 0 {
                bail!("features.{name}.ttl_secs must be at least 1");
            }
        }

        check_fraction("signals.ghost_margin_threshold", self.signals.ghost_margin_threshold)?;
        check_fraction("signals.autopanic_confidence", self.signals.autopanic_confidence)?;

        if self.backend.top_logprobs < 2 {
            bail!("backend.top_logprobs must be at least 2");
        }
        if self.backend.request_timeout_secs == 0 {
            bail!("backend.request_timeout_secs must be at least 1");
        }
        if self.saliency.min_kl < 0.0 || !self.saliency.min_kl.is_finite() {
            bail!("saliency.min_kl must be a finite non-negative number");
        }
        if self.ranks.max_tokens == 0 {
            bail!("ranks.max_tokens must be at least 1");
        }
        Ok(())
    }
}
