//! hud-signals: uncertainty analytics for code editors.
//!
//! Turns next-token log-probabilities from a language-model backend into
//! entropy, confidence-margin and KL-saliency signals, and coordinates the
//! backend requests behind them:
//!   editor event → debounce → prefix-keyed cache → single-flight call → cache
//!
//! Exposed over HTTP by the `hud-signals` binary.

pub mod analytics;
pub mod backend;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod server;
pub mod telemetry;
