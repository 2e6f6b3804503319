//! Backend access: the analytics contract and the raw logprob source.
//!
//! - [`types`]: wire types of the analytics contract, with validation
//! - [`http`]: client for a remote analytics backend
//! - [`completions`]: OpenAI-compatible completions client (top-k logprobs)
//! - [`local`]: analytics backend computed in-process from a logprob source

pub mod completions;
pub mod http;
pub mod local;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

use crate::analytics::probability::TokenLogprob;
use types::{
    AutopanicResponse, EntropyResponse, GhostResponse, PrefixRequest, RanksRequest, RanksResponse,
    SaliencyRequest, SaliencyResponse,
};

/// Recoverable backend failures. None of these are fatal to the caller.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("no data for this context")]
    NoData,
}

impl BackendError {
    /// Whether this is an expected absence rather than a fault.
    pub fn is_no_data(&self) -> bool {
        matches!(self, BackendError::NoData)
    }
}

/// The analytics contract consumed by the coordinator.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn entropy(&self, request: &PrefixRequest) -> Result<EntropyResponse, BackendError>;

    async fn ghost(&self, request: &PrefixRequest) -> Result<GhostResponse, BackendError>;

    async fn autopanic(&self, request: &PrefixRequest) -> Result<AutopanicResponse, BackendError>;

    async fn saliency(&self, request: &SaliencyRequest) -> Result<SaliencyResponse, BackendError>;

    /// Per-token ranks of a whole document. Not part of the remote contract,
    /// so backends without it report no data.
    async fn ranks(&self, _request: &RanksRequest) -> Result<RanksResponse, BackendError> {
        Err(BackendError::NoData)
    }
}

/// A source of next-token top-k logprobs for a prompt.
#[async_trait]
pub trait LogprobSource: Send + Sync {
    /// Top-k candidates for the token following `prompt`, highest first.
    async fn top_logprobs(&self, prompt: &str) -> Result<Vec<TokenLogprob>, BackendError>;
}
