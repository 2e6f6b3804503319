//! In-process analytics backend.
//!
//! Serves the analytics contract by querying a [`LogprobSource`] and running
//! the metric engine over the returned top-k list.

use std::sync::Arc;

use async_trait::async_trait;

use crate::analytics::ranks::{self, RanksConfig};
use crate::analytics::saliency::{self, SaliencyConfig};
use crate::analytics::signals::{autopanic_signal, entropy_signal, ghost_signal};
use crate::backend::types::{
    AutopanicResponse, EntropyResponse, GhostResponse, PrefixRequest, RanksRequest, RanksResponse,
    SaliencyRequest, SaliencyResponse,
};
use crate::backend::{Backend, BackendError, LogprobSource};
use crate::config::SignalConfig;

pub struct LocalBackend {
    source: Arc<dyn LogprobSource>,
    signals: SignalConfig,
    saliency: SaliencyConfig,
    ranks: RanksConfig,
}

impl LocalBackend {
    pub fn new(source: Arc<dyn LogprobSource>, signals: SignalConfig, saliency: SaliencyConfig) -> Self {
        Self {
            source,
            signals,
            saliency,
            ranks: RanksConfig::default(),
        }
    }

    pub fn with_ranks(mut self, ranks: RanksConfig) -> Self {
        self.ranks = ranks;
        self
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn entropy(&self, request: &PrefixRequest) -> Result<EntropyResponse, BackendError> {
        let top = self.source.top_logprobs(&request.prefix).await?;
        Ok(entropy_signal(&top))
    }

    async fn ghost(&self, request: &PrefixRequest) -> Result<GhostResponse, BackendError> {
        let top = self.source.top_logprobs(&request.prefix).await?;
        ghost_signal(&top, self.signals.ghost_margin_threshold).ok_or(BackendError::NoData)
    }

    async fn autopanic(&self, request: &PrefixRequest) -> Result<AutopanicResponse, BackendError> {
        let top = self.source.top_logprobs(&request.prefix).await?;
        if top.is_empty() {
            return Err(BackendError::NoData);
        }
        Ok(autopanic_signal(&top, self.signals.autopanic_confidence))
    }

    async fn saliency(&self, request: &SaliencyRequest) -> Result<SaliencyResponse, BackendError> {
        saliency::analyze(self.source.as_ref(), request, &self.saliency).await
    }

    async fn ranks(&self, request: &RanksRequest) -> Result<RanksResponse, BackendError> {
        ranks::analyze(self.source.as_ref(), request, &self.ranks).await
    }
}
