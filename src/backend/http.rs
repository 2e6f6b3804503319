//! Client for a remote analytics backend speaking the four-route contract.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::backend::types::{
    AutopanicResponse, EntropyResponse, GhostResponse, PrefixRequest, SaliencyRequest,
    SaliencyResponse, Validate,
};
use crate::backend::{Backend, BackendError};

/// Maximum number of body bytes echoed into a status error.
const ERROR_BODY_LIMIT: usize = 200;

pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    async fn post<B, R>(&self, route: &str, body: &B) -> Result<R, BackendError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned + Validate,
    {
        let url = format!("{}/{route}", self.base_url);
        let resp = self.client.post(&url).json(body).send().await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        decode(&text)
            .inspect(|_| debug!(route, bytes = text.len(), "Backend response decoded"))
    }
}

/// Decode and validate a response body.
pub fn decode<R>(body: &str) -> Result<R, BackendError>
where
    R: DeserializeOwned + Validate,
{
    let value: R = serde_json::from_str(body).map_err(|e| BackendError::Malformed(e.to_string()))?;
    value.validate().map_err(BackendError::Malformed)?;
    Ok(value)
}

#[async_trait]
impl Backend for HttpBackend {
    async fn entropy(&self, request: &PrefixRequest) -> Result<EntropyResponse, BackendError> {
        self.post("entropy", request).await
    }

    async fn ghost(&self, request: &PrefixRequest) -> Result<GhostResponse, BackendError> {
        self.post("ghost", request).await
    }

    async fn autopanic(&self, request: &PrefixRequest) -> Result<AutopanicResponse, BackendError> {
        self.post("autopanic", request).await
    }

    async fn saliency(&self, request: &SaliencyRequest) -> Result<SaliencyResponse, BackendError> {
        self.post("saliency", request).await
    }
}
