//! OpenAI-compatible completions client used as the raw logprob source.
//!
//! Asks for a single completion token with `logprobs = k` and returns the
//! top-k alternatives for that token.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analytics::probability::{sort_descending, TokenLogprob};
use crate::backend::{BackendError, LogprobSource};

// ─── Request/Response Types ────────────────────────────────────────────────

/// Completion request (OpenAI-compatible subset).
#[derive(Debug, Serialize)]
pub struct CompletionRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub max_tokens: usize,
    pub logprobs: usize,
}

#[derive(Debug, Deserialize)]
pub struct CompletionResponse {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
pub struct CompletionChoice {
    #[serde(default)]
    pub logprobs: Option<ChoiceLogprobs>,
}

#[derive(Debug, Deserialize)]
pub struct ChoiceLogprobs {
    #[serde(default)]
    pub top_logprobs: Option<Vec<Option<HashMap<String, f64>>>>,
}

impl CompletionResponse {
    /// Top-k alternatives for the first generated token, highest first.
    pub fn first_token_top_logprobs(self) -> Result<Vec<TokenLogprob>, BackendError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::Malformed("completion has no choices".into()))?;

        let top = choice
            .logprobs
            .and_then(|l| l.top_logprobs)
            .and_then(|positions| positions.into_iter().next())
            .flatten()
            .unwrap_or_default();

        let mut out: Vec<TokenLogprob> = top
            .into_iter()
            .map(|(token, logprob)| TokenLogprob { token, logprob })
            .collect();

        if let Some(bad) = out.iter().find(|t| t.logprob.is_nan() || t.logprob > 1e-6) {
            return Err(BackendError::Malformed(format!(
                "logprob out of range for {:?}: {}",
                bad.token, bad.logprob
            )));
        }

        sort_descending(&mut out);
        Ok(out)
    }
}

// ─── Client ────────────────────────────────────────────────────────────────

pub struct CompletionsClient {
    client: reqwest::Client,
    url: String,
    model: String,
    api_token: Option<String>,
    top_logprobs: usize,
}

impl CompletionsClient {
    pub fn new(
        url: impl Into<String>,
        model: impl Into<String>,
        api_token: Option<String>,
        top_logprobs: usize,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            model: model.into(),
            api_token,
            top_logprobs,
        })
    }
}

#[async_trait]
impl LogprobSource for CompletionsClient {
    async fn top_logprobs(&self, prompt: &str) -> Result<Vec<TokenLogprob>, BackendError> {
        if prompt.trim().is_empty() {
            return Ok(Vec::new());
        }

        let body = CompletionRequest {
            model: &self.model,
            prompt,
            max_tokens: 1,
            logprobs: self.top_logprobs,
        };

        let mut req = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.api_token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&text).map_err(|e| BackendError::Malformed(e.to_string()))?;
        let top = parsed.first_token_top_logprobs()?;

        debug!(prompt_chars = prompt.len(), candidates = top.len(), "Completion logprobs received");
        Ok(top)
    }
}
