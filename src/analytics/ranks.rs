//! Token ranking over a whole document.
//!
//! Each token is scored against the model's prediction for the text before
//! it: rank within the top-k, logprob and surprisal. One document costs one
//! source call per token that has a non-blank prefix.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analytics::signals::{rank_token, TokenRank};
use crate::backend::types::{RanksRequest, RanksResponse};
use crate::backend::{BackendError, LogprobSource};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RanksConfig {
    /// Tokens ranked per document; the rest are dropped.
    pub max_tokens: usize,

    /// Pause between source calls, for rate-limited upstreams.
    pub request_spacing_ms: u64,
}

impl Default for RanksConfig {
    fn default() -> Self {
        Self {
            max_tokens: 200,
            request_spacing_ms: 0,
        }
    }
}

/// A lexical token of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeToken {
    pub text: String,
    /// Byte offset, for slicing the prefix.
    pub start: usize,
    /// 0-indexed character offset.
    pub position: usize,
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Split `code` into word runs and single punctuation characters.
/// Whitespace separates tokens and is never one.
pub fn scan_tokens(code: &str) -> Vec<CodeToken> {
    let mut out = Vec::new();
    let mut word: Option<CodeToken> = None;

    for (position, (start, c)) in code.char_indices().enumerate() {
        if is_word(c) {
            word.get_or_insert_with(|| CodeToken {
                text: String::new(),
                start,
                position,
            })
            .text
            .push(c);
            continue;
        }
        out.extend(word.take());
        if !c.is_whitespace() {
            out.push(CodeToken {
                text: c.to_string(),
                start,
                position,
            });
        }
    }
    out.extend(word);
    out
}

/// Rank every token of `request.code` against `source`.
///
/// Tokens preceded only by whitespace, and tokens whose query fails, get
/// [`TokenRank::assumed`]. A document without tokens is
/// [`BackendError::NoData`].
pub async fn analyze(
    source: &dyn LogprobSource,
    request: &RanksRequest,
    config: &RanksConfig,
) -> Result<RanksResponse, BackendError> {
    let mut tokens = scan_tokens(&request.code);
    if tokens.is_empty() {
        return Err(BackendError::NoData);
    }
    if tokens.len() > config.max_tokens {
        debug!(total = tokens.len(), kept = config.max_tokens, "Ranking truncated");
        tokens.truncate(config.max_tokens);
    }

    let spacing = Duration::from_millis(config.request_spacing_ms);
    let mut queried = 0usize;
    let mut ranks = Vec::with_capacity(tokens.len());

    for token in &tokens {
        let prefix = &request.code[..token.start];
        if prefix.trim().is_empty() {
            ranks.push(TokenRank::assumed(&token.text, token.position));
            continue;
        }

        if queried > 0 && !spacing.is_zero() {
            tokio::time::sleep(spacing).await;
        }
        queried += 1;

        match source.top_logprobs(prefix).await {
            Ok(top) => ranks.push(rank_token(&token.text, token.position, &top)),
            Err(e) => {
                debug!(token = %token.text, position = token.position, error = %e, "Rank query failed");
                ranks.push(TokenRank::assumed(&token.text, token.position));
            }
        }
    }

    debug!(tokens = ranks.len(), queried, "Token ranking complete");
    Ok(RanksResponse {
        uri: request.uri.clone(),
        tokens: ranks,
    })
}
