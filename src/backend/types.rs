//! Request/response types of the analytics backend contract.
//!
//! Field names follow the wire format (camelCase). Every response type
//! implements [`Validate`]: decoded payloads that violate the expected ranges
//! are rejected as malformed instead of reaching the cache.

use serde::{Deserialize, Serialize};

use crate::analytics::probability::TokenLogprob;
use crate::analytics::signals::TokenRank;

/// Logprobs above this are treated as malformed (allows rounding noise).
const LOGPROB_TOLERANCE: f64 = 1e-6;

// ─── Requests ──────────────────────────────────────────────────────────────

/// Body of `/entropy`, `/ghost` and `/autopanic`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefixRequest {
    pub prefix: String,
    #[serde(default)]
    pub uri: String,
}

impl PrefixRequest {
    pub fn new(prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            uri: uri.into(),
        }
    }
}

/// Body of `/saliency`. `cursor_line` is 1-indexed, `cursor_char` 0-indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaliencyRequest {
    pub code: String,
    #[serde(default)]
    pub uri: String,
    pub cursor_line: u32,
    pub cursor_char: u32,
}

/// Body of `/v1/ranks`: a whole document to rank token by token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RanksRequest {
    pub code: String,
    #[serde(default)]
    pub uri: String,
}

// ─── Responses ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntropyResponse {
    pub entropy: f64,
    pub max_logprob: f64,
    #[serde(default)]
    pub top_logprobs: Vec<TokenLogprob>,
    pub token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostResponse {
    pub primary: TokenLogprob,
    pub secondary: TokenLogprob,
    pub margin: f64,
    pub should_show_ghost: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutopanicResponse {
    pub expecting_close: bool,
    #[serde(default)]
    pub close_types: Vec<String>,
    pub confidence: f64,
    #[serde(default)]
    pub top_close_token: Option<String>,
    #[serde(default)]
    pub top_close_prob: f64,
}

/// One scored token of a saliency analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalientToken {
    /// 1-indexed line.
    pub line: u32,
    /// 0-indexed character offset.
    pub character: u32,
    pub kl_divergence: f64,
    pub token_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaliencyResponse {
    #[serde(default)]
    pub tokens: Vec<SalientToken>,
    pub base_entropy: f64,
}

/// Per-token ranks, in document order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RanksResponse {
    pub uri: String,
    pub tokens: Vec<TokenRank>,
}

// ─── Validation ────────────────────────────────────────────────────────────

/// Shape/range check for decoded backend responses.
pub trait Validate {
    /// Returns a description of the first violation found.
    fn validate(&self) -> Result<(), String>;
}

fn check_logprob(what: &str, t: &TokenLogprob) -> Result<(), String> {
    if t.logprob.is_nan() || t.logprob > LOGPROB_TOLERANCE {
        return Err(format!("{what} logprob out of range: {}", t.logprob));
    }
    Ok(())
}

fn check_unit(what: &str, v: f64) -> Result<(), String> {
    if !(0.0..=1.0).contains(&v) {
        return Err(format!("{what} outside [0, 1]: {v}"));
    }
    Ok(())
}

fn check_non_negative(what: &str, v: f64) -> Result<(), String> {
    if !v.is_finite() || v < 0.0 {
        return Err(format!("{what} must be finite and non-negative: {v}"));
    }
    Ok(())
}

impl Validate for EntropyResponse {
    fn validate(&self) -> Result<(), String> {
        check_non_negative("entropy", self.entropy)?;
        if self.max_logprob.is_nan() || self.max_logprob > LOGPROB_TOLERANCE {
            return Err(format!("maxLogprob out of range: {}", self.max_logprob));
        }
        for t in &self.top_logprobs {
            check_logprob("topLogprobs", t)?;
        }
        if self.token_count < self.top_logprobs.len() {
            return Err(format!(
                "tokenCount {} smaller than topLogprobs length {}",
                self.token_count,
                self.top_logprobs.len()
            ));
        }
        Ok(())
    }
}

impl Validate for GhostResponse {
    fn validate(&self) -> Result<(), String> {
        check_logprob("primary", &self.primary)?;
        check_logprob("secondary", &self.secondary)?;
        check_unit("margin", self.margin)
    }
}

impl Validate for AutopanicResponse {
    fn validate(&self) -> Result<(), String> {
        check_unit("confidence", self.confidence)?;
        check_unit("topCloseProb", self.top_close_prob)
    }
}

impl Validate for SaliencyResponse {
    fn validate(&self) -> Result<(), String> {
        check_non_negative("baseEntropy", self.base_entropy)?;
        for t in &self.tokens {
            if t.line == 0 {
                return Err(format!("token {:?} has line 0 (lines are 1-indexed)", t.token_text));
            }
            check_non_negative("klDivergence", t.kl_divergence)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy_wire_format() {
        let json = r#"{
            "entropy": 1.5,
            "maxLogprob": -0.2,
            "topLogprobs": [{"token": "def", "logprob": -0.2}],
            "tokenCount": 20
        }"#;
        let resp: EntropyResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.token_count, 20);
        assert!(resp.validate().is_ok());
    }

    #[test]
    fn test_saliency_request_wire_format() {
        let req = SaliencyRequest {
            code: "x = 1".into(),
            uri: "file:///a.py".into(),
            cursor_line: 1,
            cursor_char: 5,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value["cursorLine"], 1);
        assert_eq!(value["cursorChar"], 5);
    }

    #[test]
    fn test_positive_logprob_rejected() {
        let resp = GhostResponse {
            primary: TokenLogprob::new("a", 0.5),
            secondary: TokenLogprob::new("b", -1.0),
            margin: 0.2,
            should_show_ghost: false,
        };
        assert!(resp.validate().is_err());
    }

    #[test]
    fn test_margin_out_of_range_rejected() {
        let resp = GhostResponse {
            primary: TokenLogprob::new("a", -0.1),
            secondary: TokenLogprob::new("b", -1.0),
            margin: 1.7,
            should_show_ghost: false,
        };
        assert!(resp.validate().is_err());
    }

    #[test]
    fn test_saliency_line_zero_rejected() {
        let resp = SaliencyResponse {
            tokens: vec![SalientToken {
                line: 0,
                character: 0,
                kl_divergence: 0.3,
                token_text: "x".into(),
            }],
            base_entropy: 1.0,
        };
        assert!(resp.validate().is_err());
    }

    #[test]
    fn test_ranks_wire_format() {
        let resp = RanksResponse {
            uri: "file:///a.py".into(),
            tokens: vec![TokenRank::assumed("import", 0)],
        };
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["tokens"][0]["isInTop5"], true);
        assert_eq!(value["tokens"][0]["position"], 0);
    }

    #[test]
    fn test_autopanic_null_close_token() {
        let json = r#"{"expectingClose": false, "closeTypes": [], "confidence": 0.1,
                       "topCloseToken": null, "topCloseProb": 0.0}"#;
        let resp: AutopanicResponse = serde_json::from_str(json).unwrap();
        assert!(resp.top_close_token.is_none());
        assert!(resp.validate().is_ok());
    }
}
