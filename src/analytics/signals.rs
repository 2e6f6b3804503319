//! Derive editor-facing signals from a top-k logprob list.
//!
//! These are the responses of the analytics contract computed locally from
//! the raw completions output.

use serde::{Deserialize, Serialize};

use crate::analytics::metrics::{entropy, margin, surprisal};
use crate::analytics::probability::{normalize, top_k, TokenLogprob};
use crate::backend::types::{AutopanicResponse, EntropyResponse, GhostResponse};

/// `maxLogprob` reported when no candidates were returned.
pub const EMPTY_MAX_LOGPROB: f64 = -10.0;

/// Number of candidates echoed back in an entropy response.
pub const ENTROPY_TOP_ENTRIES: usize = 10;

/// Rank assigned to tokens missing from the top-k list.
pub const UNRANKED: usize = 6;

/// Logprob assigned to tokens missing from the top-k list.
pub const UNRANKED_LOGPROB: f64 = -5.0;

/// Logprob assumed for a token with nothing but whitespace before it.
pub const LEADING_LOGPROB: f64 = -0.1;

const CLOSERS: [char; 3] = [')', ']', '}'];

pub fn entropy_signal(candidates: &[TokenLogprob]) -> EntropyResponse {
    let sorted = top_k(candidates, candidates.len());
    let dist = normalize(&sorted);

    EntropyResponse {
        entropy: entropy(&dist),
        max_logprob: sorted.first().map_or(EMPTY_MAX_LOGPROB, |t| t.logprob),
        top_logprobs: sorted.iter().take(ENTROPY_TOP_ENTRIES).cloned().collect(),
        token_count: sorted.len(),
    }
}

/// Ghost-text signal. `None` when fewer than two candidates exist.
pub fn ghost_signal(candidates: &[TokenLogprob], show_below_margin: f64) -> Option<GhostResponse> {
    let sorted = top_k(candidates, 2);
    if sorted.len() < 2 {
        return None;
    }
    let m = margin(candidates);
    let mut it = sorted.into_iter();
    let primary = it.next()?;
    let secondary = it.next()?;

    Some(GhostResponse {
        primary,
        secondary,
        margin: m,
        should_show_ghost: m < show_below_margin,
    })
}

/// Whether the trimmed token text opens with a closing bracket.
fn is_close_token(token: &str) -> bool {
    token
        .trim()
        .chars()
        .next()
        .is_some_and(|c| CLOSERS.contains(&c))
}

/// Autopanic signal: how much of the next-token mass closes a bracket.
pub fn autopanic_signal(candidates: &[TokenLogprob], expect_at_confidence: f64) -> AutopanicResponse {
    let dist = normalize(candidates);
    let sorted = top_k(candidates, candidates.len());

    let mut close_types: Vec<String> = Vec::new();
    let mut confidence = 0.0;
    let mut top_close: Option<(String, f64)> = None;
    let mut seen = std::collections::HashSet::new();

    for t in sorted.iter().filter(|t| is_close_token(&t.token)) {
        // Duplicate tokens were merged by `normalize`; count their mass once.
        if !seen.insert(t.token.as_str()) {
            continue;
        }
        let p = dist.get(&t.token).unwrap_or(0.0);
        confidence += p;

        for c in t.token.chars().filter(|c| CLOSERS.contains(c)) {
            let s = c.to_string();
            if !close_types.contains(&s) {
                close_types.push(s);
            }
        }

        if top_close.as_ref().map_or(true, |(_, best)| p > *best) {
            top_close = Some((t.token.clone(), p));
        }
    }

    let confidence = confidence.clamp(0.0, 1.0);
    let (top_close_token, top_close_prob) = match top_close {
        Some((token, p)) => (Some(token), p),
        None => (None, 0.0),
    };

    AutopanicResponse {
        expecting_close: !close_types.is_empty() && confidence >= expect_at_confidence,
        close_types,
        confidence,
        top_close_token,
        top_close_prob,
    }
}

/// Where an observed token landed in the model's top-k prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRank {
    pub token: String,
    /// 0-indexed character offset of the token in the document.
    pub position: usize,
    /// 1-based rank, [`UNRANKED`] when absent.
    pub rank: usize,
    pub logprob: f64,
    /// Surprisal in bits within the normalized top-k.
    pub surprisal: f64,
    pub is_in_top5: bool,
}

impl TokenRank {
    /// Rank 1 at [`LEADING_LOGPROB`], for tokens with no prefix to predict from.
    pub fn assumed(token: &str, position: usize) -> Self {
        Self {
            token: token.to_string(),
            position,
            rank: 1,
            logprob: LEADING_LOGPROB,
            surprisal: -LEADING_LOGPROB / std::f64::consts::LN_2,
            is_in_top5: true,
        }
    }
}

/// Rank `actual` within `candidates`. Token text is compared trimmed.
pub fn rank_token(actual: &str, position: usize, candidates: &[TokenLogprob]) -> TokenRank {
    let sorted = top_k(candidates, candidates.len());
    let wanted = actual.trim();
    let dist = normalize(&sorted);

    let hit = sorted
        .iter()
        .enumerate()
        .find(|(_, t)| t.token.trim() == wanted);

    let (rank, logprob, bits) = match hit {
        Some((idx, t)) => (idx + 1, t.logprob, surprisal(&t.token, &dist)),
        None => (UNRANKED, UNRANKED_LOGPROB, surprisal(actual, &dist)),
    };

    TokenRank {
        token: actual.to_string(),
        position,
        rank,
        logprob,
        surprisal: bits,
        is_in_top5: rank <= 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::metrics::UNSEEN_SURPRISAL_BITS;

    fn lp(token: &str, logprob: f64) -> TokenLogprob {
        TokenLogprob::new(token, logprob)
    }

    #[test]
    fn test_entropy_signal_empty() {
        let resp = entropy_signal(&[]);
        assert_eq!(resp.entropy, 0.0);
        assert_eq!(resp.max_logprob, EMPTY_MAX_LOGPROB);
        assert_eq!(resp.token_count, 0);
    }

    #[test]
    fn test_entropy_signal_sorts_and_truncates() {
        let candidates: Vec<_> = (0..15).map(|i| lp(&format!("t{i}"), -(i as f64) * 0.1 - 0.05)).rev().collect();
        let resp = entropy_signal(&candidates);
        assert_eq!(resp.token_count, 15);
        assert_eq!(resp.top_logprobs.len(), ENTROPY_TOP_ENTRIES);
        assert_eq!(resp.top_logprobs[0].token, "t0");
        assert_eq!(resp.max_logprob, -0.05);
        assert!(resp.entropy > 0.0);
    }

    #[test]
    fn test_ghost_needs_two_candidates() {
        assert!(ghost_signal(&[lp("x", -0.05)], 0.15).is_none());
    }

    #[test]
    fn test_ghost_shown_when_ambiguous() {
        let resp = ghost_signal(&[lp(" b", -0.70), lp(" a", -0.69)], 0.15).unwrap();
        assert_eq!(resp.primary.token, " a");
        assert_eq!(resp.secondary.token, " b");
        assert!(resp.should_show_ghost);

        let confident = ghost_signal(&[lp(" a", -0.01), lp(" b", -5.0)], 0.15).unwrap();
        assert!(!confident.should_show_ghost);
    }

    #[test]
    fn test_autopanic_detects_closers() {
        let resp = autopanic_signal(
            &[lp(")", -0.2), lp("):", -1.5), lp(",", -2.0), lp(" ]", -4.0)],
            0.5,
        );
        assert!(resp.expecting_close);
        assert_eq!(resp.close_types, vec![")".to_string(), "]".to_string()]);
        assert_eq!(resp.top_close_token.as_deref(), Some(")"));
        assert!(resp.confidence > resp.top_close_prob);
        assert!(resp.confidence <= 1.0);
    }

    #[test]
    fn test_autopanic_without_closers() {
        let resp = autopanic_signal(&[lp("x", -0.1), lp("y", -0.5)], 0.5);
        assert!(!resp.expecting_close);
        assert!(resp.close_types.is_empty());
        assert_eq!(resp.confidence, 0.0);
        assert!(resp.top_close_token.is_none());
    }

    #[test]
    fn test_rank_token_trimmed_match() {
        let top = [lp(" return", -0.3), lp(" x", -0.9), lp(" y", -1.2)];
        let rank = rank_token("x", 7, &top);
        assert_eq!(rank.rank, 2);
        assert_eq!(rank.position, 7);
        assert_eq!(rank.logprob, -0.9);
        assert!(rank.is_in_top5);
        assert!(rank.surprisal > 0.0);
    }

    #[test]
    fn test_rank_token_unseen() {
        let rank = rank_token("zeta", 0, &[lp("a", -0.1)]);
        assert_eq!(rank.rank, UNRANKED);
        assert_eq!(rank.logprob, UNRANKED_LOGPROB);
        assert!(!rank.is_in_top5);
        assert_eq!(rank.surprisal, UNSEEN_SURPRISAL_BITS);
    }

    #[test]
    fn test_assumed_rank() {
        let rank = TokenRank::assumed("import", 0);
        assert_eq!(rank.rank, 1);
        assert_eq!(rank.logprob, LEADING_LOGPROB);
        assert!(rank.is_in_top5);
        assert!((rank.surprisal - 0.1 / std::f64::consts::LN_2).abs() < 1e-12);
    }
}
