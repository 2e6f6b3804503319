//! Probability transform: top-k logprobs → normalized distribution.
//!
//! Logprobs are shifted by their maximum before exponentiating so that very
//! negative values underflow consistently instead of collapsing the sum.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One candidate continuation and its log-likelihood (natural log, ≤ 0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenLogprob {
    pub token: String,
    pub logprob: f64,
}

impl TokenLogprob {
    pub fn new(token: impl Into<String>, logprob: f64) -> Self {
        Self {
            token: token.into(),
            logprob,
        }
    }
}

/// A normalized token → probability mapping.
///
/// Ephemeral: built per backend response, consumed by the metric engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbabilityDistribution {
    probs: HashMap<String, f64>,
}

impl ProbabilityDistribution {
    /// Build a distribution directly from probabilities (no renormalization).
    pub fn from_probabilities<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut probs = HashMap::new();
        for (token, p) in pairs {
            *probs.entry(token.into()).or_insert(0.0) += p;
        }
        Self { probs }
    }

    /// Probability of `token`, if it is tracked.
    pub fn get(&self, token: &str) -> Option<f64> {
        self.probs.get(token).copied()
    }

    pub fn len(&self) -> usize {
        self.probs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    /// Sum of all probabilities (≈ 1 for a non-empty normalized distribution).
    pub fn total(&self) -> f64 {
        self.probs.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.probs.iter().map(|(t, p)| (t.as_str(), *p))
    }
}

/// Normalize a list of logprobs into a probability distribution.
///
/// An empty list yields an empty distribution. NaN entries are ignored and
/// duplicate tokens have their mass merged.
pub fn normalize(logprobs: &[TokenLogprob]) -> ProbabilityDistribution {
    let valid: Vec<&TokenLogprob> = logprobs.iter().filter(|t| !t.logprob.is_nan()).collect();
    if valid.is_empty() {
        return ProbabilityDistribution::default();
    }

    let max = valid
        .iter()
        .map(|t| t.logprob)
        .fold(f64::NEG_INFINITY, f64::max);

    // Every entry is impossible on its own scale: nothing to rank, spread evenly.
    if max == f64::NEG_INFINITY {
        let p = 1.0 / valid.len() as f64;
        return ProbabilityDistribution::from_probabilities(
            valid.iter().map(|t| (t.token.clone(), p)),
        );
    }

    let exps: Vec<(&str, f64)> = valid
        .iter()
        .map(|t| (t.token.as_str(), (t.logprob - max).exp()))
        .collect();
    let total: f64 = exps.iter().map(|(_, e)| e).sum();

    ProbabilityDistribution::from_probabilities(exps.into_iter().map(|(t, e)| (t, e / total)))
}

/// Return the `k` highest-logprob entries, highest first.
pub fn top_k(logprobs: &[TokenLogprob], k: usize) -> Vec<TokenLogprob> {
    let mut sorted = logprobs.to_vec();
    sort_descending(&mut sorted);
    sorted.truncate(k);
    sorted
}

/// Sort by logprob, highest first. NaN sorts last.
pub fn sort_descending(logprobs: &mut [TokenLogprob]) {
    logprobs.sort_by(|a, b| {
        b.logprob
            .partial_cmp(&a.logprob)
            .unwrap_or_else(|| a.logprob.is_nan().cmp(&b.logprob.is_nan()))
    });
}
