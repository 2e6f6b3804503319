//! Metric engine: entropy, confidence margin, KL divergence and surprisal.
//!
//! All metrics operate on [`ProbabilityDistribution`]s produced by
//! [`normalize`], except [`margin`] which renormalizes only the top two
//! candidates itself.

use crate::analytics::probability::{normalize, sort_descending, ProbabilityDistribution, TokenLogprob};

/// Probability substituted for tokens missing from the perturbed distribution.
pub const KL_EPSILON: f64 = 1e-10;

/// Upper bound applied to KL scores: `ln(1 / KL_EPSILON)`.
///
/// For a normalized baseline this is the largest value the epsilon
/// substitution can produce.
pub const KL_CEILING_NATS: f64 = 23.025_850_929_940_457;

/// Surprisal reported for tokens outside the tracked top-k, in bits.
pub const UNSEEN_SURPRISAL_BITS: f64 = 20.0;

/// Margin reported when fewer than two candidates exist.
pub const FULL_CONFIDENCE_MARGIN: f64 = 1.0;

/// Shannon entropy in bits. Zero-probability terms are skipped.
pub fn entropy(dist: &ProbabilityDistribution) -> f64 {
    let h: f64 = dist
        .iter()
        .filter(|(_, p)| *p > 0.0)
        .map(|(_, p)| -p * p.log2())
        .sum();
    // -0.0 for a point mass.
    h.max(0.0)
}

/// Probability gap between the top-1 and top-2 candidates.
///
/// Only the two best candidates are renormalized, so the result is in [0, 1]
/// and independent of how much mass the rest of the top-k carries.
pub fn margin(candidates: &[TokenLogprob]) -> f64 {
    if candidates.len() < 2 {
        return FULL_CONFIDENCE_MARGIN;
    }

    let mut sorted = candidates.to_vec();
    sort_descending(&mut sorted);
    let top2 = &sorted[..2];

    // Identical token text merges into one entry: no ambiguity between them.
    if top2[0].token == top2[1].token {
        return FULL_CONFIDENCE_MARGIN;
    }

    let dist = normalize(top2);
    let p1 = dist.get(&top2[0].token).unwrap_or(0.0);
    let p2 = dist.get(&top2[1].token).unwrap_or(0.0);

    (p1 - p2).clamp(0.0, 1.0)
}

/// KL(P ‖ Q) in nats, summed over tokens present in `baseline`.
///
/// `baseline` is P, `perturbed` is Q. Tokens absent from Q use
/// [`KL_EPSILON`]. The result is clamped to `[0, KL_CEILING_NATS]`.
pub fn kl_divergence(baseline: &ProbabilityDistribution, perturbed: &ProbabilityDistribution) -> f64 {
    let mut kl = 0.0;
    for (token, p) in baseline.iter() {
        if p <= 0.0 {
            continue;
        }
        let q = perturbed
            .get(token)
            .filter(|q| *q > 0.0)
            .unwrap_or(KL_EPSILON);
        kl += p * (p / q).ln();
    }
    kl.clamp(0.0, KL_CEILING_NATS)
}

/// Surprisal of `token` in bits: `-log2 p(token)`.
///
/// Tokens the distribution does not track (or tracks at zero) are rarer than
/// anything observed and get [`UNSEEN_SURPRISAL_BITS`].
pub fn surprisal(token: &str, dist: &ProbabilityDistribution) -> f64 {
    match dist.get(token) {
        Some(p) if p > 0.0 => (-p.log2()).max(0.0),
        _ => UNSEEN_SURPRISAL_BITS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lp(token: &str, logprob: f64) -> TokenLogprob {
        TokenLogprob::new(token, logprob)
    }

    #[test]
    fn test_entropy_point_mass_is_zero() {
        let dist = ProbabilityDistribution::from_probabilities([("only", 1.0)]);
        assert_eq!(entropy(&dist), 0.0);
    }

    #[test]
    fn test_entropy_uniform() {
        for k in [2usize, 3, 8, 20] {
            let dist = ProbabilityDistribution::from_probabilities(
                (0..k).map(|i| (format!("t{i}"), 1.0 / k as f64)),
            );
            assert!((entropy(&dist) - (k as f64).log2()).abs() < 1e-6);
        }
    }

    #[test]
    fn test_entropy_skips_zero_terms() {
        let dist = ProbabilityDistribution::from_probabilities([("a", 1.0), ("b", 0.0)]);
        assert_eq!(entropy(&dist), 0.0);
    }

    #[test]
    fn test_margin_single_candidate() {
        assert_eq!(margin(&[lp("x", -0.05)]), 1.0);
        assert_eq!(margin(&[]), 1.0);
    }

    #[test]
    fn test_margin_equal_candidates_is_zero() {
        assert!(margin(&[lp("a", -0.7), lp("b", -0.7)]).abs() < 1e-12);
    }

    #[test]
    fn test_margin_uses_top_two_only() {
        // Unsorted input, third candidate must not affect the result.
        let m = margin(&[lp("c", -0.3), lp("a", -0.1), lp("b", -5.0)]);
        let p1 = 1.0 / (1.0 + (-0.2f64).exp());
        let p2 = 1.0 - p1;
        assert!((m - (p1 - p2)).abs() < 1e-9);
    }

    #[test]
    fn test_kl_self_is_zero() {
        let p = ProbabilityDistribution::from_probabilities([("a", 0.9), ("b", 0.1)]);
        assert!(kl_divergence(&p, &p).abs() < 1e-6);
    }

    #[test]
    fn test_kl_is_asymmetric() {
        let p = ProbabilityDistribution::from_probabilities([("a", 0.9), ("b", 0.1)]);
        let q = ProbabilityDistribution::from_probabilities([("a", 0.5), ("b", 0.3), ("c", 0.2)]);
        let pq = kl_divergence(&p, &q);
        let qp = kl_divergence(&q, &p);
        assert!(pq > 0.0);
        assert!((pq - qp).abs() > 1e-3);
    }

    #[test]
    fn test_kl_missing_token_is_clamped() {
        let p = ProbabilityDistribution::from_probabilities([("a", 1.0)]);
        let q = ProbabilityDistribution::from_probabilities([("b", 1.0)]);
        let kl = kl_divergence(&p, &q);
        assert!((kl - KL_CEILING_NATS).abs() < 1e-9);
    }

    #[test]
    fn test_surprisal() {
        let dist = ProbabilityDistribution::from_probabilities([("a", 0.5), ("b", 0.25), ("c", 0.25)]);
        assert!((surprisal("a", &dist) - 1.0).abs() < 1e-12);
        assert!((surprisal("b", &dist) - 2.0).abs() < 1e-12);
        assert_eq!(surprisal("zzz", &dist), UNSEEN_SURPRISAL_BITS);
    }
}
