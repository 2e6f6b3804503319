//! Uncertainty analytics over next-token logprobs.
//!
//! - [`probability`]: TokenLogprob and the normalization transform
//! - [`metrics`]: entropy, margin, KL divergence, surprisal
//! - [`ranks`]: per-token rank of a whole document
//! - [`saliency`]: perturbation-based token influence
//! - [`signals`]: entropy / ghost / autopanic responses and token ranks

pub mod metrics;
pub mod probability;
pub mod ranks;
pub mod saliency;
pub mod signals;
