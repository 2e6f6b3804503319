//! Feature tags and prefix-derived cache keys.
//!
//! Keys hash the normalized text with 64-bit FNV-1a. Collisions are
//! tolerated: a colliding key serves another prefix's value, which is only
//! ever a display hint.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// The analytic features, each with its own cache and coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Feature {
    /// Next-token entropy.
    Entropy,
    /// Top-1/top-2 margin (ghost text).
    Ghost,
    /// Expected closing bracket.
    Autopanic,
    /// Perturbation saliency.
    Saliency,
}

impl Feature {
    pub const ALL: [Feature; 4] = [
        Feature::Entropy,
        Feature::Ghost,
        Feature::Autopanic,
        Feature::Saliency,
    ];

    /// Stable tag used in cache keys, routes and metric labels.
    pub fn tag(&self) -> &'static str {
        match self {
            Feature::Entropy => "entropy",
            Feature::Ghost => "ghost",
            Feature::Autopanic => "autopanic",
            Feature::Saliency => "saliency",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|f| f.tag() == s)
            .ok_or_else(|| format!("unknown feature: {s}"))
    }
}

/// Order-sensitive, non-cryptographic string hash.
pub fn content_hash(text: &str) -> u64 {
    fnv1a(FNV_OFFSET_BASIS, text.as_bytes())
}

fn fnv1a(mut hash: u64, bytes: &[u8]) -> u64 {
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Normalize editor text before hashing: CRLF and lone CR become LF.
pub fn normalize_text(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

/// `"{feature}:{hash}"` cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a prefix-driven feature.
    pub fn for_prefix(feature: Feature, prefix: &str) -> Self {
        let hash = content_hash(&normalize_text(prefix));
        Self(format!("{}:{hash:016x}", feature.tag()))
    }

    /// Key for a cursor-driven feature: full text plus cursor position.
    pub fn for_cursor(feature: Feature, code: &str, line: u32, character: u32) -> Self {
        let text = normalize_text(code);
        let mut hash = content_hash(&text);
        hash = fnv1a(hash, &[0]);
        hash = fnv1a(hash, format!("{line}:{character}").as_bytes());
        Self(format!("{}:{hash:016x}", feature.tag()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv_reference_values() {
        assert_eq!(content_hash(""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(content_hash("a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[test]
    fn test_hash_is_order_sensitive() {
        assert_ne!(content_hash("ab"), content_hash("ba"));
    }

    #[test]
    fn test_same_prefix_same_key() {
        let a = CacheKey::for_prefix(Feature::Entropy, "def f(x):\n");
        let b = CacheKey::for_prefix(Feature::Entropy, "def f(x):\r\n");
        assert_eq!(a, b);
        assert!(a.as_str().starts_with("entropy:"));
    }

    #[test]
    fn test_feature_separates_keys() {
        let a = CacheKey::for_prefix(Feature::Entropy, "x");
        let b = CacheKey::for_prefix(Feature::Ghost, "x");
        assert_ne!(a, b);
    }

    #[test]
    fn test_cursor_position_separates_keys() {
        let a = CacheKey::for_cursor(Feature::Saliency, "x = 1", 1, 2);
        let b = CacheKey::for_cursor(Feature::Saliency, "x = 1", 1, 3);
        let c = CacheKey::for_cursor(Feature::Saliency, "x = 1", 1, 2);
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_feature_round_trip_tag() {
        for f in Feature::ALL {
            assert_eq!(f.tag().parse::<Feature>().unwrap(), f);
        }
        assert!("colors".parse::<Feature>().is_err());
    }
}
