//! Prefix-keyed result caching.
//!
//! - [`key`]: Feature tags and FNV-1a prefix keys
//! - [`feature_cache`]: Bounded TTL + LRU store, one per feature

pub mod feature_cache;
pub mod key;
