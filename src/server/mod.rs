//! HTTP server exposing the coordinated analytics to editor extensions.
//!
//! - [`api`]: Route handlers and response types

pub mod api;
