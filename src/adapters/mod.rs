//! Transport adapters
//!
//! Adapters bind a concrete client to the proxy chosen for an attempt and
//! translate the client's native errors into typed crate errors.

pub mod http;

pub use http::{map_reqwest_error, robust_fetch, HttpFetcher, HttpSessionProvider};
