//! Rota Scrape - proxy-aware retry layer for scrapers
//!
//! Runs caller-supplied operations through a shared pool of upstream proxies.
//!
//! ## Features
//!
//! - Per-proxy health scores with circuit breaking
//! - Rotation strategies (health-based, round-robin, random)
//! - Bounded retries with exponential backoff, async and blocking
//! - Per-attempt sessions for flows that bind a proxy to a live connection
//! - Strict proxy policy with a development-only direct-connection bypass
//! - reqwest adapter and a background probe service

pub mod adapters;
pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod services;
pub mod telemetry;

pub use config::Config;
pub use error::{Result, RetryError, RotaError};
pub use models::{HealthState, HealthSummary, ProxyEndpoint, ProxyStats};
pub use proxy::{
    BackoffPolicy, Classify, ErrorCategory, PoolSettings, ProxyPolicy, ProxyPool, RetryExecutor,
    RotationStrategy, SessionProvider,
};
