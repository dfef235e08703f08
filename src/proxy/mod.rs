//! Proxy rotation core
//!
//! This module provides:
//! - The shared proxy pool with per-proxy health and circuit breaking
//! - Rotation strategies (health-based, round-robin, random)
//! - The retry executor that drives operations through the pool
//! - Error classification and per-attempt session hooks for transport adapters

pub mod classify;
pub mod loader;
pub mod pool;
pub mod retry;
pub mod rotation;
pub mod session;

pub use classify::{Classify, ErrorCategory};
pub use loader::{inline_list_to_lines, load_proxy_file, parse_proxy_list};
pub use pool::{PoolSettings, ProxyPolicy, ProxyPool};
pub use retry::{BackoffPolicy, RetryExecutor};
pub use rotation::{create_selector, ProxySelector, RotationStrategy};
pub use session::SessionProvider;
