//! Round-robin proxy selection strategy

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

use super::{Candidate, ProxySelector};

/// Selects proxies in round-robin order
///
/// The index is kept across calls and wraps over however many candidates are
/// available at the time of the call.
pub struct RoundRobinSelector {
    index: AtomicUsize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self {
            index: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySelector for RoundRobinSelector {
    fn select(&self, candidates: &[Candidate<'_>], _now: DateTime<Utc>) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        // Atomically increment and get the previous value, then wrap around
        Some(self.index.fetch_add(1, Ordering::Relaxed) % candidates.len())
    }

    fn strategy_name(&self) -> &'static str {
        "round_robin"
    }
}
