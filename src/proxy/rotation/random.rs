//! Random proxy selection strategy

use chrono::{DateTime, Utc};
use rand::Rng;

use super::{Candidate, ProxySelector};

/// Selects a random proxy from the available candidates
pub struct RandomSelector;

impl RandomSelector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RandomSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySelector for RandomSelector {
    fn select(&self, candidates: &[Candidate<'_>], _now: DateTime<Utc>) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let mut rng = rand::thread_rng();
        Some(rng.gen_range(0..candidates.len()))
    }

    fn strategy_name(&self) -> &'static str {
        "random"
    }
}
