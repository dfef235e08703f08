//! Health-based proxy selection strategy

use chrono::{DateTime, Utc};

use super::{Candidate, ProxySelector};
use crate::models::ProxyHealth;

const HEALTH_WEIGHT: f64 = 0.7;
const SUCCESS_RATE_WEIGHT: f64 = 0.2;
const RECENCY_BONUS: f64 = 10.0;
const RECENCY_WINDOW_SECS: i64 = 300;

/// Picks the proxy with the best composite score:
/// `0.7 * health + 0.2 * success_rate% + 10 if it succeeded in the last five minutes`.
///
/// Ties go to the earliest proxy in pool order.
pub struct HealthBasedSelector;

impl HealthBasedSelector {
    pub fn new() -> Self {
        Self
    }

    pub fn score(health: &ProxyHealth, now: DateTime<Utc>) -> f64 {
        let recency_bonus = match health.last_success() {
            Some(at) if now.signed_duration_since(at).num_seconds() < RECENCY_WINDOW_SECS => {
                RECENCY_BONUS
            }
            _ => 0.0,
        };

        HEALTH_WEIGHT * health.health_score()
            + SUCCESS_RATE_WEIGHT * (health.success_rate() * 100.0)
            + recency_bonus
    }
}

impl Default for HealthBasedSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxySelector for HealthBasedSelector {
    fn select(&self, candidates: &[Candidate<'_>], now: DateTime<Utc>) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;

        for (idx, candidate) in candidates.iter().enumerate() {
            let score = Self::score(candidate.health, now);
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((idx, score)),
            }
        }

        best.map(|(idx, _)| idx)
    }

    fn strategy_name(&self) -> &'static str {
        "health_based"
    }
}
