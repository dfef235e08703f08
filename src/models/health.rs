use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::proxy::classify::ErrorCategory;

/// Health state of a single proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
    CircuitOpen,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Degraded => "degraded",
            HealthState::Unhealthy => "unhealthy",
            HealthState::CircuitOpen => "circuit_open",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scoring constants for health tracking.
///
/// The defaults are tuned heuristics: authentication failures cost the most,
/// timeouts the least.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthPolicy {
    pub timeout_penalty: f64,
    pub auth_penalty: f64,
    pub default_penalty: f64,
    pub heal_increment: f64,
    /// Scores at or above this are healthy
    pub healthy_threshold: f64,
    /// Scores at or above this (and below healthy) are degraded
    pub degraded_threshold: f64,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            timeout_penalty: 3.0,
            auth_penalty: 10.0,
            default_penalty: 5.0,
            heal_increment: 2.0,
            healthy_threshold: 70.0,
            degraded_threshold: 40.0,
        }
    }
}

impl HealthPolicy {
    pub fn penalty_for(&self, category: &ErrorCategory) -> f64 {
        match category {
            ErrorCategory::Timeout => self.timeout_penalty,
            ErrorCategory::Authentication => self.auth_penalty,
            _ => self.default_penalty,
        }
    }

    pub fn state_for(&self, score: f64) -> HealthState {
        if score >= self.healthy_threshold {
            HealthState::Healthy
        } else if score >= self.degraded_threshold {
            HealthState::Degraded
        } else {
            HealthState::Unhealthy
        }
    }
}

pub const MAX_HEALTH_SCORE: f64 = 100.0;
pub const MIN_HEALTH_SCORE: f64 = 0.0;

/// Mutable reliability record for one proxy.
///
/// Owned by the pool and only touched under its lock. Invariants:
/// `total_requests == successful_requests + failed_requests`, the score stays
/// within `[0, 100]`, and `CircuitOpen` always comes with `circuit_open_until`.
#[derive(Debug, Clone)]
pub struct ProxyHealth {
    total_requests: u64,
    successful_requests: u64,
    failed_requests: u64,
    consecutive_failures: u32,
    health_score: f64,
    state: HealthState,
    circuit_open_until: Option<DateTime<Utc>>,
    last_success: Option<DateTime<Utc>>,
    last_failure: Option<DateTime<Utc>>,
    /// Mean latency of successful requests, in seconds
    average_latency: f64,
    /// Set when an open circuit expires; the next success restores full health state
    recovering: bool,
}

impl Default for ProxyHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl ProxyHealth {
    pub fn new() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            consecutive_failures: 0,
            health_score: MAX_HEALTH_SCORE,
            state: HealthState::Healthy,
            circuit_open_until: None,
            last_success: None,
            last_failure: None,
            average_latency: 0.0,
            recovering: false,
        }
    }

    pub fn record_success(&mut self, latency: Duration, policy: &HealthPolicy, now: DateTime<Utc>) {
        self.total_requests += 1;
        self.successful_requests += 1;
        self.consecutive_failures = 0;
        self.last_success = Some(now);

        // Incremental mean over successful requests
        let latency = latency.as_secs_f64();
        self.average_latency += (latency - self.average_latency) / self.successful_requests as f64;

        self.health_score = (self.health_score + policy.heal_increment).min(MAX_HEALTH_SCORE);

        if self.state == HealthState::CircuitOpen || self.recovering {
            self.state = HealthState::Healthy;
            self.circuit_open_until = None;
            self.recovering = false;
        } else {
            self.state = policy.state_for(self.health_score);
        }
    }

    pub fn record_failure(
        &mut self,
        category: &ErrorCategory,
        policy: &HealthPolicy,
        now: DateTime<Utc>,
    ) {
        self.total_requests += 1;
        self.failed_requests += 1;
        self.consecutive_failures += 1;
        self.last_failure = Some(now);

        self.health_score = (self.health_score - policy.penalty_for(category)).max(MIN_HEALTH_SCORE);

        // A concurrent caller may report a failure after the circuit opened; keep it open.
        if self.state != HealthState::CircuitOpen {
            self.state = policy.state_for(self.health_score);
        }
    }

    /// Whether the proxy may be handed out right now.
    ///
    /// Expires an elapsed circuit (the proxy drops to `Unhealthy` with its failure
    /// streak cleared) and opens the circuit once the streak reaches `threshold`.
    pub fn is_available(&mut self, threshold: u32, timeout: Duration, now: DateTime<Utc>) -> bool {
        if let Some(until) = self.circuit_open_until {
            if now < until {
                return false;
            }
            self.close_circuit();
        }

        !self.trip_if_needed(threshold, timeout, now)
    }

    /// Open the circuit if the failure streak reached `threshold`. Returns true if it opened.
    pub fn trip_if_needed(&mut self, threshold: u32, timeout: Duration, now: DateTime<Utc>) -> bool {
        if self.state == HealthState::CircuitOpen {
            return false;
        }
        if self.consecutive_failures >= threshold.max(1) {
            self.open_circuit(timeout, now);
            return true;
        }
        false
    }

    pub fn open_circuit(&mut self, timeout: Duration, now: DateTime<Utc>) {
        let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::days(365));
        self.state = HealthState::CircuitOpen;
        self.circuit_open_until = Some(now + timeout);
        self.recovering = false;
    }

    /// Administrative reset: drop any open circuit and give the proxy another chance.
    /// Returns true if a circuit was actually open.
    pub fn reset_circuit(&mut self) -> bool {
        let was_open = self.circuit_open_until.is_some() || self.state == HealthState::CircuitOpen;
        if was_open {
            self.close_circuit();
        }
        was_open
    }

    fn close_circuit(&mut self) {
        self.circuit_open_until = None;
        self.state = HealthState::Unhealthy;
        self.consecutive_failures = 0;
        self.recovering = true;
    }

    /// Success ratio in `[0, 1]`; untried proxies count as fully successful
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    pub fn successful_requests(&self) -> u64 {
        self.successful_requests
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn health_score(&self) -> f64 {
        self.health_score
    }

    pub fn state(&self) -> HealthState {
        self.state
    }

    pub fn circuit_open_until(&self) -> Option<DateTime<Utc>> {
        self.circuit_open_until
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.last_success
    }

    pub fn last_failure(&self) -> Option<DateTime<Utc>> {
        self.last_failure
    }

    pub fn average_latency(&self) -> f64 {
        self.average_latency
    }

    #[cfg(test)]
    pub(crate) fn set_score_for_test(&mut self, score: f64, last_success: Option<DateTime<Utc>>) {
        self.health_score = score;
        self.last_success = last_success;
    }
}
