use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{HealthState, ProxyEndpoint, ProxyHealth};

/// Aggregate snapshot of a proxy pool, for periodic reporting
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthSummary {
    pub total: usize,
    pub healthy: usize,
    pub degraded: usize,
    pub unhealthy: usize,
    pub circuit_open: usize,
    /// Successful requests across all proxies, as a percentage (0-100)
    pub overall_success_rate: f64,
    pub available_count: usize,
}

impl HealthSummary {
    /// Count one proxy's state into the summary
    pub fn count(&mut self, state: HealthState) {
        self.total += 1;
        match state {
            HealthState::Healthy => self.healthy += 1,
            HealthState::Degraded => self.degraded += 1,
            HealthState::Unhealthy => self.unhealthy += 1,
            HealthState::CircuitOpen => self.circuit_open += 1,
        }
    }
}

/// Per-proxy statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ProxyStats {
    pub server: String,
    pub state: HealthState,
    pub health_score: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub consecutive_failures: u32,
    /// Success rate as percentage
    pub success_rate: f64,
    /// Average latency of successful requests in milliseconds
    pub average_latency_ms: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub circuit_open_until: Option<DateTime<Utc>>,
}

impl ProxyStats {
    pub fn new(endpoint: &ProxyEndpoint, health: &ProxyHealth) -> Self {
        let success_rate = if health.total_requests() == 0 {
            0.0
        } else {
            health.success_rate() * 100.0
        };

        Self {
            server: endpoint.server().to_string(),
            state: health.state(),
            health_score: health.health_score(),
            total_requests: health.total_requests(),
            successful_requests: health.successful_requests(),
            failed_requests: health.failed_requests(),
            consecutive_failures: health.consecutive_failures(),
            success_rate,
            average_latency_ms: health.average_latency() * 1000.0,
            last_success: health.last_success(),
            last_failure: health.last_failure(),
            circuit_open_until: health.circuit_open_until(),
        }
    }
}
