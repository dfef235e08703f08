//! Proxy pool with health tracking and circuit breaking
//!
//! The pool owns one [`ProxyHealth`] record per endpoint. All mutation happens
//! under a single mutex so concurrent scrape operations can share one pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Result, RotaError};
use crate::models::{HealthPolicy, HealthSummary, ProxyEndpoint, ProxyHealth, ProxyStats};
use crate::proxy::classify::ErrorCategory;
use crate::proxy::retry::BackoffPolicy;
use crate::proxy::rotation::{create_selector, Candidate, ProxySelector, RotationStrategy};

/// What to do when there is no proxy to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyPolicy {
    /// Proxies are mandatory: an empty pool is fatal at construction
    Required,
    /// An empty pool is allowed, but operations fail with a structural error
    #[default]
    Permissive,
    /// An empty pool runs operations with a direct (unproxied) connection
    AllowDirect,
}

impl ProxyPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyPolicy::Required => "required",
            ProxyPolicy::Permissive => "permissive",
            ProxyPolicy::AllowDirect => "allow_direct",
        }
    }
}

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub strategy: RotationStrategy,
    pub policy: ProxyPolicy,
    /// Consecutive failures that open a proxy's circuit
    pub circuit_threshold: u32,
    /// How long an open circuit keeps the proxy out of rotation
    pub circuit_timeout: Duration,
    /// Default retry/backoff for executors built on this pool
    pub backoff: BackoffPolicy,
    pub health: HealthPolicy,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::default(),
            policy: ProxyPolicy::default(),
            circuit_threshold: 5,
            circuit_timeout: Duration::from_secs(300),
            backoff: BackoffPolicy::default(),
            health: HealthPolicy::default(),
        }
    }
}

struct PoolEntry {
    endpoint: Arc<ProxyEndpoint>,
    health: ProxyHealth,
}

#[derive(Default)]
struct PoolState {
    entries: Vec<PoolEntry>,
    /// server -> index into `entries`
    index: HashMap<String, usize>,
}

impl PoolState {
    fn entry_mut(&mut self, endpoint: &ProxyEndpoint) -> Option<&mut PoolEntry> {
        let idx = *self.index.get(endpoint.server())?;
        self.entries.get_mut(idx)
    }
}

/// A shared pool of upstream proxies
pub struct ProxyPool {
    state: Mutex<PoolState>,
    selector: Box<dyn ProxySelector>,
    settings: PoolSettings,
}

impl ProxyPool {
    /// Create a pool over `endpoints`.
    ///
    /// Fails with [`RotaError::ProxiesRequired`] if the list is empty under
    /// [`ProxyPolicy::Required`]. Duplicate servers are dropped.
    pub fn new(endpoints: Vec<ProxyEndpoint>, settings: PoolSettings) -> Result<Self> {
        if endpoints.is_empty() && settings.policy == ProxyPolicy::Required {
            error!("Proxy policy requires proxies but none are configured");
            return Err(RotaError::ProxiesRequired);
        }

        let mut state = PoolState::default();
        for endpoint in endpoints {
            if state.index.contains_key(endpoint.server()) {
                warn!("Skipping duplicate proxy {}", endpoint);
                continue;
            }
            state
                .index
                .insert(endpoint.server().to_string(), state.entries.len());
            state.entries.push(PoolEntry {
                endpoint: Arc::new(endpoint),
                health: ProxyHealth::new(),
            });
        }

        if state.entries.is_empty() {
            warn!(
                "Proxy pool is empty (policy: {})",
                settings.policy.as_str()
            );
        } else {
            info!(
                "Proxy pool ready with {} proxies (strategy: {}, circuit threshold: {}, timeout: {}s)",
                state.entries.len(),
                settings.strategy.as_str(),
                settings.circuit_threshold,
                settings.circuit_timeout.as_secs()
            );
        }

        Ok(Self {
            state: Mutex::new(state),
            selector: create_selector(settings.strategy),
            settings,
        })
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn policy(&self) -> ProxyPolicy {
        self.settings.policy
    }

    pub fn strategy(&self) -> RotationStrategy {
        self.settings.strategy
    }

    pub fn strategy_name(&self) -> &'static str {
        self.selector.strategy_name()
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Select the next proxy to use, or `None` if every proxy is circuit-broken
    /// (or the pool is empty). The caller decides whether that is fatal.
    pub fn get_next_proxy(&self) -> Option<Arc<ProxyEndpoint>> {
        self.get_next_proxy_at(Utc::now())
    }

    pub(crate) fn get_next_proxy_at(&self, now: DateTime<Utc>) -> Option<Arc<ProxyEndpoint>> {
        let mut state = self.state.lock();
        let threshold = self.settings.circuit_threshold;
        let timeout = self.settings.circuit_timeout;

        let available: Vec<usize> = state
            .entries
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, entry)| entry.health.is_available(threshold, timeout, now).then_some(idx))
            .collect();

        if available.is_empty() {
            if !state.entries.is_empty() {
                warn!("No available proxies: all {} circuits are open", state.entries.len());
            }
            return None;
        }

        let candidates: Vec<Candidate<'_>> = available
            .iter()
            .map(|&idx| Candidate {
                endpoint: &state.entries[idx].endpoint,
                health: &state.entries[idx].health,
            })
            .collect();

        let picked = self.selector.select(&candidates, now)?;
        let entry = &state.entries[available[picked]];
        info!(
            "Rotating to proxy {} (state: {}, health: {:.1}, strategy: {})",
            entry.endpoint,
            entry.health.state(),
            entry.health.health_score(),
            self.selector.strategy_name()
        );

        Some(entry.endpoint.clone())
    }

    /// Record a successful request through `endpoint`
    pub fn mark_success(&self, endpoint: &ProxyEndpoint, latency: Duration) {
        self.mark_success_at(endpoint, latency, Utc::now());
    }

    pub(crate) fn mark_success_at(&self, endpoint: &ProxyEndpoint, latency: Duration, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        let Some(entry) = state.entry_mut(endpoint) else {
            debug!("Ignoring success for unknown proxy {}", endpoint);
            return;
        };

        let was = entry.health.state();
        entry.health.record_success(latency, &self.settings.health, now);
        info!(
            "Proxy {} succeeded in {}ms (health: {:.1}, state: {} -> {})",
            entry.endpoint,
            latency.as_millis(),
            entry.health.health_score(),
            was,
            entry.health.state()
        );
    }

    /// Record a failed request through `endpoint`. Opens the proxy's circuit once
    /// its failure streak reaches the configured threshold.
    pub fn mark_failure(&self, endpoint: &ProxyEndpoint, category: &ErrorCategory) {
        self.mark_failure_at(endpoint, category, Utc::now());
    }

    pub(crate) fn mark_failure_at(
        &self,
        endpoint: &ProxyEndpoint,
        category: &ErrorCategory,
        now: DateTime<Utc>,
    ) {
        let mut state = self.state.lock();
        let Some(entry) = state.entry_mut(endpoint) else {
            debug!("Ignoring failure for unknown proxy {}", endpoint);
            return;
        };

        entry.health.record_failure(category, &self.settings.health, now);
        let opened = entry.health.trip_if_needed(
            self.settings.circuit_threshold,
            self.settings.circuit_timeout,
            now,
        );

        if opened {
            warn!(
                proxy = %entry.endpoint,
                consecutive_failures = entry.health.consecutive_failures(),
                reopen_at = ?entry.health.circuit_open_until(),
                "Circuit breaker opened for proxy"
            );
        } else {
            warn!(
                "Proxy {} failed ({}), health: {:.1}, state: {}, consecutive failures: {}",
                entry.endpoint,
                category,
                entry.health.health_score(),
                entry.health.state(),
                entry.health.consecutive_failures()
            );
        }
    }

    /// Aggregate snapshot of the pool
    pub fn get_health_summary(&self) -> HealthSummary {
        self.health_summary_at(Utc::now())
    }

    pub(crate) fn health_summary_at(&self, now: DateTime<Utc>) -> HealthSummary {
        let mut state = self.state.lock();
        let threshold = self.settings.circuit_threshold;
        let timeout = self.settings.circuit_timeout;

        let mut summary = HealthSummary::default();
        let mut total_requests = 0u64;
        let mut successful_requests = 0u64;

        for entry in state.entries.iter_mut() {
            if entry.health.is_available(threshold, timeout, now) {
                summary.available_count += 1;
            }
            summary.count(entry.health.state());
            total_requests += entry.health.total_requests();
            successful_requests += entry.health.successful_requests();
        }

        summary.overall_success_rate = if total_requests == 0 {
            0.0
        } else {
            successful_requests as f64 / total_requests as f64 * 100.0
        };

        summary
    }

    /// Per-proxy statistics, in pool order
    pub fn proxy_stats(&self) -> Vec<ProxyStats> {
        self.state
            .lock()
            .entries
            .iter()
            .map(|entry| ProxyStats::new(&entry.endpoint, &entry.health))
            .collect()
    }

    /// Close every open circuit so all proxies become eligible again.
    /// Returns the number of circuits that were reset.
    pub fn reset_circuit_breakers(&self) -> usize {
        let mut state = self.state.lock();
        let reset = state
            .entries
            .iter_mut()
            .map(|entry| entry.health.reset_circuit())
            .filter(|&was_open| was_open)
            .count();

        if reset > 0 {
            info!("Reset {} open circuit breaker(s)", reset);
        }
        reset
    }
}
