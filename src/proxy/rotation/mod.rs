//! Proxy rotation strategies
//!
//! This module provides various strategies for selecting proxies from the pool.
//! Selectors only see proxies that are currently available; the pool filters out
//! open circuits before asking.

mod health_based;
mod random;
mod round_robin;

pub use health_based::HealthBasedSelector;
pub use random::RandomSelector;
pub use round_robin::RoundRobinSelector;

use chrono::{DateTime, Utc};

use crate::models::{ProxyEndpoint, ProxyHealth};

/// Strategy types for proxy rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    #[default]
    HealthBased,
    RoundRobin,
    Random,
}

impl RotationStrategy {
    /// Parse a strategy name, falling back to the default for unknown names
    pub fn from_str(s: &str) -> Self {
        Self::parse(s).unwrap_or_default()
    }

    /// Parse a strategy name, rejecting unknown names
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "round_robin" | "roundrobin" | "round-robin" => Some(Self::RoundRobin),
            "health_based" | "healthbased" | "health-based" | "health" => Some(Self::HealthBased),
            "random" => Some(Self::Random),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthBased => "health_based",
            Self::RoundRobin => "round_robin",
            Self::Random => "random",
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An available proxy offered to a selector
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub endpoint: &'a ProxyEndpoint,
    pub health: &'a ProxyHealth,
}

/// Trait for proxy selection strategies
///
/// Implementations of this trait provide different algorithms for
/// picking one proxy out of the available candidates. They are called with
/// the pool lock held, so they must not block.
pub trait ProxySelector: Send + Sync {
    /// Pick a candidate, returning its index in `candidates`
    ///
    /// Returns `None` only if `candidates` is empty
    fn select(&self, candidates: &[Candidate<'_>], now: DateTime<Utc>) -> Option<usize>;

    /// Get the strategy name
    fn strategy_name(&self) -> &'static str;
}

/// Create a proxy selector based on the strategy type
pub fn create_selector(strategy: RotationStrategy) -> Box<dyn ProxySelector> {
    match strategy {
        RotationStrategy::HealthBased => Box::new(HealthBasedSelector::new()),
        RotationStrategy::RoundRobin => Box::new(RoundRobinSelector::new()),
        RotationStrategy::Random => Box::new(RandomSelector::new()),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn endpoints(count: usize) -> Vec<ProxyEndpoint> {
        (0..count)
            .map(|i| ProxyEndpoint::from_host_port("http", "127.0.0.1", 8081 + i as u16))
            .collect()
    }

    pub fn candidates<'a>(
        endpoints: &'a [ProxyEndpoint],
        health: &'a [ProxyHealth],
    ) -> Vec<Candidate<'a>> {
        endpoints
            .iter()
            .zip(health.iter())
            .map(|(endpoint, health)| Candidate { endpoint, health })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_strategy_from_str() {
        assert_eq!(
            RotationStrategy::from_str("random"),
            RotationStrategy::Random
        );
        assert_eq!(
            RotationStrategy::from_str("round-robin"),
            RotationStrategy::RoundRobin
        );
        assert_eq!(
            RotationStrategy::from_str("Health_Based"),
            RotationStrategy::HealthBased
        );
        assert_eq!(
            RotationStrategy::from_str("unknown"),
            RotationStrategy::HealthBased
        );
        assert_eq!(RotationStrategy::parse("least_conn"), None);
    }

    #[test]
    fn test_rotation_strategy_as_str() {
        assert_eq!(RotationStrategy::HealthBased.as_str(), "health_based");
        assert_eq!(RotationStrategy::RoundRobin.as_str(), "round_robin");
        assert_eq!(RotationStrategy::Random.as_str(), "random");
    }

    #[test]
    fn test_create_selector_strategy_name() {
        assert_eq!(
            create_selector(RotationStrategy::HealthBased).strategy_name(),
            "health_based"
        );
        assert_eq!(
            create_selector(RotationStrategy::RoundRobin).strategy_name(),
            "round_robin"
        );
        assert_eq!(
            create_selector(RotationStrategy::Random).strategy_name(),
            "random"
        );
    }

    #[test]
    fn test_selectors_return_none_for_no_candidates() {
        let now = Utc::now();
        for strategy in [
            RotationStrategy::HealthBased,
            RotationStrategy::RoundRobin,
            RotationStrategy::Random,
        ] {
            assert_eq!(create_selector(strategy).select(&[], now), None);
        }
    }
}
