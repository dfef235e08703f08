use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, RotaError};
use crate::models::{HealthPolicy, ProxyEndpoint};
use crate::proxy::loader::{inline_list_to_lines, parse_proxy_list};
use crate::proxy::pool::{PoolSettings, ProxyPolicy};
use crate::proxy::retry::BackoffPolicy;
use crate::proxy::rotation::RotationStrategy;
use crate::services::ProbeConfig;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Proxy pool and retry configuration
    pub pool: PoolConfig,
    /// Probe service configuration
    pub probe: ProbeConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Line-oriented proxy list file
    pub proxy_file: Option<PathBuf>,
    /// Inline proxy list (comma or newline separated)
    pub proxy_list: Option<String>,
    /// Refuse to run without proxies
    pub require_proxies: bool,
    /// Run operations unproxied when no proxies are configured
    pub allow_direct_connection: bool,
    /// Deployment environment (production, development)
    pub app_env: String,
    pub rotation_strategy: RotationStrategy,
    /// Consecutive failures that open a proxy's circuit
    pub circuit_threshold: u32,
    pub circuit_timeout: Duration,
    pub backoff: BackoffPolicy,
    pub health: HealthPolicy,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let strategy_name = get_env_or("PROXY_ROTATION_STRATEGY", "health_based");
        let rotation_strategy = RotationStrategy::parse(&strategy_name).ok_or_else(|| {
            RotaError::InvalidConfig(format!(
                "PROXY_ROTATION_STRATEGY must be round_robin, health_based or random, got '{}'",
                strategy_name
            ))
        })?;

        let config = Config {
            pool: PoolConfig {
                proxy_file: get_env_opt("PROXY_FILE").map(PathBuf::from),
                proxy_list: get_env_opt("PROXY_LIST"),
                require_proxies: parse_bool("REQUIRE_PROXIES", true)?,
                allow_direct_connection: parse_bool("ALLOW_DIRECT_CONNECTION", false)?,
                app_env: get_env_or("APP_ENV", "production").to_lowercase(),
                rotation_strategy,
                circuit_threshold: parse_var("PROXY_CIRCUIT_THRESHOLD", "5")?,
                circuit_timeout: Duration::from_secs(parse_var("PROXY_CIRCUIT_TIMEOUT", "300")?),
                backoff: BackoffPolicy {
                    max_retries: parse_var("PROXY_MAX_RETRIES", "3")?,
                    initial_backoff: parse_secs("PROXY_INITIAL_BACKOFF", "1.0")?,
                    max_backoff: parse_secs("PROXY_MAX_BACKOFF", "60.0")?,
                    multiplier: parse_var("PROXY_BACKOFF_MULTIPLIER", "2.0")?,
                },
                health: HealthPolicy {
                    timeout_penalty: parse_var("PROXY_PENALTY_TIMEOUT", "3")?,
                    auth_penalty: parse_var("PROXY_PENALTY_AUTH", "10")?,
                    default_penalty: parse_var("PROXY_PENALTY_DEFAULT", "5")?,
                    heal_increment: parse_var("PROXY_HEAL_INCREMENT", "2")?,
                    healthy_threshold: parse_var("PROXY_HEALTHY_THRESHOLD", "70")?,
                    degraded_threshold: parse_var("PROXY_DEGRADED_THRESHOLD", "40")?,
                },
            },
            probe: ProbeConfig {
                urls: get_env_or("PROBE_URLS", "https://www.example.com")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                interval: Duration::from_secs(parse_var("PROBE_INTERVAL", "60")?),
                timeout: Duration::from_secs(parse_var("PROBE_TIMEOUT", "30")?),
                concurrency: parse_var("PROBE_CONCURRENCY", "4")?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "json"),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let pool = &self.pool;

        if pool.circuit_threshold < 1 {
            return Err(invalid("PROXY_CIRCUIT_THRESHOLD must be at least 1"));
        }
        if pool.backoff.max_retries < 1 {
            return Err(invalid("PROXY_MAX_RETRIES must be at least 1"));
        }
        if pool.backoff.multiplier.is_nan() || pool.backoff.multiplier < 1.0 {
            return Err(invalid("PROXY_BACKOFF_MULTIPLIER must be at least 1.0"));
        }
        if pool.backoff.initial_backoff > pool.backoff.max_backoff {
            return Err(invalid(
                "PROXY_INITIAL_BACKOFF must not exceed PROXY_MAX_BACKOFF",
            ));
        }

        let health = &pool.health;
        if !(0.0 <= health.degraded_threshold
            && health.degraded_threshold <= health.healthy_threshold
            && health.healthy_threshold <= 100.0)
        {
            return Err(invalid(
                "health thresholds must satisfy 0 <= PROXY_DEGRADED_THRESHOLD <= PROXY_HEALTHY_THRESHOLD <= 100",
            ));
        }
        for (name, value) in [
            ("PROXY_PENALTY_TIMEOUT", health.timeout_penalty),
            ("PROXY_PENALTY_AUTH", health.auth_penalty),
            ("PROXY_PENALTY_DEFAULT", health.default_penalty),
            ("PROXY_HEAL_INCREMENT", health.heal_increment),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(invalid(&format!("{} must be a non-negative number", name)));
            }
        }

        if self.probe.concurrency < 1 {
            return Err(invalid("PROBE_CONCURRENCY must be at least 1"));
        }
        if self.probe.interval.is_zero() {
            return Err(invalid("PROBE_INTERVAL must be at least 1 second"));
        }

        Ok(())
    }

    /// Whether this is a development deployment
    pub fn is_development(&self) -> bool {
        matches!(self.pool.app_env.as_str(), "development" | "dev")
    }

    /// Resolve the proxy policy.
    ///
    /// `REQUIRE_PROXIES` wins everywhere except development, where
    /// `ALLOW_DIRECT_CONNECTION=true` bypasses it.
    pub fn policy(&self) -> ProxyPolicy {
        let pool = &self.pool;
        if pool.require_proxies {
            if self.is_development() && pool.allow_direct_connection {
                warn!("Development mode: REQUIRE_PROXIES bypassed, direct connections allowed");
                ProxyPolicy::AllowDirect
            } else {
                ProxyPolicy::Required
            }
        } else if pool.allow_direct_connection {
            ProxyPolicy::AllowDirect
        } else {
            ProxyPolicy::Permissive
        }
    }

    /// Settings for [`crate::proxy::ProxyPool::new`]
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            strategy: self.pool.rotation_strategy,
            policy: self.policy(),
            circuit_threshold: self.pool.circuit_threshold,
            circuit_timeout: self.pool.circuit_timeout,
            backoff: self.pool.backoff.clone(),
            health: self.pool.health.clone(),
        }
    }

    /// Proxies from `PROXY_FILE` followed by `PROXY_LIST`, deduplicated by server
    pub fn load_endpoints(&self) -> Result<Vec<ProxyEndpoint>> {
        let mut combined = String::new();

        if let Some(path) = &self.pool.proxy_file {
            combined.push_str(&std::fs::read_to_string(path)?);
            combined.push('\n');
        }
        if let Some(list) = &self.pool.proxy_list {
            combined.push_str(&inline_list_to_lines(list));
        }

        Ok(parse_proxy_list(&combined))
    }
}

fn invalid(message: &str) -> RotaError {
    RotaError::InvalidConfig(message.to_string())
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get a non-blank environment variable
fn get_env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(key: &str, default: &str) -> Result<T> {
    let raw = get_env_or(key, default);
    raw.trim().parse().map_err(|_| {
        RotaError::InvalidConfig(format!("{} has an invalid value: '{}'", key, raw))
    })
}

fn parse_secs(key: &str, default: &str) -> Result<Duration> {
    let secs: f64 = parse_var(key, default)?;
    Duration::try_from_secs_f64(secs).map_err(|_| {
        RotaError::InvalidConfig(format!("{} must be a non-negative number of seconds", key))
    })
}

fn parse_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().to_lowercase().as_str() {
            "" => Ok(default),
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(RotaError::InvalidConfig(format!(
                "{} must be true or false, got '{}'",
                key, raw
            ))),
        },
    }
}
