//! Proxy probe service
//!
//! Periodically fetches a set of probe URLs through the retry executor so the
//! pool keeps learning about proxies between scrape runs, then logs the pool's
//! health summary.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::adapters::http::{robust_fetch, HttpFetcher};
use crate::error::{Result, RetryError, RotaError};
use crate::models::HealthSummary;
use crate::proxy::retry::RetryExecutor;

/// Probe service configuration
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// URLs fetched every round
    pub urls: Vec<String>,
    /// Interval between rounds
    pub interval: Duration,
    /// Per-request timeout
    pub timeout: Duration,
    /// Probes in flight at once
    pub concurrency: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            urls: vec!["https://www.example.com".to_string()],
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            concurrency: 4,
        }
    }
}

/// Outcome of one probe round
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub succeeded: usize,
    pub failed: usize,
    pub summary: HealthSummary,
}

pub struct ProbeService {
    executor: RetryExecutor,
    fetcher: HttpFetcher,
    config: ProbeConfig,
}

impl ProbeService {
    pub fn new(executor: RetryExecutor, config: ProbeConfig) -> Self {
        let fetcher = HttpFetcher::new(config.timeout);
        Self {
            executor,
            fetcher,
            config,
        }
    }

    /// Run until shutdown is signalled or the pool fails structurally.
    ///
    /// A round that finds every circuit open is skipped; circuits expire and
    /// later rounds pick the proxies up again.
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting probe service with {}s interval ({} urls)",
            self.config.interval.as_secs(),
            self.config.urls.len()
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.probe_round().await {
                        Ok(_) => {}
                        Err(RotaError::NoHealthyProxies) => {
                            warn!("Skipping probe round: all proxy circuits are open");
                        }
                        Err(e) => {
                            error!("Probe service stopping: {}", e);
                            break;
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Probe service shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Fetch every probe URL once.
    ///
    /// Individual failures only feed the pool's health records. A structural
    /// pool error is returned to the caller.
    pub async fn probe_round(&self) -> Result<ProbeReport> {
        let results = futures::stream::iter(self.config.urls.clone())
            .map(|url| async move { robust_fetch(&self.executor, &self.fetcher, &url).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        let mut succeeded = 0;
        let mut failed = 0;
        for result in results {
            match result {
                Ok(_) => succeeded += 1,
                Err(RetryError::Pool(e)) => return Err(e),
                Err(e) => {
                    warn!("Probe failed: {}", e);
                    failed += 1;
                }
            }
        }

        let summary = self.executor.pool().get_health_summary();
        info!(
            succeeded,
            failed,
            total = summary.total,
            healthy = summary.healthy,
            degraded = summary.degraded,
            unhealthy = summary.unhealthy,
            circuit_open = summary.circuit_open,
            available = summary.available_count,
            success_rate = summary.overall_success_rate,
            "Probe round complete"
        );

        Ok(ProbeReport {
            succeeded,
            failed,
            summary,
        })
    }
}

/// Guard for managing probe service lifecycle
pub struct ProbeHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ProbeHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Another receiver, e.g. for an executor that should stop with the service
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

impl Default for ProbeHandle {
    fn default() -> Self {
        Self::new().0
    }
}
