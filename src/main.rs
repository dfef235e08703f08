//! Rota Scrape - Entry Point
//!
//! Loads the proxy pool and keeps it warm with the probe service until shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use rota_scrape::config::Config;
use rota_scrape::proxy::{ProxyPool, RetryExecutor};
use rota_scrape::services::{ProbeHandle, ProbeService};
use rota_scrape::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("invalid configuration")?;
    telemetry::init_tracing(&config.log)?;

    info!("Starting Rota Scrape");

    let endpoints = config.load_endpoints().context("failed to load proxy list")?;
    info!("Loaded {} proxies", endpoints.len());

    let pool = match ProxyPool::new(endpoints, config.pool_settings()) {
        Ok(pool) => Arc::new(pool),
        Err(e) => {
            error!("Cannot start: {}", e);
            return Err(e).context("proxy pool setup failed");
        }
    };
    info!(
        "Using rotation strategy {} with policy {}",
        pool.strategy_name(),
        pool.policy().as_str()
    );

    let (probe_handle, probe_shutdown) = ProbeHandle::new();
    let executor = RetryExecutor::new(pool.clone()).with_shutdown(probe_handle.subscribe());
    let probe = ProbeService::new(executor, config.probe.clone());
    let mut probe_task = tokio::spawn(async move {
        probe.run(probe_shutdown).await;
    });

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            probe_handle.shutdown();
            let _ = probe_task.await;
        }
        _ = &mut probe_task => {
            error!("Probe service stopped unexpectedly");
        }
    }

    let summary = pool.get_health_summary();
    info!(
        total = summary.total,
        healthy = summary.healthy,
        degraded = summary.degraded,
        unhealthy = summary.unhealthy,
        circuit_open = summary.circuit_open,
        success_rate = summary.overall_success_rate,
        "Final pool health"
    );
    if let Ok(stats) = serde_json::to_string(&pool.proxy_stats()) {
        info!(proxies = %stats, "Final proxy stats");
    }

    info!("Rota Scrape stopped");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
