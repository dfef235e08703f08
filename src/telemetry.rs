//! Tracing subscriber setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;
use crate::error::{Result, RotaError};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `LOG_LEVEL`. Output is JSON unless
/// `LOG_FORMAT=pretty`. Fails if a subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(&config.level)));

    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format.to_lowercase().as_str() {
        "pretty" | "text" => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };

    result.map_err(|e| RotaError::Internal(format!("failed to install tracing subscriber: {}", e)))
}

fn default_directive(level: &str) -> String {
    format!("rota_scrape={}", level.trim().to_lowercase())
}
