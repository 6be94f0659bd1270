//! Logging initialization.

use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, EnvFilter, Registry};

use crate::settings::LoggingConfig;

/// Build the filter: `RUST_LOG` if set, else the configured level.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow!("Invalid log filter '{}': {}", config.level, e))
}

/// Install the global subscriber. Call once, before the kernel starts.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;

    match config.format.as_str() {
        "json" => {
            let subscriber = Registry::default()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json().with_target(true));
            tracing::subscriber::set_global_default(subscriber)?;
        }
        _ => {
            let subscriber = Registry::default()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_target(false));
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    tracing::info!("Logging initialized ({} format)", config.format);
    Ok(())
}
