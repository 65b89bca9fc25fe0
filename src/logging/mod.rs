use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::config::CONFIG;

/// Installs the global subscriber using the configured default level.
pub fn init_logging() -> anyhow::Result<()> {
    init_logging_with(&CONFIG.logging.level)
}

/// Installs the global subscriber; `RUST_LOG` takes precedence over `default_level`.
pub fn init_logging_with(default_level: &str) -> anyhow::Result<()> {
    let filter: EnvFilter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let formatting_layer = fmt::layer()
        .with_timer(UtcTime::rfc_3339())
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_target(true)
        .compact();

    let subscriber = Registry::default().with(filter).with(formatting_layer);

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("failed to set global subscriber: {e}"))
}
