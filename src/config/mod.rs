//! TOML-driven runtime configuration.
//!
//! Precedence: built-in defaults, then the TOML file, then `BLIPSUB_*`
//! environment variables.

use anyhow::Context;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::{env, fs, path::Path};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of messages held per queue (0 = unbounded).
    pub max_queue_depth: usize,
    pub auto_delete: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 10_000,
            auto_delete: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Prefix for broker-generated consumer names.
    pub name_prefix: String,
    /// Bound of each client consumer's delivery channel.
    pub delivery_capacity: usize,
    /// Initial credit window for client consumers (0 = unlimited).
    pub default_credit: u32,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            name_prefix: "sub".to_string(),
            delivery_capacity: 1024,
            default_credit: 0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub queues: QueueConfig,
    pub consumers: ConsumerConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Applies `BLIPSUB_*` environment overrides on top of the loaded values.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by `BLIPSUB_*` variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("BLIPSUB_MAX_QUEUE_DEPTH") {
            self.queues.max_queue_depth = v
                .parse()
                .with_context(|| format!("BLIPSUB_MAX_QUEUE_DEPTH: invalid value '{v}'"))?;
        }

        if let Some(v) = lookup("BLIPSUB_AUTO_DELETE") {
            self.queues.auto_delete =
                matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on");
        }

        if let Some(v) = lookup("BLIPSUB_NAME_PREFIX") {
            self.consumers.name_prefix = v;
        }

        if let Some(v) = lookup("BLIPSUB_DELIVERY_CAPACITY") {
            self.consumers.delivery_capacity = v
                .parse()
                .with_context(|| format!("BLIPSUB_DELIVERY_CAPACITY: invalid value '{v}'"))?;
        }

        if let Some(v) = lookup("BLIPSUB_DEFAULT_CREDIT") {
            self.consumers.default_credit = v
                .parse()
                .with_context(|| format!("BLIPSUB_DEFAULT_CREDIT: invalid value '{v}'"))?;
        }

        if let Some(v) = lookup("BLIPSUB_LOG_LEVEL") {
            self.logging.level = v;
        }

        Ok(())
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    let path = path.as_ref();
    let raw: String = fs::read_to_string(path)
        .with_context(|| format!("failed to read config '{}'", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config '{}'", path.display()))?;
    Ok(config)
}

/// Process-wide configuration: `BLIPSUB_CONFIG` (or `blipsub.toml`) plus
/// environment overrides, falling back to defaults when no file is present.
pub static CONFIG: Lazy<Config> = Lazy::new(|| {
    let path = env::var("BLIPSUB_CONFIG").unwrap_or_else(|_| "blipsub.toml".to_string());
    let mut config = match load_config(&path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::debug!(target: "blipsub::config", path = %path, error = %e, "using default configuration");
            Config::default()
        }
    };
    if let Err(e) = config.apply_env_overrides() {
        tracing::warn!(target: "blipsub::config", error = %e, "ignoring environment overrides");
    }
    config
});
