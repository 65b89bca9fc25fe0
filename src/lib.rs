//! blipsub – the subscription/delivery core of a BlipMQ queue.
//!
//! This crate exports
//!  * `core`    – consumers, cursors, listener registry, queue, delivery tracking, sessions
//!  * `config`  – TOML-driven runtime configuration
//!  * `logging` – `tracing` subscriber setup
//!
//! A queue drives its consumers through the [`Consumer`] contract without
//! knowing which variant it talks to; sessions own the consumers and settle
//! their deliveries.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod config;
pub mod core;
pub mod logging;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use config::{load_config, Config};
pub use crate::core::consumer::{ClientConsumer, ClientOptions, Consumer, SystemConsumer};
pub use crate::core::error::SubscriptionError;
pub use crate::core::queue::{Queue, QueueSettings};
pub use crate::core::session::Session;
