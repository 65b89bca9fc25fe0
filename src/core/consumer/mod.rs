//! Consumer module.
//!
//! The [`Consumer`] trait is the contract a queue drives; [`ConsumerCore`]
//! carries the state every variant shares. Variants:
//! - [`ClientConsumer`] – consuming or browsing subscription of a client session
//! - [`SystemConsumer`] – broker-internal subscription, not counted

pub mod client;
#[allow(clippy::module_inception)]
pub mod consumer;
pub mod name;
pub mod system;

pub use client::{ClientConsumer, ClientOptions, Delivery, Selector};
pub use consumer::{Consumer, ConsumerCore};
pub use name::ConsumerName;
pub use system::{SystemConsumer, SystemHandler};
