//! Queue module.
//!
//! Holds the message sequence of one queue and drives its consumers:
//! - dispatch (`filter` → `accept` → `deliver`) under the queue lock
//! - acquisition, dequeue and release of messages
//! - listener registration and wake-ups
//! - exclusivity and deletion

#[allow(clippy::module_inception)]
pub mod queue;
pub mod stats;

pub use queue::{DeletionNotice, Dispatch, Dispatched, Queue, QueueSettings};
pub use stats::{QueueStats, QueueStatsSnapshot};
