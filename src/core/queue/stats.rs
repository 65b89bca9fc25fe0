use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-queue delivery counters.
#[derive(Debug, Default)]
pub struct QueueStats {
    pub enqueued: AtomicU64,
    pub rejected: AtomicU64,
    pub delivered: AtomicU64,
    pub acquired: AtomicU64,
    pub dequeued: AtomicU64,
    pub released: AtomicU64,
    pub expired: AtomicU64,
    pub notifications: AtomicU64,
}

/// Serializable snapshot of [`QueueStats`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatsSnapshot {
    pub enqueued: u64,
    pub rejected: u64,
    pub delivered: u64,
    pub acquired: u64,
    pub dequeued: u64,
    pub released: u64,
    pub expired: u64,
    pub notifications: u64,
}

impl QueueStats {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> QueueStatsSnapshot {
        QueueStatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            acquired: self.acquired.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            notifications: self.notifications.load(Ordering::Relaxed),
        }
    }
}
