use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::consumer::consumer::{Consumer, ConsumerCore};
use crate::core::consumer::name::ConsumerName;
use crate::core::cursor::{QueueCursor, SubscriptionType};
use crate::core::delivery::DeliveryRecord;
use crate::core::message::Message;
use crate::core::ownership::OwnershipToken;

/// Callback run for each delivered message. Returning `false` refuses it.
pub type SystemHandler = Box<dyn Fn(&QueueCursor, &Arc<Message>) -> bool + Send + Sync>;

/// Broker-internal subscription (replication feeds, diagnostics, bridges).
///
/// Not counted as a consumer, so it neither keeps an otherwise unused queue
/// alive nor hides the "no consumers" condition.
pub struct SystemConsumer {
    core: ConsumerCore,
    handler: SystemHandler,
    hide_deleted_error: bool,
    browse_acquired: bool,
    acknowledged: AtomicU64,
}

impl fmt::Debug for SystemConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemConsumer")
            .field("core", &self.core)
            .field("hide_deleted_error", &self.hide_deleted_error)
            .field("browse_acquired", &self.browse_acquired)
            .finish()
    }
}

impl SystemConsumer {
    pub fn new<F>(
        name: impl Into<ConsumerName>,
        kind: SubscriptionType,
        session: OwnershipToken,
        handler: F,
    ) -> Self
    where
        F: Fn(&QueueCursor, &Arc<Message>) -> bool + Send + Sync + 'static,
    {
        Self {
            core: ConsumerCore::new(name, kind, session),
            handler: Box::new(handler),
            hide_deleted_error: false,
            browse_acquired: false,
            acknowledged: AtomicU64::new(0),
        }
    }

    /// Replication-style subscription: sees acquired messages too and treats
    /// deletion of the queue as an expected event.
    pub fn replicating(mut self) -> Self {
        self.hide_deleted_error = true;
        self.browse_acquired = true;
        self
    }

    pub fn with_browse_acquired(mut self, enabled: bool) -> Self {
        self.browse_acquired = enabled;
        self
    }

    pub fn acknowledged_count(&self) -> u64 {
        self.acknowledged.load(Ordering::Relaxed)
    }
}

impl Consumer for SystemConsumer {
    fn core(&self) -> &ConsumerCore {
        &self.core
    }

    fn deliver(&self, cursor: &QueueCursor, message: &Arc<Message>) -> bool {
        self.core
            .deliver_with(cursor, || (self.handler)(cursor, message))
    }

    fn notify(&self) {
        self.core.signal();
    }

    fn cancel(&self) {
        self.core.cancel();
    }

    fn acknowledged(&self, record: &DeliveryRecord) {
        if record.consumer() != self.core.consumer_name() {
            warn!(
                target: "blipsub::consumer",
                consumer = %self.core.name(),
                record_consumer = %record.consumer(),
                "ignoring acknowledgment for another consumer's delivery"
            );
            return;
        }
        self.acknowledged.fetch_add(1, Ordering::Relaxed);
        debug!(target: "blipsub::consumer", consumer = %self.core.name(), position = %record.position(), "system delivery acknowledged");
    }

    fn browse_acquired(&self) -> bool {
        self.browse_acquired
    }

    fn hide_deleted_error(&self) -> bool {
        self.hide_deleted_error
    }

    fn is_counted(&self) -> bool {
        false
    }
}
