//! Delivery records and the tracker that owns them until acknowledgment.

use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::core::consumer::{Consumer, ConsumerName};
use crate::core::cursor::QueueCursor;
use crate::core::error::SubscriptionError;
use crate::core::message::{Message, SequenceNumber};
use crate::core::ownership::OwnershipToken;
use crate::core::queue::{Dispatched, Queue};

/// Whether deliveries must be confirmed by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckMode {
    /// Each delivery is tracked until acknowledged or released.
    Explicit,
    /// Fire and forget: acquired messages are dequeued on delivery.
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeliveryId(u64);

impl DeliveryId {
    pub fn value(self) -> u64 {
        self.0
    }

    pub fn from_raw(value: u64) -> Self {
        DeliveryId(value)
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One message handed to one consumer and not yet acknowledged.
#[derive(Debug, Clone)]
pub struct DeliveryRecord {
    id: DeliveryId,
    consumer: ConsumerName,
    session: OwnershipToken,
    queue: String,
    cursor: QueueCursor,
    message: Arc<Message>,
    acquired: bool,
}

impl DeliveryRecord {
    pub fn id(&self) -> DeliveryId {
        self.id
    }

    pub fn consumer(&self) -> &ConsumerName {
        &self.consumer
    }

    pub fn session(&self) -> OwnershipToken {
        self.session
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Cursor of the consumer at the moment of delivery.
    pub fn cursor(&self) -> QueueCursor {
        self.cursor
    }

    pub fn position(&self) -> SequenceNumber {
        self.cursor.position()
    }

    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }
}

struct Tracked {
    record: DeliveryRecord,
    consumer: Arc<dyn Consumer>,
    queue: Arc<Queue>,
}

/// Outstanding deliveries of one session.
///
/// A tracked record keeps its consumer alive, so a cancelled consumer lives
/// until its last in-flight delivery is settled.
#[derive(Default)]
pub struct DeliveryTracker {
    next_id: AtomicU64,
    outstanding: DashMap<DeliveryId, Tracked>,
}

impl fmt::Debug for DeliveryTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryTracker")
            .field("outstanding", &self.outstanding.len())
            .finish()
    }
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the record for a successful dispatch. Ids are never reused.
    pub fn record(
        &self,
        consumer: &Arc<dyn Consumer>,
        queue: &Arc<Queue>,
        dispatched: &Dispatched,
    ) -> DeliveryRecord {
        let id = DeliveryId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let record = DeliveryRecord {
            id,
            consumer: consumer.core().consumer_name().clone(),
            session: consumer.session(),
            queue: queue.name().to_string(),
            cursor: dispatched.cursor,
            message: Arc::clone(&dispatched.message),
            acquired: dispatched.acquired,
        };
        self.outstanding.insert(
            id,
            Tracked {
                record: record.clone(),
                consumer: Arc::clone(consumer),
                queue: Arc::clone(queue),
            },
        );
        record
    }

    pub fn get(&self, id: DeliveryId) -> Option<DeliveryRecord> {
        self.outstanding.get(&id).map(|t| t.record.clone())
    }

    /// Retires the record: the consumer is told, and an acquired message
    /// leaves the queue for good.
    pub fn acknowledge(&self, id: DeliveryId) -> Result<DeliveryRecord, SubscriptionError> {
        let (_, tracked) = self
            .outstanding
            .remove(&id)
            .ok_or(SubscriptionError::UnknownDelivery(id.value()))?;

        tracked.consumer.acknowledged(&tracked.record);
        if tracked.record.acquired && !tracked.queue.dequeue(tracked.record.position()) {
            debug!(
                target: "blipsub::delivery",
                delivery = %id,
                position = %tracked.record.position(),
                "acknowledged message was already gone from the queue"
            );
        }
        Ok(tracked.record)
    }

    /// Drops the record without acknowledging; an acquired message becomes
    /// available again.
    pub fn release(&self, id: DeliveryId) -> Result<DeliveryRecord, SubscriptionError> {
        let (_, tracked) = self
            .outstanding
            .remove(&id)
            .ok_or(SubscriptionError::UnknownDelivery(id.value()))?;

        tracked.consumer.released(&tracked.record);
        if tracked.record.acquired {
            tracked.queue.release(tracked.record.position());
        }
        Ok(tracked.record)
    }

    /// Releases every outstanding record; returns how many there were.
    pub fn release_all(&self) -> usize {
        let ids: Vec<DeliveryId> = self.outstanding.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.release(*id).is_ok()).count()
    }

    /// Outstanding delivery ids of one consumer, oldest first.
    pub fn outstanding_for(&self, consumer: &str) -> Vec<DeliveryId> {
        let mut ids: Vec<DeliveryId> = self
            .outstanding
            .iter()
            .filter(|e| e.value().record.consumer.as_str() == consumer)
            .map(|e| *e.key())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}
