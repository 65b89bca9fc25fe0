use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

use crate::config::QueueConfig;
use crate::core::consumer::{Consumer, ConsumerCore, ConsumerName};
use crate::core::cursor::{CursorState, QueueCursor, SubscriptionType};
use crate::core::error::SubscriptionError;
use crate::core::listeners::{NotificationSet, QueueListeners};
use crate::core::message::{current_timestamp, Message, SequenceNumber};
use crate::core::ownership::OwnershipToken;
use crate::core::queue::stats::{QueueStats, QueueStatsSnapshot};

#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// Maximum number of held messages (0 = unbounded).
    pub max_depth: usize,
    /// Report the queue as deletable once its last counted consumer leaves.
    pub auto_delete: bool,
}

impl Default for QueueSettings {
    fn default() -> Self {
        QueueSettings::from(&QueueConfig::default())
    }
}

impl From<&QueueConfig> for QueueSettings {
    fn from(cfg: &QueueConfig) -> Self {
        Self {
            max_depth: cfg.max_queue_depth,
            auto_delete: cfg.auto_delete,
        }
    }
}

/// A successful hand-off produced by [`Queue::dispatch`].
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub position: SequenceNumber,
    /// Cursor the consumer adopted for this delivery.
    pub cursor: QueueCursor,
    pub message: Arc<Message>,
    /// The message was acquired and is no longer available to others.
    pub acquired: bool,
}

#[derive(Debug, Clone)]
pub enum Dispatch {
    Delivered(Dispatched),
    /// Nothing deliverable; the consumer now waits in the listener registry.
    Empty,
    /// A message was available but `accept` or `deliver` turned it down.
    Refused,
    /// The consumer has been cancelled.
    Cancelled,
}

/// Outcome of queue deletion for one attached consumer.
#[derive(Debug, Clone)]
pub struct DeletionNotice {
    pub consumer: String,
    pub session: OwnershipToken,
    /// Error to surface to the peer; `None` when the consumer hides it.
    pub error: Option<SubscriptionError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MessageState {
    Available,
    Acquired,
}

#[derive(Debug)]
struct QueuedMessage {
    message: Arc<Message>,
    state: MessageState,
}

#[derive(Debug, Default)]
struct QueueInner {
    messages: VecDeque<QueuedMessage>,
    last_sequence: SequenceNumber,
    /// Bumped whenever a message becomes available behind consuming cursors.
    version: u64,
    listeners: QueueListeners,
    consumers: Vec<Weak<dyn Consumer>>,
    exclusive: Option<(ConsumerName, OwnershipToken)>,
    ever_counted: bool,
    deleted: bool,
}

impl QueueInner {
    fn index_of(&self, position: SequenceNumber) -> Option<usize> {
        self.messages
            .binary_search_by_key(&position, |e| e.message.sequence)
            .ok()
    }

    fn live_consumers(&self) -> impl Iterator<Item = Arc<dyn Consumer>> + '_ {
        self.consumers.iter().filter_map(Weak::upgrade)
    }

    fn is_attached(&self, core: &ConsumerCore) -> bool {
        self.live_consumers().any(|c| std::ptr::eq(c.core(), core))
    }

    fn counted_consumers(&self) -> usize {
        self.live_consumers().filter(|c| c.is_counted()).count()
    }

    fn cursor_state(&self, cursor: &QueueCursor) -> CursorState {
        if !cursor.is_valid() || cursor.position() == SequenceNumber::ZERO {
            CursorState::Start
        } else if self.index_of(cursor.position()).is_some() {
            CursorState::At(cursor.position())
        } else {
            CursorState::Stale(cursor.position())
        }
    }
}

/// In-memory queue driving the consumer protocol.
///
/// All state sits behind one lock. `filter`, `accept` and `deliver` run under
/// it; listener wake-ups are sent after it is released.
#[derive(Debug)]
pub struct Queue {
    name: String,
    settings: QueueSettings,
    inner: Mutex<QueueInner>,
    stats: QueueStats,
}

impl Queue {
    pub fn new(name: impl Into<String>, settings: QueueSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            inner: Mutex::new(QueueInner::default()),
            stats: QueueStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Appends a message and wakes waiting listeners.
    pub fn enqueue(&self, mut message: Message) -> Result<SequenceNumber, SubscriptionError> {
        let (sequence, waiting) = {
            let mut inner = self.inner.lock();
            if inner.deleted {
                return Err(SubscriptionError::QueueDeleted(self.name.clone()));
            }
            if self.settings.max_depth > 0 && inner.messages.len() >= self.settings.max_depth {
                QueueStats::bump(&self.stats.rejected, 1);
                warn!(target: "blipsub::queue", queue = %self.name, depth = inner.messages.len(), "queue full, rejecting message");
                return Err(SubscriptionError::QueueFull);
            }

            inner.last_sequence = inner.last_sequence.next();
            let sequence = inner.last_sequence;
            message.sequence = sequence;
            inner.messages.push_back(QueuedMessage {
                message: Arc::new(message),
                state: MessageState::Available,
            });

            let mut waiting = NotificationSet::new();
            inner.listeners.populate(&mut waiting);
            (sequence, waiting)
        };

        QueueStats::bump(&self.stats.enqueued, 1);
        QueueStats::bump(&self.stats.notifications, waiting.len() as u64);
        trace!(target: "blipsub::queue", queue = %self.name, position = %sequence, woken = waiting.len(), "message enqueued");
        waiting.notify();
        Ok(sequence)
    }

    /// Attaches `consumer` to this queue.
    ///
    /// Names are unique among the queue's consumers. An exclusive
    /// subscription requires that no other session is attached, and while it
    /// lasts only its own session may attach.
    pub fn consume(
        self: &Arc<Self>,
        consumer: &Arc<dyn Consumer>,
        exclusive: bool,
    ) -> Result<(), SubscriptionError> {
        let mut inner = self.inner.lock();
        if inner.deleted {
            return Err(SubscriptionError::QueueDeleted(self.name.clone()));
        }

        let session = consumer.session();
        if let Some((holder, owner)) = &inner.exclusive {
            if !owner.is_local(&session) {
                warn!(target: "blipsub::queue", queue = %self.name, holder = %holder, consumer = %consumer.name(), "queue held exclusively");
                return Err(SubscriptionError::ExclusiveAccess(self.name.clone()));
            }
        }
        if exclusive && inner.live_consumers().any(|c| !c.session().is_local(&session)) {
            return Err(SubscriptionError::ExclusiveAccess(self.name.clone()));
        }

        if inner.live_consumers().any(|c| c.name() == consumer.name()) {
            return Err(SubscriptionError::AlreadyAttached(consumer.name().to_string()));
        }

        consumer.core().attach(Arc::downgrade(self))?;
        inner.consumers.retain(|w| w.strong_count() > 0);
        inner.consumers.push(Arc::downgrade(consumer));
        if consumer.is_counted() {
            inner.ever_counted = true;
        }
        if exclusive {
            inner.exclusive = Some((consumer.core().consumer_name().clone(), session));
        }

        info!(
            target: "blipsub::queue",
            queue = %self.name,
            consumer = %consumer.name(),
            acquires = consumer.pre_acquires(),
            counted = consumer.is_counted(),
            exclusive,
            "consumer attached"
        );
        Ok(())
    }

    /// Offers the next visible message after the consumer's cursor.
    ///
    /// Calls `filter`, `accept` and `deliver` in that order. When nothing is
    /// deliverable the consumer is registered as a listener and will be
    /// notified on the next enqueue or release.
    pub fn dispatch(&self, consumer: &Arc<dyn Consumer>) -> Result<Dispatch, SubscriptionError> {
        let now = current_timestamp();
        let mut inner = self.inner.lock();
        if inner.deleted {
            return Err(SubscriptionError::QueueDeleted(self.name.clone()));
        }
        if consumer.core().is_cancelled() {
            return Ok(Dispatch::Cancelled);
        }
        if !inner.is_attached(consumer.core()) {
            return Err(SubscriptionError::UnknownConsumer(consumer.name().to_string()));
        }

        let kind = consumer.core().kind();
        let see_acquired = kind == SubscriptionType::Browser && consumer.browse_acquired();
        let version = inner.version;

        let mut cursor = consumer.cursor();
        if kind == SubscriptionType::Consumer && cursor.version() < version {
            cursor.rewind(version);
        }
        if let CursorState::Stale(position) = inner.cursor_state(&cursor) {
            debug!(target: "blipsub::queue", queue = %self.name, consumer = %consumer.name(), %position, "cursor is stale, resuming after it");
        }

        let mut idx = inner
            .messages
            .partition_point(|e| e.message.sequence <= cursor.position());

        while idx < inner.messages.len() {
            let (message, state) = {
                let entry = &inner.messages[idx];
                (Arc::clone(&entry.message), entry.state)
            };

            let visible = match state {
                MessageState::Available => true,
                MessageState::Acquired => see_acquired,
            };
            if !visible {
                idx += 1;
                continue;
            }

            if message.is_expired(now) {
                if state == MessageState::Available {
                    inner.messages.remove(idx);
                    QueueStats::bump(&self.stats.expired, 1);
                    debug!(target: "blipsub::queue", queue = %self.name, position = %message.sequence, "dropping expired message");
                } else {
                    idx += 1;
                }
                continue;
            }

            if !consumer.filter(&message) {
                cursor.set_position(message.sequence, version);
                idx += 1;
                continue;
            }

            if !consumer.accept(&message) {
                consumer.set_cursor(cursor);
                return Ok(Dispatch::Refused);
            }

            let mut at = cursor;
            at.set_position(message.sequence, version);
            if !consumer.deliver(&at, &message) {
                consumer.set_cursor(cursor);
                return Ok(Dispatch::Refused);
            }

            let acquired = consumer.pre_acquires();
            if acquired {
                inner.messages[idx].state = MessageState::Acquired;
                QueueStats::bump(&self.stats.acquired, 1);
            }
            QueueStats::bump(&self.stats.delivered, 1);
            trace!(target: "blipsub::queue", queue = %self.name, consumer = %consumer.name(), position = %message.sequence, acquired, "message delivered");

            return Ok(Dispatch::Delivered(Dispatched {
                position: message.sequence,
                cursor: at,
                message,
                acquired,
            }));
        }

        consumer.set_cursor(cursor);
        if inner.listeners.add_listener(consumer) {
            trace!(target: "blipsub::queue", queue = %self.name, consumer = %consumer.name(), "consumer waiting for messages");
        }
        Ok(Dispatch::Empty)
    }

    /// Dispatches until the consumer stops taking messages, dequeuing acquired
    /// ones immediately. Intended for consumers that never acknowledge.
    pub fn drain(&self, consumer: &Arc<dyn Consumer>) -> Result<usize, SubscriptionError> {
        let mut delivered = 0;
        while let Dispatch::Delivered(dispatched) = self.dispatch(consumer)? {
            if dispatched.acquired {
                self.dequeue(dispatched.position);
            }
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Removes an acquired message for good. `false` if it is not held as
    /// acquired (already removed, purged or never acquired).
    pub fn dequeue(&self, position: SequenceNumber) -> bool {
        let mut inner = self.inner.lock();
        match inner.index_of(position) {
            Some(idx) if inner.messages[idx].state == MessageState::Acquired => {
                inner.messages.remove(idx);
                QueueStats::bump(&self.stats.dequeued, 1);
                true
            }
            _ => false,
        }
    }

    /// Returns an acquired message to the available set and wakes listeners.
    pub fn release(&self, position: SequenceNumber) -> bool {
        let waiting = {
            let mut inner = self.inner.lock();
            let Some(idx) = inner.index_of(position) else {
                return false;
            };
            if inner.messages[idx].state != MessageState::Acquired {
                return false;
            }
            inner.messages[idx].state = MessageState::Available;
            inner.version += 1;

            let mut waiting = NotificationSet::new();
            inner.listeners.populate(&mut waiting);
            waiting
        };

        QueueStats::bump(&self.stats.released, 1);
        QueueStats::bump(&self.stats.notifications, waiting.len() as u64);
        debug!(target: "blipsub::queue", queue = %self.name, %position, "message released");
        waiting.notify();
        true
    }

    /// Drops every available message; acquired ones stay until settled.
    pub fn purge(&self) -> usize {
        let mut inner = self.inner.lock();
        let before = inner.messages.len();
        inner
            .messages
            .retain(|e| e.state == MessageState::Acquired);
        let purged = before - inner.messages.len();
        info!(target: "blipsub::queue", queue = %self.name, purged, "queue purged");
        purged
    }

    pub fn cursor_state(&self, cursor: &QueueCursor) -> CursorState {
        self.inner.lock().cursor_state(cursor)
    }

    /// Deletes the queue, cancelling every attached consumer. Returns the
    /// error each consumer's peer should see. Subsequent calls return nothing.
    pub fn delete(&self) -> Vec<DeletionNotice> {
        let (consumers, waiting) = {
            let mut inner = self.inner.lock();
            if inner.deleted {
                return Vec::new();
            }
            inner.deleted = true;
            inner.messages.clear();
            let waiting = inner.listeners.notify_all();
            let consumers: Vec<Arc<dyn Consumer>> = inner.live_consumers().collect();
            (consumers, waiting)
        };

        // Parked pumps wake up and observe the deletion on their next dispatch.
        waiting.notify();

        let notices: Vec<DeletionNotice> = consumers
            .iter()
            .map(|c| DeletionNotice {
                consumer: c.name().to_string(),
                session: c.session(),
                error: if c.hide_deleted_error() {
                    None
                } else {
                    Some(SubscriptionError::QueueDeleted(self.name.clone()))
                },
            })
            .collect();

        for consumer in &consumers {
            consumer.cancel();
        }

        info!(target: "blipsub::queue", queue = %self.name, consumers = consumers.len(), "queue deleted");
        notices
    }

    /// Removes a consumer's registrations. Called by the consumer's `cancel`.
    pub(crate) fn detach(&self, core: &ConsumerCore) {
        let mut inner = self.inner.lock();
        inner.listeners.remove_listener(core);
        inner
            .consumers
            .retain(|w| w.upgrade().is_some_and(|c| !std::ptr::eq(c.core(), core)));
        if inner
            .exclusive
            .as_ref()
            .is_some_and(|(holder, _)| holder == core.consumer_name())
        {
            inner.exclusive = None;
        }

        let remaining = inner.counted_consumers();
        debug!(target: "blipsub::queue", queue = %self.name, consumer = %core.name(), remaining, "consumer detached");
        if self.settings.auto_delete && inner.ever_counted && remaining == 0 && !inner.deleted {
            info!(target: "blipsub::queue", queue = %self.name, "last consumer left, queue is eligible for auto-delete");
        }
    }

    /// Number of attached consumers that count toward "has consumers".
    pub fn consumer_count(&self) -> usize {
        self.inner.lock().counted_consumers()
    }

    pub fn has_consumers(&self) -> bool {
        self.consumer_count() > 0
    }

    /// Auto-delete queue whose counted consumers have all gone.
    pub fn should_auto_delete(&self) -> bool {
        let inner = self.inner.lock();
        self.settings.auto_delete
            && !inner.deleted
            && inner.ever_counted
            && inner.counted_consumers() == 0
    }

    /// Messages held, acquired or not.
    pub fn depth(&self) -> usize {
        self.inner.lock().messages.len()
    }

    /// Messages not acquired by anyone.
    pub fn available(&self) -> usize {
        self.inner
            .lock()
            .messages
            .iter()
            .filter(|e| e.state == MessageState::Available)
            .count()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn is_deleted(&self) -> bool {
        self.inner.lock().deleted
    }

    pub fn stats(&self) -> QueueStatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::consumer::{ClientConsumer, ClientOptions};
    use crate::core::message::new_message;

    fn attached(queue: &Arc<Queue>, name: &str, options: ClientOptions) -> Arc<dyn Consumer> {
        let handle: Arc<dyn Consumer> =
            Arc::new(ClientConsumer::new(name, OwnershipToken::new(), options));
        queue.consume(&handle, false).unwrap();
        handle
    }

    fn delivered(outcome: Dispatch) -> Dispatched {
        match outcome {
            Dispatch::Delivered(d) => d,
            other => panic!("expected a delivery, got {other:?}"),
        }
    }

    #[test]
    fn sequences_are_assigned_in_order() {
        let queue = Queue::new("seq", QueueSettings::default());
        let a = queue.enqueue(new_message("a")).unwrap();
        let b = queue.enqueue(new_message("b")).unwrap();
        assert_eq!(a, SequenceNumber(1));
        assert_eq!(b, SequenceNumber(2));
        assert_eq!(queue.depth(), 2);
    }

    #[test]
    fn released_message_is_offered_again() {
        let queue = Arc::new(Queue::new("rewind", QueueSettings::default()));
        let consumer = attached(&queue, "rewind-c", ClientOptions::consume());
        let browser = attached(&queue, "rewind-b", ClientOptions::browse());
        queue.enqueue(new_message("a")).unwrap();
        queue.enqueue(new_message("b")).unwrap();

        let first = delivered(queue.dispatch(&consumer).unwrap());
        delivered(queue.dispatch(&consumer).unwrap());
        assert_eq!(queue.drain(&browser).unwrap(), 0);

        assert!(queue.release(first.position));
        assert!(!queue.release(first.position));

        // Acquired messages were invisible to the browser; the released one is not.
        let browsed = delivered(queue.dispatch(&browser).unwrap());
        assert_eq!(browsed.position, first.position);
        assert!(!browsed.acquired);

        let again = delivered(queue.dispatch(&consumer).unwrap());
        assert_eq!(again.position, first.position);
        assert!(again.cursor.version() > first.cursor.version());
        assert!(matches!(queue.dispatch(&browser).unwrap(), Dispatch::Empty));
    }

    #[test]
    fn refused_delivery_keeps_the_cursor() {
        let queue = Arc::new(Queue::new("refuse", QueueSettings::default()));
        let consumer = attached(&queue, "refuse-c", ClientOptions::consume().with_capacity(1));
        queue.enqueue(new_message("a")).unwrap();
        queue.enqueue(new_message("b")).unwrap();

        delivered(queue.dispatch(&consumer).unwrap());
        assert!(matches!(queue.dispatch(&consumer).unwrap(), Dispatch::Refused));
        assert_eq!(consumer.cursor().position(), SequenceNumber(1));
        assert_eq!(queue.available(), 1);
        assert!(!consumer.in_listeners());
    }

    #[test]
    fn dropped_consumers_are_pruned_on_attach() {
        let queue = Arc::new(Queue::new("prune", QueueSettings::default()));
        for i in 0..4 {
            drop(attached(&queue, &format!("prune-gone-{i}"), ClientOptions::consume()));
        }
        assert_eq!(queue.inner.lock().consumers.len(), 4);

        let _kept = attached(&queue, "prune-kept", ClientOptions::consume());
        assert_eq!(queue.inner.lock().consumers.len(), 1);
        assert_eq!(queue.consumer_count(), 1);
    }

    #[test]
    fn names_are_unique_per_queue() {
        let queue = Arc::new(Queue::new("names", QueueSettings::default()));
        let _first = attached(&queue, "names-a", ClientOptions::consume());
        let twin: Arc<dyn Consumer> = Arc::new(ClientConsumer::new(
            "names-a",
            OwnershipToken::new(),
            ClientOptions::browse(),
        ));

        assert_eq!(
            queue.consume(&twin, false).unwrap_err(),
            SubscriptionError::AlreadyAttached("names-a".into())
        );
        assert_eq!(queue.consumer_count(), 1);
        // The refused consumer stays free to attach elsewhere.
        let other = Arc::new(Queue::new("names-other", QueueSettings::default()));
        other.consume(&twin, false).unwrap();
    }

    #[test]
    fn dequeue_requires_acquisition() {
        let queue = Arc::new(Queue::new("dequeue", QueueSettings::default()));
        let consumer = attached(&queue, "dequeue-c", ClientOptions::consume());
        let pos = queue.enqueue(new_message("a")).unwrap();

        assert!(!queue.dequeue(pos));
        delivered(queue.dispatch(&consumer).unwrap());
        assert!(queue.dequeue(pos));
        assert!(!queue.dequeue(pos));
        assert_eq!(queue.stats().dequeued, 1);
    }

    #[test]
    fn purge_keeps_acquired_messages() {
        let queue = Arc::new(Queue::new("purge", QueueSettings::default()));
        let consumer = attached(&queue, "purge-c", ClientOptions::consume());
        queue.enqueue(new_message("a")).unwrap();
        queue.enqueue(new_message("b")).unwrap();
        delivered(queue.dispatch(&consumer).unwrap());

        assert_eq!(queue.purge(), 1);
        assert_eq!(queue.depth(), 1);
        assert_eq!(queue.available(), 0);
    }
}
