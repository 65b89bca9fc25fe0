use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::debug;

use crate::core::consumer::name::ConsumerName;
use crate::core::cursor::{QueueCursor, SubscriptionType};
use crate::core::delivery::DeliveryRecord;
use crate::core::error::SubscriptionError;
use crate::core::listeners::ListenerFlag;
use crate::core::message::Message;
use crate::core::ownership::OwnershipToken;
use crate::core::queue::Queue;

/// A subscription to a queue, as seen by the queue that drives it.
///
/// The queue calls `filter`, `accept` and `deliver` in that order while
/// holding its own lock, so none of them may block or call back into the
/// queue. `acknowledged` and `cancel` come from the owning session.
pub trait Consumer: Send + Sync + fmt::Debug {
    /// Shared state every variant embeds.
    fn core(&self) -> &ConsumerCore;

    /// Hands `message` to the subscriber. `cursor` is positioned on the
    /// message; on success the consumer adopts it as its own cursor.
    fn deliver(&self, cursor: &QueueCursor, message: &Arc<Message>) -> bool;

    /// Wake-up signal: new work may be available. Never blocks.
    fn notify(&self);

    /// Terminates the subscription. Idempotent.
    fn cancel(&self);

    /// The owning session confirmed a delivery. Records that do not belong to
    /// this consumer are ignored.
    fn acknowledged(&self, record: &DeliveryRecord);

    /// The owning session gave a delivery back to the queue without
    /// acknowledging it.
    fn released(&self, _record: &DeliveryRecord) {}

    /// Cheap predicate applied before any delivery attempt.
    fn filter(&self, _message: &Message) -> bool {
        true
    }

    /// Final decision on whether this consumer takes the message right now.
    fn accept(&self, _message: &Message) -> bool {
        true
    }

    /// Browsers only: also see messages acquired by other consumers.
    fn browse_acquired(&self) -> bool {
        false
    }

    /// Suppress the "queue deleted" error reported to the peer.
    fn hide_deleted_error(&self) -> bool {
        false
    }

    /// Counts toward the queue's "has consumers" bookkeeping.
    fn is_counted(&self) -> bool {
        true
    }

    fn session(&self) -> OwnershipToken {
        self.core().session()
    }

    fn pre_acquires(&self) -> bool {
        self.core().pre_acquires()
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn in_listeners(&self) -> bool {
        self.core().in_listeners()
    }

    fn cursor(&self) -> QueueCursor {
        self.core().cursor()
    }

    fn set_cursor(&self, cursor: QueueCursor) {
        self.core().set_cursor(cursor)
    }
}

struct CoreState {
    cursor: QueueCursor,
    queue: Option<Weak<Queue>>,
}

/// State shared by all consumer variants: identity, acquisition mode, cursor,
/// listener membership and the cancel/deliver interlock.
pub struct ConsumerCore {
    name: ConsumerName,
    acquires: bool,
    session: OwnershipToken,
    listener: ListenerFlag,
    cancelled: AtomicBool,
    state: Mutex<CoreState>,
    delivered: AtomicU64,
    pending: AtomicBool,
    wake: Notify,
}

impl fmt::Debug for ConsumerCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerCore")
            .field("name", &self.name)
            .field("acquires", &self.acquires)
            .field("session", &self.session)
            .field("in_listeners", &self.listener.is_set())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl ConsumerCore {
    pub fn new(name: impl Into<ConsumerName>, kind: SubscriptionType, session: OwnershipToken) -> Self {
        Self {
            name: name.into(),
            acquires: kind == SubscriptionType::Consumer,
            session,
            listener: ListenerFlag::default(),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(CoreState {
                cursor: QueueCursor::new(kind),
                queue: None,
            }),
            delivered: AtomicU64::new(0),
            pending: AtomicBool::new(false),
            wake: Notify::new(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn consumer_name(&self) -> &ConsumerName {
        &self.name
    }

    #[inline]
    pub fn pre_acquires(&self) -> bool {
        self.acquires
    }

    #[inline]
    pub fn kind(&self) -> SubscriptionType {
        if self.acquires {
            SubscriptionType::Consumer
        } else {
            SubscriptionType::Browser
        }
    }

    #[inline]
    pub fn session(&self) -> OwnershipToken {
        self.session
    }

    #[inline]
    pub fn in_listeners(&self) -> bool {
        self.listener.is_set()
    }

    pub(crate) fn listener_flag(&self) -> &ListenerFlag {
        &self.listener
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn cursor(&self) -> QueueCursor {
        self.state.lock().cursor
    }

    pub fn set_cursor(&self, cursor: QueueCursor) {
        self.state.lock().cursor = cursor;
    }

    /// Runs `hand_off` unless the consumer is cancelled, adopting `cursor` on
    /// success. Holding the state lock across the hand-off means a concurrent
    /// `cancel` either waits for the delivery to finish or wins and refuses it.
    pub fn deliver_with<F>(&self, cursor: &QueueCursor, hand_off: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut state = self.state.lock();
        if self.is_cancelled() {
            return false;
        }
        if !hand_off() {
            return false;
        }
        state.cursor = *cursor;
        self.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Records a pending wake-up and releases one waiter. No-op once cancelled.
    pub fn signal(&self) -> bool {
        if self.is_cancelled() {
            return false;
        }
        self.pending.store(true, Ordering::Release);
        self.wake.notify_one();
        true
    }

    /// Consumes the pending wake-up flag.
    pub fn take_signal(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }

    /// Resolves after the next `signal` (or cancellation).
    pub async fn notified(&self) {
        self.wake.notified().await
    }

    /// Binds the consumer to `queue`. A consumer serves at most one queue.
    pub(crate) fn attach(&self, queue: Weak<Queue>) -> Result<(), SubscriptionError> {
        let mut state = self.state.lock();
        if self.is_cancelled() {
            return Err(SubscriptionError::ConsumerCancelled(self.name.to_string()));
        }
        if state.queue.as_ref().and_then(Weak::upgrade).is_some() {
            return Err(SubscriptionError::AlreadyAttached(self.name.to_string()));
        }
        state.queue = Some(queue);
        Ok(())
    }

    /// Marks the consumer cancelled and detaches it from its queue, which
    /// drops it from the listener registry before this returns.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn cancel(&self) -> bool {
        let queue = {
            let mut state = self.state.lock();
            if self.cancelled.swap(true, Ordering::AcqRel) {
                return false;
            }
            state.queue.take()
        };

        if let Some(queue) = queue.and_then(|q| q.upgrade()) {
            queue.detach(self);
        }
        debug!(target: "blipsub::consumer", consumer = %self.name, "consumer cancelled");

        // Wake any pump parked on this consumer so it observes the cancel.
        self.wake.notify_one();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn core(kind: SubscriptionType) -> ConsumerCore {
        ConsumerCore::new("core-test", kind, OwnershipToken::new())
    }

    #[test]
    fn acquisition_follows_kind() {
        assert!(core(SubscriptionType::Consumer).pre_acquires());
        assert!(!core(SubscriptionType::Browser).pre_acquires());
        assert_eq!(core(SubscriptionType::Browser).kind(), SubscriptionType::Browser);
    }

    #[test]
    fn deliver_with_adopts_cursor_on_success_only() {
        let core = core(SubscriptionType::Consumer);
        let mut at = QueueCursor::new(SubscriptionType::Consumer);
        at.set_position(crate::core::message::SequenceNumber(3), 0);

        assert!(!core.deliver_with(&at, || false));
        assert!(!core.cursor().is_valid());

        assert!(core.deliver_with(&at, || true));
        assert_eq!(core.cursor().position().value(), 3);
        assert_eq!(core.delivered_count(), 1);
    }

    #[test]
    fn cancel_is_idempotent_and_blocks_delivery() {
        let core = core(SubscriptionType::Consumer);
        assert!(core.cancel());
        assert!(!core.cancel());
        assert!(core.is_cancelled());

        let at = QueueCursor::new(SubscriptionType::Consumer);
        let mut called = false;
        assert!(!core.deliver_with(&at, || {
            called = true;
            true
        }));
        assert!(!called);
    }

    #[test]
    fn signal_is_ignored_after_cancel() {
        let core = core(SubscriptionType::Browser);
        assert!(core.signal());
        assert!(core.signal());
        assert!(core.take_signal());
        assert!(!core.take_signal());

        core.cancel();
        assert!(!core.signal());
        assert!(!core.take_signal());
    }

    #[test]
    fn cancelled_core_cannot_attach() {
        let core = core(SubscriptionType::Consumer);
        core.cancel();
        let err = core.attach(Weak::new()).unwrap_err();
        assert_eq!(err, SubscriptionError::ConsumerCancelled("core-test".into()));
    }
}
