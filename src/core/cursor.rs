//! Per-subscription traversal position within a queue.

use crate::core::message::SequenceNumber;

/// Kind of subscription a cursor (and consumer) belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionType {
    /// Acquires delivered messages, removing them from the available set.
    Consumer,
    /// Observes messages without affecting their availability.
    Browser,
}

/// Position/progress marker of one subscription.
///
/// `position` is the sequence of the last message this subscription has moved
/// past. A cursor does not pin messages: the queue may discard the message it
/// points at, which makes the cursor stale but never invalid to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCursor {
    kind: SubscriptionType,
    position: SequenceNumber,
    version: u64,
    valid: bool,
}

/// How a cursor relates to the messages a queue currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    /// Not yet positioned on any message.
    Start,
    /// Positioned on a message the queue still holds.
    At(SequenceNumber),
    /// The message under the cursor was discarded; traversal resumes after it.
    Stale(SequenceNumber),
}

impl QueueCursor {
    pub fn new(kind: SubscriptionType) -> Self {
        Self {
            kind,
            position: SequenceNumber::ZERO,
            version: 0,
            valid: false,
        }
    }

    #[inline]
    pub fn kind(&self) -> SubscriptionType {
        self.kind
    }

    #[inline]
    pub fn position(&self) -> SequenceNumber {
        self.position
    }

    #[inline]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// False until the cursor has been positioned on a message.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn set_position(&mut self, position: SequenceNumber, version: u64) {
        self.position = position;
        self.version = version;
        self.valid = true;
    }

    /// Returns to the start of the sequence, keeping the kind.
    pub(crate) fn rewind(&mut self, version: u64) {
        self.position = SequenceNumber::ZERO;
        self.version = version;
        self.valid = false;
    }

    /// Whether the message at `sequence` is still ahead of this cursor.
    #[inline]
    pub fn is_ahead(&self, sequence: SequenceNumber) -> bool {
        sequence > self.position
    }
}
