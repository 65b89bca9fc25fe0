use std::fmt;

/// Errors surfaced by the queue and session layers.
///
/// Consumer lifecycle calls (`cancel`, `notify`, `acknowledged`) never return
/// these; they are no-ops on misuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The queue was deleted while the subscription was attached.
    QueueDeleted(String),
    /// The queue reached its configured depth.
    QueueFull,
    /// The requesting session does not own the subscription.
    Unauthorized,
    /// Another session holds (or would be locked out by) an exclusive subscription.
    ExclusiveAccess(String),
    /// The consumer is already attached to a queue.
    AlreadyAttached(String),
    /// The consumer was cancelled before the operation.
    ConsumerCancelled(String),
    /// No subscription with this name exists on the session.
    UnknownConsumer(String),
    /// No outstanding delivery with this id.
    UnknownDelivery(u64),
}

impl std::error::Error for SubscriptionError {}

impl fmt::Display for SubscriptionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionError::QueueDeleted(queue) => write!(f, "Queue '{queue}' has been deleted"),
            SubscriptionError::QueueFull => write!(f, "Queue is full"),
            SubscriptionError::Unauthorized => {
                write!(f, "Requester does not own this subscription")
            }
            SubscriptionError::ExclusiveAccess(queue) => {
                write!(f, "Queue '{queue}' is held by an exclusive subscription")
            }
            SubscriptionError::AlreadyAttached(name) => {
                write!(f, "Consumer '{name}' is already attached to a queue")
            }
            SubscriptionError::ConsumerCancelled(name) => {
                write!(f, "Consumer '{name}' has been cancelled")
            }
            SubscriptionError::UnknownConsumer(name) => write!(f, "Unknown consumer '{name}'"),
            SubscriptionError::UnknownDelivery(id) => write!(f, "Unknown delivery {id}"),
        }
    }
}
