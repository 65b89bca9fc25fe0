//! Session layer: the designated owner of client subscriptions.
//!
//! A session holds the only strong references to its consumers (queues and
//! listener registries keep weak ones), tracks unacknowledged deliveries and
//! authorizes cancellation requests by ownership token.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CONFIG;
use crate::core::consumer::{ClientConsumer, ClientOptions, Consumer, ConsumerName};
use crate::core::delivery::{AckMode, DeliveryId, DeliveryRecord, DeliveryTracker};
use crate::core::error::SubscriptionError;
use crate::core::ownership::OwnershipToken;
use crate::core::queue::{Dispatch, Queue};

/// Rejects `requester` unless it owns `consumer`.
pub fn authorize(consumer: &dyn Consumer, requester: &OwnershipToken) -> Result<(), SubscriptionError> {
    if consumer.session().is_local(requester) {
        Ok(())
    } else {
        Err(SubscriptionError::Unauthorized)
    }
}

#[derive(Clone)]
struct Subscription {
    client: Arc<ClientConsumer>,
    handle: Arc<dyn Consumer>,
    queue: Arc<Queue>,
}

#[derive(Debug)]
pub struct Session {
    token: OwnershipToken,
    name_prefix: String,
    subscriptions: DashMap<ConsumerName, Subscription>,
    tracker: DeliveryTracker,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("consumer", &self.client.name())
            .field("queue", &self.queue.name())
            .finish()
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// New session with a fresh token and the configured name prefix.
    pub fn new() -> Self {
        Self::with_prefix(&CONFIG.consumers.name_prefix)
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            token: OwnershipToken::new(),
            name_prefix: prefix.to_string(),
            subscriptions: DashMap::new(),
            tracker: DeliveryTracker::new(),
        }
    }

    pub fn token(&self) -> OwnershipToken {
        self.token
    }

    pub fn tracker(&self) -> &DeliveryTracker {
        &self.tracker
    }

    /// Subscribes to `queue` under a generated name.
    pub fn subscribe(
        &self,
        queue: &Arc<Queue>,
        options: ClientOptions,
    ) -> Result<Arc<ClientConsumer>, SubscriptionError> {
        let name = ConsumerName::generate(&self.name_prefix);
        self.subscribe_as(name, queue, options)
    }

    /// Subscribes under a caller-chosen name. The name must be unused in this
    /// session and among the queue's consumers.
    pub fn subscribe_as(
        &self,
        name: impl Into<ConsumerName>,
        queue: &Arc<Queue>,
        options: ClientOptions,
    ) -> Result<Arc<ClientConsumer>, SubscriptionError> {
        let name = name.into();
        if self.subscriptions.contains_key(&name) {
            return Err(SubscriptionError::AlreadyAttached(name.to_string()));
        }

        let exclusive = options.exclusive;
        let client = Arc::new(ClientConsumer::new(name.clone(), self.token, options));
        let handle: Arc<dyn Consumer> = client.clone();
        queue.consume(&handle, exclusive)?;

        info!(
            target: "blipsub::session",
            session = %self.token,
            consumer = %name,
            queue = %queue.name(),
            acquires = client.pre_acquires(),
            "subscribed"
        );
        self.subscriptions.insert(
            name,
            Subscription {
                client: Arc::clone(&client),
                handle,
                queue: Arc::clone(queue),
            },
        );
        Ok(client)
    }

    pub fn subscription(&self, name: &str) -> Option<Arc<ClientConsumer>> {
        self.subscriptions
            .get(&ConsumerName::from(name))
            .map(|s| Arc::clone(&s.client))
    }

    pub fn subscription_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.subscriptions.iter().map(|e| e.key().to_string()).collect();
        names.sort();
        names
    }

    fn lookup(&self, name: &str) -> Result<Subscription, SubscriptionError> {
        self.subscriptions
            .get(&ConsumerName::from(name))
            .map(|s| s.value().clone())
            .ok_or_else(|| SubscriptionError::UnknownConsumer(name.to_string()))
    }

    /// Pulls every currently deliverable message into the consumer. Returns
    /// the records created (empty for subscriptions without acknowledgment).
    pub fn dispatch(&self, name: &str) -> Result<Vec<DeliveryRecord>, SubscriptionError> {
        let subscription = self.lookup(name)?;
        self.dispatch_subscription(&subscription).map(|(records, _)| records)
    }

    fn dispatch_subscription(
        &self,
        subscription: &Subscription,
    ) -> Result<(Vec<DeliveryRecord>, usize), SubscriptionError> {
        let mut records = Vec::new();
        let mut delivered = 0;
        while let Dispatch::Delivered(dispatched) = subscription.queue.dispatch(&subscription.handle)? {
            delivered += 1;
            match subscription.client.ack_mode() {
                AckMode::Explicit => records.push(self.tracker.record(
                    &subscription.handle,
                    &subscription.queue,
                    &dispatched,
                )),
                AckMode::None => {
                    if dispatched.acquired {
                        subscription.queue.dequeue(dispatched.position);
                    }
                }
            }
        }
        Ok((records, delivered))
    }

    /// Keeps the subscription fed until it is cancelled: dispatches, then
    /// parks until the consumer is notified. Returns the number of deliveries.
    pub async fn serve(&self, name: &str) -> Result<usize, SubscriptionError> {
        let subscription = self.lookup(name)?;
        let core = subscription.client.core();
        let mut total = 0;
        loop {
            if core.is_cancelled() {
                break;
            }
            core.take_signal();
            let (_, delivered) = match self.dispatch_subscription(&subscription) {
                Ok(outcome) => outcome,
                Err(SubscriptionError::QueueDeleted(_)) => break,
                Err(e) => return Err(e),
            };
            total += delivered;
            if delivered == 0 && !core.take_signal() {
                core.notified().await;
            }
        }
        debug!(target: "blipsub::session", consumer = %name, total, "serve loop finished");
        Ok(total)
    }

    /// Acknowledges a delivery made to one of this session's consumers.
    pub fn acknowledge(&self, id: DeliveryId) -> Result<DeliveryRecord, SubscriptionError> {
        self.tracker.acknowledge(id)
    }

    /// Gives a delivery back to its queue without acknowledging it.
    pub fn release(&self, id: DeliveryId) -> Result<DeliveryRecord, SubscriptionError> {
        self.tracker.release(id)
    }

    /// Cancels a subscription on behalf of `requester`.
    ///
    /// Unknown or already-cancelled names are a no-op. Outstanding deliveries
    /// stay tracked and may still be acknowledged.
    pub fn cancel(&self, name: &str, requester: &OwnershipToken) -> Result<(), SubscriptionError> {
        let key = ConsumerName::from(name);
        let Some(subscription) = self.subscriptions.get(&key).map(|s| s.value().clone()) else {
            debug!(target: "blipsub::session", consumer = %name, "cancel for unknown subscription ignored");
            return Ok(());
        };

        if let Err(e) = authorize(subscription.handle.as_ref(), requester) {
            warn!(target: "blipsub::session", consumer = %name, requester = %requester, "unauthorized cancel rejected");
            return Err(e);
        }

        self.subscriptions.remove(&key);
        subscription.handle.cancel();
        Ok(())
    }

    /// Ends the session: cancels every subscription and releases every
    /// outstanding delivery. Returns the number of released deliveries.
    pub fn close(&self) -> usize {
        let names: Vec<ConsumerName> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, subscription)) = self.subscriptions.remove(&name) {
                subscription.handle.cancel();
            }
        }
        let released = self.tracker.release_all();
        info!(target: "blipsub::session", session = %self.token, released, "session closed");
        released
    }
}
