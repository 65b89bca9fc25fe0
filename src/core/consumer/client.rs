use flume::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::CONFIG;
use crate::core::consumer::consumer::{Consumer, ConsumerCore};
use crate::core::consumer::name::ConsumerName;
use crate::core::cursor::{QueueCursor, SubscriptionType};
use crate::core::delivery::{AckMode, DeliveryRecord};
use crate::core::message::{Message, SequenceNumber};
use crate::core::ownership::OwnershipToken;

/// Header equality selector, written `key=value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    key: String,
    value: String,
}

impl Selector {
    pub fn header_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        message.header(&self.key) == Some(self.value.as_str())
    }
}

impl FromStr for Selector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok(Selector::header_equals(key.trim(), value.trim()))
            }
            _ => Err(format!("invalid selector '{s}', expected key=value")),
        }
    }
}

/// Settings for a client subscription.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub kind: SubscriptionType,
    pub ack_mode: AckMode,
    pub selector: Option<Selector>,
    /// Credit window; `None` means unlimited.
    pub credit: Option<u32>,
    pub browse_acquired: bool,
    pub exclusive: bool,
    /// Bound of the delivery channel.
    pub capacity: usize,
}

impl ClientOptions {
    /// Defaults from [`CONFIG`]: consumers acknowledge explicitly, browsers don't.
    pub fn new(kind: SubscriptionType) -> Self {
        let credit = match CONFIG.consumers.default_credit {
            0 => None,
            n => Some(n),
        };
        Self {
            kind,
            ack_mode: match kind {
                SubscriptionType::Consumer => AckMode::Explicit,
                SubscriptionType::Browser => AckMode::None,
            },
            selector: None,
            credit,
            browse_acquired: false,
            exclusive: false,
            capacity: CONFIG.consumers.delivery_capacity.max(1),
        }
    }

    pub fn consume() -> Self {
        Self::new(SubscriptionType::Consumer)
    }

    pub fn browse() -> Self {
        Self::new(SubscriptionType::Browser)
    }

    pub fn with_selector(mut self, selector: Selector) -> Self {
        self.selector = Some(selector);
        self
    }

    pub fn with_credit(mut self, credit: u32) -> Self {
        self.credit = Some(credit);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn browse_acquired(mut self, enabled: bool) -> Self {
        self.browse_acquired = enabled;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }
}

/// One message handed to a client subscription.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub position: SequenceNumber,
    pub message: Arc<Message>,
    pub acquired: bool,
}

/// Subscription opened by a remote client, either consuming or browsing.
///
/// Deliveries land in a bounded channel; a full channel refuses the delivery
/// and the consumer re-notifies itself once the client drains it.
#[derive(Debug)]
pub struct ClientConsumer {
    core: ConsumerCore,
    ack_mode: AckMode,
    selector: Option<Selector>,
    browse_acquired: bool,
    exclusive: bool,
    credit: Option<AtomicU32>,
    blocked: AtomicBool,
    outstanding: Mutex<BTreeSet<SequenceNumber>>,
    sender: Sender<Delivery>,
    receiver: Receiver<Delivery>,
}

impl ClientConsumer {
    pub fn new(name: impl Into<ConsumerName>, session: OwnershipToken, options: ClientOptions) -> Self {
        let (tx, rx) = bounded(options.capacity);
        Self {
            core: ConsumerCore::new(name, options.kind, session),
            ack_mode: options.ack_mode,
            selector: options.selector,
            browse_acquired: options.browse_acquired,
            exclusive: options.exclusive,
            credit: options.credit.map(AtomicU32::new),
            blocked: AtomicBool::new(false),
            outstanding: Mutex::new(BTreeSet::new()),
            sender: tx,
            receiver: rx,
        }
    }

    #[inline]
    pub fn ack_mode(&self) -> AckMode {
        self.ack_mode
    }

    #[inline]
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    /// Remaining credit, `None` when unlimited.
    pub fn credit(&self) -> Option<u32> {
        self.credit.as_ref().map(|c| c.load(Ordering::Acquire))
    }

    /// Opens the credit window by `n` and asks to be dispatched again.
    pub fn add_credit(&self, n: u32) {
        match &self.credit {
            Some(credit) => {
                credit.fetch_add(n, Ordering::AcqRel);
                self.notify();
            }
            None => debug!(target: "blipsub::consumer", consumer = %self.core.name(), "credit is unlimited"),
        }
    }

    /// Positions delivered but not yet acknowledged.
    pub fn outstanding(&self) -> Vec<SequenceNumber> {
        self.outstanding.lock().iter().copied().collect()
    }

    pub fn receiver(&self) -> &Receiver<Delivery> {
        &self.receiver
    }

    pub fn try_recv(&self) -> Option<Delivery> {
        let delivery = self.receiver.try_recv().ok();
        if delivery.is_some() {
            self.unblock();
        }
        delivery
    }

    pub async fn recv_async(&self) -> Option<Delivery> {
        let delivery = self.receiver.recv_async().await.ok();
        if delivery.is_some() {
            self.unblock();
        }
        delivery
    }

    /// Whether `record` was produced by a delivery to this consumer.
    fn owns(&self, record: &DeliveryRecord) -> bool {
        let owned = record.consumer() == self.core.consumer_name()
            && record.session().is_local(&self.core.session());
        if !owned {
            warn!(
                target: "blipsub::consumer",
                consumer = %self.core.name(),
                record_consumer = %record.consumer(),
                "ignoring settlement of another consumer's delivery"
            );
        }
        owned
    }

    fn unblock(&self) {
        if self.blocked.swap(false, Ordering::SeqCst) {
            self.notify();
        }
    }

    /// Records a refused send. A receive that raced the failed `try_send`
    /// found `blocked` unset and sent no wake-up, so the room it made is
    /// picked up here.
    fn mark_blocked(&self) {
        self.blocked.store(true, Ordering::SeqCst);
        if !self.sender.is_full() {
            self.unblock();
        }
    }

    fn take_credit(&self) -> bool {
        match &self.credit {
            None => true,
            Some(credit) => credit
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                .is_ok(),
        }
    }

    fn restore_credit(&self) {
        if let Some(credit) = &self.credit {
            credit.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl Consumer for ClientConsumer {
    fn core(&self) -> &ConsumerCore {
        &self.core
    }

    fn deliver(&self, cursor: &QueueCursor, message: &Arc<Message>) -> bool {
        let acquired = self.core.pre_acquires();
        self.core.deliver_with(cursor, || {
            if !self.take_credit() {
                return false;
            }
            let delivery = Delivery {
                position: message.sequence,
                message: Arc::clone(message),
                acquired,
            };
            match self.sender.try_send(delivery) {
                Ok(()) => {
                    if self.ack_mode == AckMode::Explicit {
                        self.outstanding.lock().insert(message.sequence);
                    }
                    true
                }
                Err(TrySendError::Full(_)) => {
                    self.restore_credit();
                    self.mark_blocked();
                    debug!(
                        target: "blipsub::consumer",
                        consumer = %self.core.name(),
                        position = %message.sequence,
                        "delivery channel full"
                    );
                    false
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.restore_credit();
                    false
                }
            }
        })
    }

    fn notify(&self) {
        self.core.signal();
    }

    fn cancel(&self) {
        if self.core.cancel() {
            info!(
                target: "blipsub::consumer",
                consumer = %self.core.name(),
                session = %self.core.session(),
                "subscription cancelled"
            );
        }
    }

    fn acknowledged(&self, record: &DeliveryRecord) {
        if !self.owns(record) {
            return;
        }
        if !self.outstanding.lock().remove(&record.position()) {
            debug!(
                target: "blipsub::consumer",
                consumer = %self.core.name(),
                position = %record.position(),
                "acknowledgment for a delivery that is not outstanding"
            );
        }
    }

    fn released(&self, record: &DeliveryRecord) {
        if self.owns(record) {
            self.outstanding.lock().remove(&record.position());
        }
    }

    fn filter(&self, message: &Message) -> bool {
        self.selector.as_ref().map_or(true, |s| s.matches(message))
    }

    fn accept(&self, message: &Message) -> bool {
        if let Some(credit) = &self.credit {
            if credit.load(Ordering::Acquire) == 0 {
                return false;
            }
        }
        // Browsers never take a message twice.
        self.core.pre_acquires() || self.core.cursor().is_ahead(message.sequence)
    }

    fn browse_acquired(&self) -> bool {
        self.browse_acquired
    }
}
