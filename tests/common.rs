#![allow(dead_code)]

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

use blipsub::core::consumer::{Consumer, ConsumerCore};
use blipsub::core::cursor::{QueueCursor, SubscriptionType};
use blipsub::core::delivery::DeliveryRecord;
use blipsub::core::message::{Message, SequenceNumber};
use blipsub::core::ownership::OwnershipToken;

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = blipsub::logging::init_logging_with("warn");
    });
}

/// Consumer that records every call the queue makes into it.
#[derive(Debug)]
pub struct Probe {
    core: ConsumerCore,
    reject_filter: Option<&'static str>,
    reject_accept: Option<&'static str>,
    browse_acquired: bool,
    pub filter_calls: AtomicUsize,
    pub deliver_calls: AtomicUsize,
    pub notifications: AtomicUsize,
    pub acknowledged: AtomicUsize,
    pub delivered: Mutex<Vec<SequenceNumber>>,
}

impl Probe {
    pub fn new(name: &str, kind: SubscriptionType) -> Self {
        Self::owned_by(name, kind, OwnershipToken::new())
    }

    pub fn owned_by(name: &str, kind: SubscriptionType, session: OwnershipToken) -> Self {
        Self {
            core: ConsumerCore::new(name, kind, session),
            reject_filter: None,
            reject_accept: None,
            browse_acquired: false,
            filter_calls: AtomicUsize::new(0),
            deliver_calls: AtomicUsize::new(0),
            notifications: AtomicUsize::new(0),
            acknowledged: AtomicUsize::new(0),
            delivered: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting_in_filter(mut self, payload: &'static str) -> Self {
        self.reject_filter = Some(payload);
        self
    }

    pub fn rejecting_in_accept(mut self, payload: &'static str) -> Self {
        self.reject_accept = Some(payload);
        self
    }

    pub fn browsing_acquired(mut self) -> Self {
        self.browse_acquired = true;
        self
    }

    pub fn shared(self) -> Arc<dyn Consumer> {
        Arc::new(self)
    }

    pub fn delivered_payloads(&self) -> Vec<SequenceNumber> {
        self.delivered.lock().clone()
    }
}

fn payload_is(message: &Message, payload: Option<&'static str>) -> bool {
    payload.is_some_and(|p| message.payload.as_ref() == p.as_bytes())
}

impl Consumer for Probe {
    fn core(&self) -> &ConsumerCore {
        &self.core
    }

    fn deliver(&self, cursor: &QueueCursor, message: &Arc<Message>) -> bool {
        self.deliver_calls.fetch_add(1, Ordering::SeqCst);
        self.core.deliver_with(cursor, || {
            self.delivered.lock().push(message.sequence);
            true
        })
    }

    fn notify(&self) {
        if self.core.signal() {
            self.notifications.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn cancel(&self) {
        self.core.cancel();
    }

    fn acknowledged(&self, _record: &DeliveryRecord) {
        self.acknowledged.fetch_add(1, Ordering::SeqCst);
    }

    fn filter(&self, message: &Message) -> bool {
        self.filter_calls.fetch_add(1, Ordering::SeqCst);
        !payload_is(message, self.reject_filter)
    }

    fn accept(&self, message: &Message) -> bool {
        !payload_is(message, self.reject_accept)
    }

    fn browse_acquired(&self) -> bool {
        self.browse_acquired
    }
}
