//! Queue-side registry of consumers waiting for new messages.
//!
//! Membership is mirrored in each consumer's [`ListenerFlag`]. Only this
//! module can flip the flag, and it always does so in the same call that
//! updates the container, so the flag and actual membership agree.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use crate::core::consumer::{Consumer, ConsumerCore};

/// Read-only (outside this module) "is registered" marker.
#[derive(Debug, Default)]
pub struct ListenerFlag(AtomicBool);

impl ListenerFlag {
    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Sets the flag; `false` if it was already set.
    fn raise(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn lower(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Consumers to wake once the queue lock has been released.
#[derive(Debug, Default)]
pub struct NotificationSet {
    consumers: Vec<Arc<dyn Consumer>>,
}

impl NotificationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.consumers.iter().map(|c| c.name().to_string()).collect()
    }

    /// Delivers the wake-ups. Call without holding the queue lock.
    pub fn notify(self) {
        for consumer in self.consumers {
            trace!(target: "blipsub::listeners", consumer = %consumer.name(), "notifying listener");
            consumer.notify();
        }
    }
}

/// Waiting consumers (acquiring, FIFO) and browsers, held by non-owning
/// references. Mutated only under the owning queue's lock.
#[derive(Debug, Default)]
pub struct QueueListeners {
    consumers: VecDeque<Weak<dyn Consumer>>,
    browsers: Vec<Weak<dyn Consumer>>,
}

impl QueueListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `consumer` for a wake-up. Returns `false` if it is already
    /// registered (here or elsewhere) or has been cancelled.
    pub fn add_listener(&mut self, consumer: &Arc<dyn Consumer>) -> bool {
        let core = consumer.core();
        if core.is_cancelled() {
            return false;
        }
        if !core.listener_flag().raise() {
            debug!(target: "blipsub::listeners", consumer = %core.name(), "already registered");
            return false;
        }

        let entry = Arc::downgrade(consumer);
        if core.pre_acquires() {
            self.consumers.push_back(entry);
        } else {
            self.browsers.push(entry);
        }
        true
    }

    /// Unregisters the consumer owning `core`. Returns `false` if it was not
    /// registered here.
    pub fn remove_listener(&mut self, core: &ConsumerCore) -> bool {
        if !core.listener_flag().is_set() {
            return false;
        }

        let mut found = false;
        let mut keep = |entry: &Weak<dyn Consumer>| match entry.upgrade() {
            Some(c) if std::ptr::eq(c.core(), core) => {
                found = true;
                false
            }
            Some(_) => true,
            None => false,
        };

        if core.pre_acquires() {
            self.consumers.retain(|e| keep(e));
        } else {
            self.browsers.retain(|e| keep(e));
        }

        if found {
            core.listener_flag().lower();
        }
        found
    }

    /// Moves the first live waiting consumer and every waiting browser into
    /// `set`. A new message can only be acquired once, so waking more than one
    /// acquiring consumer would just produce empty dispatches.
    pub fn populate(&mut self, set: &mut NotificationSet) {
        while let Some(entry) = self.consumers.pop_front() {
            if let Some(consumer) = entry.upgrade() {
                consumer.core().listener_flag().lower();
                set.consumers.push(consumer);
                break;
            }
        }

        for entry in self.browsers.drain(..) {
            if let Some(browser) = entry.upgrade() {
                browser.core().listener_flag().lower();
                set.consumers.push(browser);
            }
        }
    }

    /// Moves every live listener into a set, e.g. when the queue goes away.
    pub fn notify_all(&mut self) -> NotificationSet {
        let mut set = NotificationSet::new();
        for entry in self.consumers.drain(..).chain(self.browsers.drain(..)) {
            if let Some(consumer) = entry.upgrade() {
                consumer.core().listener_flag().lower();
                set.consumers.push(consumer);
            }
        }
        set
    }

    /// Whether `consumer` is registered in this registry.
    pub fn contains(&self, consumer: &Arc<dyn Consumer>) -> bool {
        let core = consumer.core();
        if !core.listener_flag().is_set() {
            return false;
        }
        let list: Box<dyn Iterator<Item = &Weak<dyn Consumer>>> = if core.pre_acquires() {
            Box::new(self.consumers.iter())
        } else {
            Box::new(self.browsers.iter())
        };
        list.filter_map(Weak::upgrade)
            .any(|c| std::ptr::eq(c.core(), core))
    }

    pub fn len(&self) -> usize {
        self.consumers.len() + self.browsers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty() && self.browsers.is_empty()
    }
}
