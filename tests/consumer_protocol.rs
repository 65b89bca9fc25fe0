#[path = "common.rs"]
mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use blipsub::core::consumer::{ClientConsumer, ClientOptions, Consumer};
use blipsub::core::cursor::SubscriptionType;
use blipsub::core::message::{new_message, SequenceNumber};
use blipsub::core::ownership::OwnershipToken;
use blipsub::core::queue::Dispatch;
use blipsub::{Queue, QueueSettings};

use common::Probe;

fn queue(name: &str) -> Arc<Queue> {
    Arc::new(Queue::new(name, QueueSettings::default()))
}

fn attach(queue: &Arc<Queue>, probe: Probe) -> (Arc<Probe>, Arc<dyn Consumer>) {
    let probe = Arc::new(probe);
    let handle: Arc<dyn Consumer> = probe.clone();
    queue.consume(&handle, false).expect("attach");
    (probe, handle)
}

#[test]
fn acquisition_mode_never_changes() {
    common::init_logging();
    let q = queue("acquires");
    let (consumer, c_handle) = attach(&q, Probe::new("acq-consumer", SubscriptionType::Consumer));
    let (browser, b_handle) = attach(&q, Probe::new("acq-browser", SubscriptionType::Browser));

    assert!(consumer.pre_acquires());
    assert!(!browser.pre_acquires());

    q.enqueue(new_message("m1")).unwrap();
    q.dispatch(&c_handle).unwrap();
    q.dispatch(&b_handle).unwrap();
    q.dispatch(&c_handle).unwrap();
    consumer.cancel();
    browser.cancel();

    assert!(consumer.pre_acquires());
    assert!(!browser.pre_acquires());
}

#[test]
fn browsing_leaves_messages_available_and_consuming_removes_them() {
    common::init_logging();
    let q = queue("browse-vs-consume");
    let (_browser, b_handle) = attach(&q, Probe::new("bvc-browser", SubscriptionType::Browser));
    let (_consumer, c_handle) = attach(&q, Probe::new("bvc-consumer", SubscriptionType::Consumer));

    for payload in ["a", "b", "c"] {
        q.enqueue(new_message(payload)).unwrap();
    }

    let browsed = q.drain(&b_handle).unwrap();
    assert_eq!(browsed, 3);
    assert_eq!(q.available(), 3);
    assert_eq!(q.depth(), 3);

    match q.dispatch(&c_handle).unwrap() {
        Dispatch::Delivered(d) => {
            assert!(d.acquired);
            assert_eq!(d.position, SequenceNumber(1));
            assert_eq!(q.available(), 2);
            assert!(q.dequeue(d.position));
        }
        other => panic!("expected a delivery, got {other:?}"),
    }
    assert_eq!(q.depth(), 2);
}

#[test]
fn filter_rejection_skips_deliver() {
    common::init_logging();
    let q = queue("filter");
    let (probe, handle) = attach(
        &q,
        Probe::new("filter-consumer", SubscriptionType::Consumer).rejecting_in_filter("skip"),
    );

    q.enqueue(new_message("skip")).unwrap();
    q.enqueue(new_message("take")).unwrap();

    match q.dispatch(&handle).unwrap() {
        Dispatch::Delivered(d) => assert_eq!(d.position, SequenceNumber(2)),
        other => panic!("expected a delivery, got {other:?}"),
    }
    assert_eq!(probe.deliver_calls.load(Ordering::SeqCst), 1);
    assert_eq!(probe.delivered_payloads(), vec![SequenceNumber(2)]);
    // The filtered message was never acquired.
    assert_eq!(q.available(), 1);
}

#[test]
fn accept_rejection_skips_deliver() {
    common::init_logging();
    let q = queue("accept");
    let (probe, handle) = attach(
        &q,
        Probe::new("accept-consumer", SubscriptionType::Consumer).rejecting_in_accept("later"),
    );

    q.enqueue(new_message("later")).unwrap();
    assert!(matches!(q.dispatch(&handle).unwrap(), Dispatch::Refused));
    assert_eq!(probe.deliver_calls.load(Ordering::SeqCst), 0);
    assert_eq!(q.available(), 1);
    assert!(!probe.in_listeners());
}

#[test]
fn deliver_after_cancel_is_refused_without_side_effects() {
    common::init_logging();
    let q = queue("late-deliver");
    let (probe, handle) = attach(&q, Probe::new("late-consumer", SubscriptionType::Consumer));
    q.enqueue(new_message("m1")).unwrap();

    probe.cancel();

    assert!(matches!(q.dispatch(&handle).unwrap(), Dispatch::Cancelled));
    let message = Arc::new(new_message("direct"));
    let cursor = probe.cursor();
    assert!(!probe.deliver(&cursor, &message));
    assert!(probe.delivered_payloads().is_empty());
    assert_eq!(probe.core().delivered_count(), 0);
    assert_eq!(q.available(), 1);
}

#[test]
fn cancelling_twice_matches_cancelling_once() {
    common::init_logging();
    let q = queue("double-cancel");
    let (probe, handle) = attach(&q, Probe::new("twice", SubscriptionType::Consumer));
    let (_other, _) = attach(&q, Probe::new("bystander", SubscriptionType::Consumer));

    assert!(matches!(q.dispatch(&handle).unwrap(), Dispatch::Empty));
    assert!(probe.in_listeners());

    probe.cancel();
    let after_first = (q.consumer_count(), q.listener_count(), probe.in_listeners());
    probe.cancel();
    let after_second = (q.consumer_count(), q.listener_count(), probe.in_listeners());

    assert_eq!(after_first, (1, 0, false));
    assert_eq!(after_first, after_second);
    assert!(probe.core().is_cancelled());
}

#[test]
fn cancelled_listener_is_removed_and_never_notified() {
    common::init_logging();
    let q = queue("cancel-listener");
    let (probe, handle) = attach(&q, Probe::new("waiting", SubscriptionType::Consumer));

    assert!(matches!(q.dispatch(&handle).unwrap(), Dispatch::Empty));
    assert!(probe.in_listeners());
    assert_eq!(q.listener_count(), 1);

    probe.cancel();
    assert!(!probe.in_listeners());
    assert_eq!(q.listener_count(), 0);

    probe.notify();
    q.enqueue(new_message("m1")).unwrap();
    assert_eq!(probe.notifications.load(Ordering::SeqCst), 0);
    assert!(!probe.core().take_signal());
}

#[test]
fn enqueue_wakes_one_consumer_and_every_browser() {
    common::init_logging();
    let q = queue("wake");
    let (c1, h1) = attach(&q, Probe::new("wake-c1", SubscriptionType::Consumer));
    let (c2, h2) = attach(&q, Probe::new("wake-c2", SubscriptionType::Consumer));
    let (b1, hb1) = attach(&q, Probe::new("wake-b1", SubscriptionType::Browser));
    let (b2, hb2) = attach(&q, Probe::new("wake-b2", SubscriptionType::Browser));
    for h in [&h1, &h2, &hb1, &hb2] {
        assert!(matches!(q.dispatch(h).unwrap(), Dispatch::Empty));
    }
    assert_eq!(q.listener_count(), 4);

    q.enqueue(new_message("m1")).unwrap();

    assert_eq!(c1.notifications.load(Ordering::SeqCst), 1);
    assert_eq!(c2.notifications.load(Ordering::SeqCst), 0);
    assert_eq!(b1.notifications.load(Ordering::SeqCst), 1);
    assert_eq!(b2.notifications.load(Ordering::SeqCst), 1);
    assert!(!c1.in_listeners());
    assert!(c2.in_listeners());
    assert!(!b1.in_listeners());
    assert_eq!(q.listener_count(), 1);
}

#[test]
fn listener_flag_agrees_with_registry_under_contention() {
    common::init_logging();
    let q = queue("contention");
    let mut probes = Vec::new();
    for i in 0..8 {
        let kind = if i % 2 == 0 {
            SubscriptionType::Consumer
        } else {
            SubscriptionType::Browser
        };
        probes.push(attach(&q, Probe::new(&format!("contender-{i}"), kind)));
    }

    let workers: Vec<_> = probes
        .iter()
        .enumerate()
        .map(|(i, (probe, handle))| {
            let q = Arc::clone(&q);
            let probe = Arc::clone(probe);
            let handle = Arc::clone(handle);
            thread::spawn(move || {
                for round in 0..200 {
                    if i == 0 {
                        let _ = q.enqueue(new_message("tick"));
                    }
                    if let Ok(Dispatch::Delivered(d)) = q.dispatch(&handle) {
                        if d.acquired {
                            if round % 3 == 0 {
                                q.release(d.position);
                            } else {
                                q.dequeue(d.position);
                            }
                        }
                    }
                    if i % 3 == 2 && round == 100 {
                        probe.cancel();
                    }
                }
            })
        })
        .collect();
    for w in workers {
        w.join().expect("worker panicked");
    }

    let flagged = probes.iter().filter(|(p, _)| p.in_listeners()).count();
    assert_eq!(flagged, q.listener_count());
    for (probe, _) in &probes {
        if probe.core().is_cancelled() {
            assert!(!probe.in_listeners());
        }
    }
}

#[test]
fn no_delivery_lands_after_cancel_returns() {
    common::init_logging();
    let q = queue("cancel-race");
    let (probe, handle) = attach(&q, Probe::new("racer", SubscriptionType::Consumer));

    let pump = {
        let q = Arc::clone(&q);
        let handle = Arc::clone(&handle);
        thread::spawn(move || {
            for _ in 0..2_000 {
                let _ = q.enqueue(new_message("m"));
                if let Ok(Dispatch::Delivered(d)) = q.dispatch(&handle) {
                    q.dequeue(d.position);
                }
            }
        })
    };

    thread::sleep(Duration::from_millis(2));
    probe.cancel();
    let at_cancel = probe.core().delivered_count();
    pump.join().expect("pump panicked");

    assert_eq!(probe.core().delivered_count(), at_cancel);
    assert_eq!(probe.delivered_payloads().len() as u64, at_cancel);
}

#[test]
fn client_browser_sees_each_message_once() {
    common::init_logging();
    let q = queue("client-browser");
    let client = Arc::new(ClientConsumer::new(
        "client-browser-1",
        OwnershipToken::new(),
        ClientOptions::browse(),
    ));
    let handle: Arc<dyn Consumer> = client.clone();
    q.consume(&handle, false).unwrap();

    q.enqueue(new_message("m1")).unwrap();
    q.enqueue(new_message("m2")).unwrap();
    assert_eq!(q.drain(&handle).unwrap(), 2);
    assert_eq!(q.drain(&handle).unwrap(), 0);

    let seen: Vec<_> = std::iter::from_fn(|| client.try_recv())
        .map(|d| d.position)
        .collect();
    assert_eq!(seen, vec![SequenceNumber(1), SequenceNumber(2)]);
    assert_eq!(q.available(), 2);
}
