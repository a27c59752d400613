//! End-to-end bus scenarios: typed round trip, late unsubscribe, and
//! subscribe/unsubscribe churn under heavy concurrent publishing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rand::Rng;
use taskbus::{EventBus, Pod, TypedEventBus};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
struct Payload {
    a: i32,
    b: i32,
}
// SAFETY: repr(C) pair of i32; no padding, every bit pattern valid.
unsafe impl Pod for Payload {}

#[test]
fn typed_round_trip() {
    let bus = TypedEventBus::new(2);
    let slot: Arc<Mutex<Option<Payload>>> = Arc::new(Mutex::new(None));

    let slot_in = Arc::clone(&slot);
    bus.subscribe("t", move |value: Payload| {
        *slot_in.lock().unwrap() = Some(value);
    });

    bus.publish("t", Payload { a: 100, b: -50 });
    bus.finalize();

    assert_eq!(*slot.lock().unwrap(), Some(Payload { a: 100, b: -50 }));
}

#[test]
fn late_unsubscribe_suppresses_only_that_handler() {
    let bus = TypedEventBus::new(2);
    let h1_calls = Arc::new(AtomicUsize::new(0));
    let h2_calls = Arc::new(AtomicUsize::new(0));
    let h2_seen: Arc<Mutex<Option<Payload>>> = Arc::new(Mutex::new(None));

    let h1_in = Arc::clone(&h1_calls);
    let h1 = bus.subscribe("t", move |_: Payload| {
        h1_in.fetch_add(1, Ordering::SeqCst);
    });
    let h2_in = Arc::clone(&h2_calls);
    let h2_slot = Arc::clone(&h2_seen);
    bus.subscribe("t", move |value: Payload| {
        h2_in.fetch_add(1, Ordering::SeqCst);
        *h2_slot.lock().unwrap() = Some(value);
    });

    bus.unsubscribe(h1);
    bus.publish("t", Payload { a: 1, b: 2 });
    bus.finalize();

    assert_eq!(h1_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h2_calls.load(Ordering::SeqCst), 1);
    assert_eq!(*h2_seen.lock().unwrap(), Some(Payload { a: 1, b: 2 }));
}

/// Churn a subscription on a topic while 50 publishers hammer it.
///
/// The program must terminate cleanly, and no handler may be invoked after
/// its unsubscribe returned.
#[test]
fn churn_under_concurrent_publishing() {
    let bus = Arc::new(EventBus::new(4));
    let running = Arc::new(AtomicBool::new(true));
    let violations = Arc::new(AtomicUsize::new(0));

    let publishers = 50;
    let mut joins = Vec::new();
    for _ in 0..publishers {
        let bus = Arc::clone(&bus);
        let running = Arc::clone(&running);
        joins.push(thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                bus.publish("t", &[]);
            }
        }));
    }

    let writer = {
        let bus = Arc::clone(&bus);
        let violations = Arc::clone(&violations);
        thread::spawn(move || {
            let mut rng = rand::thread_rng();
            let deadline = Instant::now() + Duration::from_millis(200);
            let mut churns = 0_u32;
            while Instant::now() < deadline {
                // `retired` flips only after unsubscribe returned AND every
                // handler that had legally begun has exited; any invocation
                // that still observes it is a real violation.
                let retired = Arc::new(AtomicBool::new(false));
                let entered = Arc::new(AtomicUsize::new(0));
                let exited = Arc::new(AtomicUsize::new(0));

                let retired_in = Arc::clone(&retired);
                let entered_in = Arc::clone(&entered);
                let exited_in = Arc::clone(&exited);
                let violations = Arc::clone(&violations);
                let id = bus.subscribe("t", move |_| {
                    entered_in.fetch_add(1, Ordering::SeqCst);
                    if retired_in.load(Ordering::SeqCst) {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    exited_in.fetch_add(1, Ordering::SeqCst);
                });
                thread::sleep(Duration::from_micros(rng.gen_range(0..200)));
                bus.unsubscribe(id);
                while entered.load(Ordering::SeqCst) != exited.load(Ordering::SeqCst) {
                    std::hint::spin_loop();
                }
                retired.store(true, Ordering::SeqCst);
                churns += 1;
            }
            churns
        })
    };

    let churns = writer.join().unwrap();
    running.store(false, Ordering::Relaxed);
    for join in joins {
        join.join().unwrap();
    }
    bus.finalize();

    assert!(churns > 0, "writer made no progress");
    assert_eq!(
        violations.load(Ordering::SeqCst),
        0,
        "handler ran after its unsubscribe returned"
    );
}

#[test]
fn subscribe_before_publish_observes_the_publish() {
    let bus = Arc::new(EventBus::new(2));
    let seen = Arc::new(AtomicUsize::new(0));

    let seen_in = Arc::clone(&seen);
    bus.subscribe("boot", move |_| {
        seen_in.fetch_add(1, Ordering::SeqCst);
    });

    // Publish from a different thread than the subscriber's.
    let publisher = {
        let bus = Arc::clone(&bus);
        thread::spawn(move || bus.publish("boot", b"go"))
    };
    publisher.join().unwrap();
    bus.finalize();

    assert_eq!(seen.load(Ordering::SeqCst), 1);
}
