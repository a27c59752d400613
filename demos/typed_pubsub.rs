//! Typed publish/subscribe demo: two subscribers on one topic, dynamic
//! unsubscribe, bit-exact payload delivery.
//!
//! Run with: `cargo run --example typed_pubsub`

use std::thread;
use std::time::Duration;

use taskbus::{Pod, TypedEventBus};

#[repr(C)]
#[derive(Clone, Copy, Debug)]
struct Reading {
    channel: u32,
    raw: i32,
}
// SAFETY: repr(C) pair of 32-bit fields; no padding, all bit patterns valid.
unsafe impl Pod for Reading {}

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let bus = TypedEventBus::new(2);

    let logger = bus.subscribe("readings", |r: Reading| {
        println!("[logger]  channel={} raw={}", r.channel, r.raw);
    });
    bus.subscribe("readings", |r: Reading| {
        if r.raw < 0 {
            println!("[alarm ]  negative reading on channel {}", r.channel);
        }
    });

    for raw in [100, -50, 75] {
        bus.publish("readings", Reading { channel: 1, raw });
    }
    thread::sleep(Duration::from_millis(50));

    // The logger goes away; the alarm keeps watching.
    bus.unsubscribe(logger);
    bus.publish("readings", Reading { channel: 2, raw: -1 });

    bus.finalize();
    println!("bus finalized");
}
