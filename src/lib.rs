//! # taskbus
//!
//! **Taskbus** is a concurrency substrate for native services: a fixed-size
//! work-stealing thread pool plus a topic-based event bus that fans typed
//! payloads out to many subscribers asynchronously, with dynamic
//! subscribe/unsubscribe.
//!
//! ## Features
//!
//! | Area              | Description                                                            | Key types / traits                  |
//! |-------------------|------------------------------------------------------------------------|-------------------------------------|
//! | **Executor**      | Fixed pool of workers with per-worker deques and work stealing.        | [`TaskExecutor`], [`JoinHandle`]    |
//! | **Event bus**     | Topic → subscriber fan-out with copy-on-write subscriber lists.        | [`EventBus`], [`SubscriberId`]      |
//! | **Typed bus**     | Bit-exact plain-old-data payloads over the byte bus.                   | [`TypedEventBus`], [`Pod`]          |
//! | **Timing**        | Fixed-interval task source feeding the pool.                           | [`Timer`]                           |
//! | **Errors**        | Typed submission/completion errors with stable log labels.             | [`ExecutorError`]                   |
//! | **Configuration** | Injected knobs: pool size, queue capacity, compaction, idle parking.   | [`Config`]                          |
//!
//! ## Example
//!
//! ```
//! use taskbus::{Pod, TaskExecutor, TypedEventBus};
//!
//! #[repr(C)]
//! #[derive(Clone, Copy, Debug, PartialEq)]
//! struct Tick {
//!     sequence: u64,
//! }
//! // SAFETY: repr(C) single u64; every bit pattern is valid.
//! unsafe impl Pod for Tick {}
//!
//! // Plain task execution with a result handle.
//! let pool = TaskExecutor::new(2);
//! let answer = pool.submit(|| 6 * 7);
//! assert_eq!(answer.wait(), Ok(42));
//! pool.stop(true);
//!
//! // Typed fan-out over the bus.
//! let bus = TypedEventBus::new(2);
//! bus.subscribe("ticks", |tick: Tick| {
//!     let _ = tick.sequence;
//! });
//! bus.publish("ticks", Tick { sequence: 1 });
//! bus.finalize();
//! ```
//!
//! ## Delivery model
//!
//! Publishing snapshots the topic's immutable subscriber list and submits
//! one pool task per live subscriber; handlers run concurrently and in no
//! particular order. Unsubscribing tombstones the record so not-yet-started
//! deliveries skip it, and a periodic compaction pass reclaims the dead
//! entries. See [`EventBus`] for the exact guarantees.

mod config;
mod error;
mod events;
mod executor;

pub use config::Config;
pub use error::ExecutorError;
pub use events::{EventBus, Pod, SubscriberId, TypedEventBus};
pub use executor::{JoinHandle, TaskExecutor, Timer};
