//! # Typed layer over the byte-oriented bus.
//!
//! [`TypedEventBus`] serializes a plain-old-data value to an opaque byte
//! payload on publish and reconstructs it on delivery, keeping the
//! [`EventBus`](crate::EventBus) core type-agnostic.
//!
//! ## Rules
//! - One payload type per topic is the application's contract; a payload
//!   whose length differs from `size_of::<T>()` is logged and skipped, it
//!   is **not** a supported multiplexing mechanism.
//! - Delivery is bit-exact: the subscriber sees the same bytes the
//!   publisher copied out of its value.
//!
//! ## The [`Pod`] contract
//! `Pod` is the trivially-copyable constraint expressed as an unsafe marker
//! trait. The crate implements it for the fixed-width integers, floats, and
//! arrays of `Pod`. Opt a struct in with `#[repr(C)]` and a manual impl:
//!
//! ```
//! use taskbus::Pod;
//!
//! #[repr(C)]
//! #[derive(Clone, Copy)]
//! struct Sample {
//!     channel: u32,
//!     value: f32,
//! }
//! // SAFETY: repr(C) pair of 32-bit fields; no padding, every bit pattern
//! // is a valid value.
//! unsafe impl Pod for Sample {}
//! ```

use std::mem::size_of;
use std::ptr;
use std::sync::Arc;

use tracing::warn;

use crate::config::Config;
use crate::events::bus::EventBus;
use crate::events::record::SubscriberId;

/// Marker for types that can cross the bus as raw bytes.
///
/// # Safety
///
/// Implementors must guarantee the type is plain old data: `Copy`, no
/// interior padding whose contents matter, no pointers or lifetimes, and
/// every bit pattern of `size_of::<Self>()` bytes is a valid value.
pub unsafe trait Pod: Copy + Send + 'static {}

macro_rules! impl_pod {
    ($($ty:ty),* $(,)?) => {
        $(
            // SAFETY: fixed-width primitive; every bit pattern is valid.
            unsafe impl Pod for $ty {}
        )*
    };
}

impl_pod!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, usize, isize, f32, f64);

// SAFETY: an array of plain old data is plain old data.
unsafe impl<T: Pod, const N: usize> Pod for [T; N] {}

/// Copies the value out as its raw bytes.
fn bytes_of<T: Pod>(value: &T) -> Vec<u8> {
    // SAFETY: Pod guarantees the value is a plain block of initialized
    // bytes of size_of::<T>().
    unsafe { std::slice::from_raw_parts((value as *const T).cast::<u8>(), size_of::<T>()) }
        .to_vec()
}

/// Rebuilds a value from exactly `size_of::<T>()` bytes.
fn value_from<T: Pod>(payload: &[u8]) -> Option<T> {
    if payload.len() != size_of::<T>() {
        return None;
    }
    // SAFETY: length checked; Pod accepts any bit pattern; the read is
    // unaligned because the payload buffer has no alignment guarantee.
    Some(unsafe { ptr::read_unaligned(payload.as_ptr().cast::<T>()) })
}

/// Typed publish/subscribe facade over [`EventBus`].
///
/// Mirrors subscribe/unsubscribe/publish/finalize with a payload type
/// parameter. Dropping it finalizes the inner bus.
pub struct TypedEventBus {
    bus: EventBus,
}

impl TypedEventBus {
    /// Creates a typed bus with its own executor of `workers` requested
    /// threads.
    pub fn new(workers: usize) -> Self {
        Self {
            bus: EventBus::new(workers),
        }
    }

    /// Creates a typed bus from a full [`Config`].
    pub fn with_config(config: Config) -> Self {
        Self {
            bus: EventBus::with_config(config),
        }
    }

    /// Wraps an existing bus.
    pub fn with_bus(bus: EventBus) -> Self {
        Self { bus }
    }

    /// The underlying byte-oriented bus.
    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Registers a typed handler for `topic`.
    ///
    /// The handler receives the payload by value. Payloads of the wrong
    /// size are logged at warn and skipped.
    pub fn subscribe<T, F>(&self, topic: impl Into<String>, handler: F) -> SubscriberId
    where
        T: Pod,
        F: Fn(T) + Send + Sync + 'static,
    {
        let topic = topic.into();
        let label: Arc<str> = Arc::from(topic.as_str());
        self.bus.subscribe(topic, move |payload| {
            match value_from::<T>(payload) {
                Some(value) => handler(value),
                None => warn!(
                    topic = %label,
                    expected = size_of::<T>(),
                    received = payload.len(),
                    "payload size mismatch; handler skipped"
                ),
            }
        })
    }

    /// Removes the subscription `id`. Idempotent.
    pub fn unsubscribe(&self, id: SubscriberId) {
        self.bus.unsubscribe(id);
    }

    /// Publishes `value` to every live subscriber of `topic` as its raw
    /// bytes.
    pub fn publish<T: Pod>(&self, topic: &str, value: T) {
        self.bus.publish(topic, &bytes_of(&value));
    }

    /// Stops the underlying executor with drain semantics. Idempotent.
    pub fn finalize(&self) {
        self.bus.finalize();
    }
}
