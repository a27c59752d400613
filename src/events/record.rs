//! # Subscription identity and handler records.
//!
//! [`SubscriberId`] is the opaque ticket returned by subscribe;
//! [`HandlerRecord`] is the shared registration behind it. A record is
//! *tombstoned* (active flag cleared) on unsubscribe and physically removed
//! later by compaction, so publishers holding an older snapshot only ever
//! see a dead flag, never freed memory.
//!
//! Lifecycle of a subscription:
//!
//! ```text
//! ACTIVE ──unsubscribe──► TOMBSTONED ──compaction──► REAPED
//!            (active=false, still in snapshots)    (no snapshot holds it)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// Opaque identifier of one subscription, unique for the lifetime of the
/// bus that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u32);

impl SubscriberId {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handler closure invoked with the raw payload bytes.
pub(crate) type Handler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// One registered subscription: id, handler, and the tombstone flag.
///
/// The handler is read-only after construction; `active` is the only
/// mutable field and is atomic.
pub(crate) struct HandlerRecord {
    id: SubscriberId,
    active: AtomicBool,
    handler: Handler,
}

impl HandlerRecord {
    pub fn new(id: SubscriberId, handler: Handler) -> Self {
        Self {
            id,
            active: AtomicBool::new(true),
            handler,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the subscription is still live. Dispatch tasks re-check this
    /// immediately before invoking the handler.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Tombstones the record. Idempotent.
    pub fn retire(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn invoke(&self, payload: &[u8]) {
        (self.handler)(payload);
    }
}

/// Immutable subscriber list for one topic. Mutations replace the whole
/// list (copy-on-write); a published list is never edited in place.
pub(crate) type TopicList = Vec<std::sync::Arc<HandlerRecord>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retire_is_sticky_and_idempotent() {
        let record = HandlerRecord::new(SubscriberId::new(1), Box::new(|_| {}));
        assert!(record.is_active());
        record.retire();
        record.retire();
        assert!(!record.is_active());
    }

    #[test]
    fn invoke_passes_the_payload_through() {
        use std::sync::atomic::AtomicUsize;
        use std::sync::Arc;

        let seen = Arc::new(AtomicUsize::new(0));
        let record = {
            let seen = Arc::clone(&seen);
            HandlerRecord::new(
                SubscriberId::new(2),
                Box::new(move |payload| {
                    seen.store(payload.len(), Ordering::SeqCst);
                }),
            )
        };
        record.invoke(&[1, 2, 3]);
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
