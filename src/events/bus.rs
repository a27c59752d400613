//! # Topic-addressed event bus with asynchronous fan-out.
//!
//! [`EventBus`] maps topic strings to immutable subscriber lists and
//! dispatches every publish as one executor task per live subscriber.
//!
//! ## What it guarantees
//! - A subscribe that returned before a publish observes that publish
//!   (write-then-read lock pairing on the topic index).
//! - An unsubscribe that returned before a dispatch task starts prevents
//!   the handler from being invoked (the in-task active recheck).
//! - Handler panics are caught per dispatch, logged with topic and
//!   subscriber id, and never reach the publisher.
//! - Publishing to a topic with no subscribers is a silent no-op.
//!
//! ## What it does **not** guarantee
//! - No ordering across subscribers of one publish, and no ordering across
//!   two publishes to the same subscriber; dispatch tasks land round-robin
//!   on the pool. Subscribers that need in-order receipt must serialize
//!   internally.
//! - An unsubscribe issued after a handler has started does not cancel it.
//!
//! ## Index discipline
//! The topic index holds a shared reference to an **immutable** list per
//! topic. Subscribe and compaction clone the list, modify the clone, and
//! swap the slot under the writer lock; publishers snapshot the shared
//! reference under the reader lock and walk it lock-free. Unsubscribed
//! records are tombstoned via an atomic flag and physically removed every
//! [`Config::compaction_interval`](crate::Config) unsubscribes by a
//! compaction task running on the pool.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::config::Config;
use crate::events::record::{Handler, HandlerRecord, SubscriberId, TopicList};
use crate::executor::pool::TaskExecutor;

struct BusInner {
    /// Topic → current immutable subscriber list.
    topics: RwLock<HashMap<String, Arc<TopicList>>>,
    /// Lookup aid for O(1) unsubscribe; never extends record lifetime.
    registry: Mutex<HashMap<SubscriberId, Weak<HandlerRecord>>>,
    next_id: AtomicU32,
    unsubscribes: AtomicU32,
    compaction_interval: u32,
}

impl BusInner {
    /// Rebuilds every topic list without tombstoned records.
    fn compact(&self) {
        let mut topics = self.topics.write();
        for slot in topics.values_mut() {
            if slot.iter().all(|record| record.is_active()) {
                continue;
            }
            let live: TopicList = slot
                .iter()
                .filter(|record| record.is_active())
                .cloned()
                .collect();
            *slot = Arc::new(live);
        }
    }
}

/// Topic-based publish/subscribe bus over a [`TaskExecutor`].
///
/// Payloads are opaque byte slices; see
/// [`TypedEventBus`](crate::TypedEventBus) for typed payloads. Dropping the
/// bus finalizes it.
pub struct EventBus {
    inner: Arc<BusInner>,
    executor: Arc<TaskExecutor>,
}

impl EventBus {
    /// Creates a bus with its own executor of `workers` requested threads.
    pub fn new(workers: usize) -> Self {
        Self::with_config(Config {
            workers,
            ..Config::default()
        })
    }

    /// Creates a bus (and its executor) from a full [`Config`].
    pub fn with_config(config: Config) -> Self {
        let interval = config.compaction_interval.max(1);
        let executor = Arc::new(TaskExecutor::with_config(config));
        Self::build(executor, interval)
    }

    /// Creates a bus over a caller-provided executor.
    ///
    /// [`EventBus::finalize`] stops that executor, shared or not.
    pub fn with_executor(executor: Arc<TaskExecutor>) -> Self {
        Self::build(executor, Config::default().compaction_interval)
    }

    fn build(executor: Arc<TaskExecutor>, compaction_interval: u32) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: RwLock::new(HashMap::new()),
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU32::new(0),
                unsubscribes: AtomicU32::new(0),
                compaction_interval,
            }),
            executor,
        }
    }

    /// The executor dispatch tasks run on.
    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    /// Registers `handler` for `topic` and returns its id.
    ///
    /// The handler runs on pool workers, potentially concurrently with
    /// itself; it must be `Send + Sync`.
    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriberId
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        let id = SubscriberId::new(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let record = Arc::new(HandlerRecord::new(id, Box::new(handler) as Handler));

        self.inner
            .registry
            .lock()
            .insert(id, Arc::downgrade(&record));

        let mut topics = self.inner.topics.write();
        let slot = topics
            .entry(topic.into())
            .or_insert_with(|| Arc::new(TopicList::new()));
        let mut next = (**slot).clone();
        next.push(record);
        *slot = Arc::new(next);
        id
    }

    /// Removes the subscription `id`. Idempotent; unknown ids are logged at
    /// debug and ignored.
    ///
    /// When this returns, dispatch tasks that have not yet started will skip
    /// the handler. Every `compaction_interval`-th unsubscribe schedules a
    /// compaction pass on the pool.
    pub fn unsubscribe(&self, id: SubscriberId) {
        let record = self
            .inner
            .registry
            .lock()
            .remove(&id)
            .and_then(|weak| weak.upgrade());
        let Some(record) = record else {
            debug!(subscriber = %id, "unsubscribe for unknown id");
            return;
        };

        record.retire();

        let count = self.inner.unsubscribes.fetch_add(1, Ordering::Relaxed) + 1;
        if count % self.inner.compaction_interval == 0 {
            // Weak capture: an in-flight compaction must not keep the bus
            // alive through its own executor.
            let inner = Arc::downgrade(&self.inner);
            drop(self.executor.submit(move || {
                if let Some(inner) = inner.upgrade() {
                    inner.compact();
                }
            }));
        }
    }

    /// Publishes `payload` to every live subscriber of `topic`.
    ///
    /// Returns immediately; handlers run as pool tasks, each holding the
    /// record and a shared copy of the payload. No subscribers, unknown
    /// topic, or a finalized bus are silent no-ops.
    pub fn publish(&self, topic: &str, payload: &[u8]) {
        if self.executor.is_stopped() {
            debug!(topic, "publish on finalized bus ignored");
            return;
        }

        let snapshot = self.inner.topics.read().get(topic).cloned();
        let Some(snapshot) = snapshot else { return };
        if snapshot.is_empty() {
            return;
        }

        let payload: Arc<[u8]> = Arc::from(payload);
        let topic: Arc<str> = Arc::from(topic);
        for record in snapshot.iter() {
            if !record.is_active() {
                continue;
            }
            let record = Arc::clone(record);
            let payload = Arc::clone(&payload);
            let topic = Arc::clone(&topic);
            drop(self.executor.submit(move || {
                // The subscription may have been retired between the
                // snapshot and this task starting.
                if !record.is_active() {
                    return;
                }
                if catch_unwind(AssertUnwindSafe(|| record.invoke(&payload))).is_err() {
                    error!(topic = %topic, subscriber = %record.id(), "handler panicked");
                }
            }));
        }
    }

    /// Stops the underlying executor with drain semantics. Idempotent.
    ///
    /// Dispatch tasks already enqueued still run; the bus accepts no
    /// further publishes afterwards.
    pub fn finalize(&self) {
        self.executor.stop(true);
    }

    /// Current number of records (live and tombstoned) on `topic`'s list.
    #[cfg(test)]
    pub(crate) fn topic_len(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map_or(0, |list| list.len())
    }

    /// Runs a compaction pass inline.
    #[cfg(test)]
    pub(crate) fn compact_now(&self) {
        self.inner.compact();
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        self.finalize();
    }
}
