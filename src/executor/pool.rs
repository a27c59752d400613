//! # TaskExecutor: fixed work-stealing pool.
//!
//! [`TaskExecutor`] owns N worker threads and N work queues, where N is the
//! next power of two ≥ the requested count, so round-robin submission can
//! mask the counter instead of dividing.
//!
//! ## What it guarantees
//! - Every accepted task runs **exactly once**, on some worker.
//! - Every [`JoinHandle`] resolves: with the task's value, with
//!   [`ExecutorError::Panicked`], or with [`ExecutorError::Stopped`] /
//!   [`ExecutorError::QueueGrowth`] if the task never ran.
//! - [`TaskExecutor::stop`] joins all workers unconditionally; after it
//!   returns no previously submitted task is still executing.
//!
//! ## What it does **not** guarantee
//! - No global ordering across tasks. The subset of one queue's tasks that
//!   its owner pops runs in LIFO order; stolen tasks interleave arbitrarily.
//!   Callers that need ordering must encode it inside a task.
//!
//! ## Shutdown
//! `stop(true)` lets each worker drain its own queue before exiting;
//! `stop(false)` exits after the current task and aborts the leftovers with
//! [`ExecutorError::Stopped`]. Both join every worker.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{next_power_of_two, Config};
use crate::error::ExecutorError;
use crate::executor::queue::{PushError, WorkQueue};
use crate::executor::task::{envelope, Job, JoinHandle};
use crate::executor::worker;

/// State shared between the executor handle and its worker threads.
pub(super) struct Shared {
    pub(super) queues: Vec<WorkQueue<Job>>,
    pub(super) cancel: CancellationToken,
    /// Cleared by a non-draining stop; workers then exit without emptying
    /// their queues.
    pub(super) drain: AtomicBool,
    pub(super) park_timeout: Duration,
    pub(super) mask: usize,
}

/// Fixed-size work-stealing thread pool.
///
/// Created via [`TaskExecutor::new`] or [`TaskExecutor::with_config`];
/// share it across threads behind an `Arc`. Dropping the executor stops it
/// with drain semantics.
pub struct TaskExecutor {
    shared: Arc<Shared>,
    round_robin: AtomicU32,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl TaskExecutor {
    /// Creates a pool with `workers` requested threads.
    ///
    /// The effective count is the next power of two ≥ `max(1, workers)`.
    pub fn new(workers: usize) -> Self {
        Self::with_config(Config {
            workers,
            ..Config::default()
        })
    }

    /// Creates a pool from a full [`Config`].
    pub fn with_config(config: Config) -> Self {
        let count = next_power_of_two(config.workers);
        let queues = (0..count)
            .map(|_| WorkQueue::with_capacity(config.queue_capacity))
            .collect();
        let shared = Arc::new(Shared {
            queues,
            cancel: CancellationToken::new(),
            drain: AtomicBool::new(true),
            park_timeout: config.park_timeout,
            mask: count - 1,
        });

        let mut workers = Vec::with_capacity(count);
        for index in 0..count {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("taskbus-worker-{index}"))
                .spawn(move || worker::run(&shared, index))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }
        debug!(workers = count, "executor started");

        Self {
            shared,
            round_robin: AtomicU32::new(0),
            workers: Mutex::new(workers),
        }
    }

    /// Number of workers (and queues) in the pool.
    pub fn worker_count(&self) -> usize {
        self.shared.queues.len()
    }

    /// Whether [`stop`](Self::stop) has begun.
    pub fn is_stopped(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Submits a task and returns the handle to its outcome.
    ///
    /// The queue is picked round-robin; an idle owner is woken. Submitting
    /// to a stopped executor resolves the handle immediately with
    /// [`ExecutorError::Stopped`].
    pub fn submit<F, R>(&self, task: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_stopped() {
            return JoinHandle::rejected(ExecutorError::Stopped);
        }
        let index = self.round_robin.fetch_add(1, Ordering::Relaxed) as usize & self.shared.mask;
        self.push_job(index, task)
    }

    /// Submits a task to one specific queue. Test surface for exercising
    /// the stealing path; not part of the supported API.
    #[doc(hidden)]
    pub fn submit_pinned<F, R>(&self, index: usize, task: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.is_stopped() {
            return JoinHandle::rejected(ExecutorError::Stopped);
        }
        self.push_job(index & self.shared.mask, task)
    }

    fn push_job<F, R>(&self, index: usize, task: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (job, handle) = envelope(task);
        if let Err(PushError(job)) = self.shared.queues[index].push(job) {
            let capacity = self.shared.queues[index].capacity();
            warn!(worker = index, capacity, "queue growth failed; task rejected");
            job.abort(ExecutorError::QueueGrowth { capacity });
        }
        handle
    }

    /// Stops the pool and joins every worker. Idempotent.
    ///
    /// With `wait_until_done = true` each worker first drains its own queue,
    /// so every task accepted before the stop still runs. With `false`,
    /// workers exit after their current task and the still-queued jobs are
    /// aborted with [`ExecutorError::Stopped`] (their handles resolve).
    pub fn stop(&self, wait_until_done: bool) {
        if !wait_until_done {
            self.shared.drain.store(false, Ordering::Release);
        }
        self.shared.cancel.cancel();
        for queue in &self.shared.queues {
            queue.wake_all();
        }

        // The lock is held across the joins so that a concurrent stop
        // cannot observe a half-stopped pool.
        let mut workers = self.workers.lock();
        let current = thread::current().id();
        for handle in workers.drain(..) {
            if handle.thread().id() == current {
                // A task dropped the last executor reference from inside
                // the pool; joining ourselves would deadlock.
                continue;
            }
            let _ = handle.join();
        }
        drop(workers);

        // Abort whatever is left: leftovers of a non-draining stop, or
        // submissions that raced the cancellation.
        for queue in &self.shared.queues {
            while let Some(job) = queue.try_steal() {
                job.abort(ExecutorError::Stopped);
            }
        }
        debug!("executor stopped");
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.stop(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn single_worker_echo() {
        let pool = TaskExecutor::new(1);
        let handle = pool.submit(|| 42);
        assert_eq!(handle.wait(), Ok(42));
        pool.stop(true);
    }

    #[test]
    fn requested_counts_round_up_to_powers_of_two() {
        for (requested, effective) in [(0, 1), (1, 1), (2, 2), (3, 4), (4, 4), (5, 8)] {
            let pool = TaskExecutor::new(requested);
            assert_eq!(pool.worker_count(), effective, "requested {requested}");
            pool.stop(true);
        }
    }

    #[test]
    fn panicking_task_does_not_poison_the_worker() {
        let pool = TaskExecutor::new(1);

        let boom = pool.submit(|| -> u32 { panic!("boom") });
        assert_eq!(
            boom.wait(),
            Err(ExecutorError::Panicked { message: "boom".into() })
        );

        // Same single worker keeps serving.
        let after = pool.submit(|| 7);
        assert_eq!(after.wait(), Ok(7));
        pool.stop(true);
    }

    #[test]
    fn submit_after_stop_is_rejected() {
        let pool = TaskExecutor::new(2);
        pool.stop(true);
        let handle = pool.submit(|| 1);
        assert_eq!(handle.wait(), Err(ExecutorError::Stopped));
    }

    #[test]
    fn stop_is_idempotent() {
        let pool = TaskExecutor::new(2);
        pool.stop(true);
        pool.stop(true);
        pool.stop(false);
    }

    #[test]
    fn draining_stop_completes_every_task() {
        let pool = TaskExecutor::new(2);
        let ran = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..64)
            .map(|_| {
                let ran = Arc::clone(&ran);
                pool.submit(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        pool.stop(true);
        for handle in handles {
            assert_eq!(handle.wait(), Ok(()));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn non_draining_stop_resolves_every_handle() {
        let pool = TaskExecutor::new(1);
        let handles: Vec<_> = (0..128)
            .map(|_| pool.submit(|| thread::sleep(Duration::from_millis(1))))
            .collect();

        pool.stop(false);

        let mut ran = 0;
        let mut aborted = 0;
        for handle in handles {
            match handle.wait() {
                Ok(()) => ran += 1,
                Err(ExecutorError::Stopped) => aborted += 1,
                Err(other) => panic!("unexpected outcome: {other}"),
            }
        }
        assert_eq!(ran + aborted, 128);
    }

    #[tokio::test]
    async fn handles_resolve_in_async_context() {
        let pool = TaskExecutor::new(2);
        let handle = pool.submit(|| 5 * 5);
        assert_eq!(handle.await, Ok(25));
        pool.stop(true);
    }
}
