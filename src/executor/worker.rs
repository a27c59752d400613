//! # Worker loop: pop own queue, steal from peers, park when idle.
//!
//! Each worker owns exactly one [`WorkQueue`](super::queue::WorkQueue) and
//! holds a view over all of them. The loop:
//!
//! ```text
//! 1. pop_blocking(own queue)      → run task, restart loop
//! 2. cancelled & (no drain | own queue empty) → exit
//! 3. scan peers (i+1)&mask, (i+2)&mask, …  → try_steal, run on success
//! 4. back to 1 (parks up to park_timeout before the next scan)
//! ```
//!
//! ## Rules
//! - A worker only drains its **own** queue on shutdown; peers stop being
//!   scanned once the stop token is cancelled.
//! - The park in step 1 is bounded, so stealing activates within
//!   `park_timeout` even when every submission lands on one queue.

use std::sync::atomic::Ordering;

use tracing::trace;

use super::pool::Shared;

/// Runs worker `index` until shutdown. Thread body.
pub(super) fn run(shared: &Shared, index: usize) {
    let queue = &shared.queues[index];
    let peers = shared.queues.len();
    trace!(worker = index, "worker started");

    loop {
        if shared.cancel.is_cancelled()
            && (!shared.drain.load(Ordering::Acquire) || queue.is_empty())
        {
            break;
        }

        if let Some(job) = queue.pop_blocking(&shared.cancel, shared.park_timeout) {
            job.run();
            continue;
        }

        if shared.cancel.is_cancelled() {
            // Re-evaluate the exit condition; drain mode keeps popping.
            continue;
        }

        // Own queue is idle; scan the peers in ring order.
        for k in 1..peers {
            let victim = (index + k) & shared.mask;
            if let Some(job) = shared.queues[victim].try_steal() {
                trace!(worker = index, victim, "stole task");
                job.run();
                break;
            }
        }
    }

    trace!(worker = index, "worker exited");
}
