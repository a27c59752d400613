//! # Runtime configuration.
//!
//! [`Config`] defines the executor's and bus's behavior: worker count,
//! per-worker queue capacity, tombstone compaction cadence, and how long an
//! idle worker parks before rescanning its peers for stealable work.
//!
//! All knobs are injected at construction time; there is no global state.
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use taskbus::Config;
//!
//! let mut cfg = Config::default();
//! cfg.workers = 3; // effective worker count rounds up to 4
//! cfg.queue_capacity = 128;
//! cfg.park_timeout = Duration::from_micros(500);
//!
//! assert_eq!(cfg.workers, 3);
//! ```

use std::time::Duration;

/// Configuration for [`TaskExecutor`](crate::TaskExecutor) and
/// [`EventBus`](crate::EventBus).
///
/// Controls pool sizing, queue sizing, bus compaction, and idle behavior.
#[derive(Clone, Debug)]
pub struct Config {
    /// Requested worker count.
    ///
    /// The effective count is the next power of two ≥ `max(1, workers)`,
    /// so that round-robin submission can mask instead of divide.
    pub workers: usize,
    /// Initial capacity of each worker's queue, rounded up to a power of two.
    ///
    /// Queues double their capacity when utilization reaches 75%; this only
    /// sets the starting point.
    pub queue_capacity: usize,
    /// Number of unsubscribes between bus compaction passes.
    ///
    /// Compaction removes tombstoned handler records from the topic index.
    pub compaction_interval: u32,
    /// Upper bound on how long an idle worker parks before it rescans the
    /// other workers' queues for stealable work.
    ///
    /// Smaller values make stealing kick in faster when load is skewed
    /// toward one queue, at the cost of more idle wakeups.
    pub park_timeout: Duration,
}

impl Default for Config {
    /// Provides a default configuration:
    /// - `workers = 4`
    /// - `queue_capacity = 256`
    /// - `compaction_interval = 10`
    /// - `park_timeout = 1ms`
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 256,
            compaction_interval: 10,
            park_timeout: Duration::from_millis(1),
        }
    }
}

/// Rounds `n` up to the next power of two, with a floor of 1.
pub(crate) fn next_power_of_two(n: usize) -> usize {
    n.max(1).next_power_of_two()
}
