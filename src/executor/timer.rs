//! # Fixed-interval timer that feeds an executor.
//!
//! [`Timer`] runs one dedicated thread that submits a closure to a
//! [`TaskExecutor`] every `interval`, so the tick body itself runs on the
//! pool, not on the timer thread.
//!
//! ## Rules
//! - Ticks are scheduled on a fixed cadence measured from the previous
//!   wakeup; a slow tick body does not delay the next submission.
//! - [`Timer::stop`] wakes the sleeper, joins the thread, and is
//!   idempotent. Ticks already submitted follow executor shutdown
//!   semantics.
//! - Ticks fired at a stopped executor are skipped and logged at debug.
//!
//! There is no global timer registry; a `Timer` is an ordinary owned value
//! and stops on drop.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::debug;

use crate::executor::pool::TaskExecutor;

struct TimerShared {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Periodic task source bound to an executor.
pub struct Timer {
    shared: Arc<TimerShared>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Timer {
    /// Starts a timer that submits `tick` to `executor` every `interval`.
    ///
    /// The first submission happens one `interval` after start.
    pub fn start<F>(interval: Duration, executor: Arc<TaskExecutor>, tick: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let shared = Arc::new(TimerShared {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });
        let tick = Arc::new(tick);

        let thread = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("taskbus-timer".to_string())
                .spawn(move || loop {
                    {
                        let mut stopped = shared.stopped.lock();
                        if *stopped {
                            break;
                        }
                        if !shared.wake.wait_for(&mut stopped, interval).timed_out() {
                            // Woken explicitly; either stopping or spurious.
                            if *stopped {
                                break;
                            }
                            continue;
                        }
                    }

                    if executor.is_stopped() {
                        debug!("timer tick skipped; executor stopped");
                        continue;
                    }
                    let tick = Arc::clone(&tick);
                    drop(executor.submit(move || (*tick)()));
                })
                .expect("failed to spawn timer thread")
        };

        Self {
            shared,
            thread: Mutex::new(Some(thread)),
        }
    }

    /// Whether the timer thread is still running.
    pub fn is_running(&self) -> bool {
        !*self.shared.stopped.lock()
    }

    /// Stops the timer and joins its thread. Idempotent.
    pub fn stop(&self) {
        {
            let mut stopped = self.shared.stopped.lock();
            *stopped = true;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
