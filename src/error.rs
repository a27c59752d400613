//! # Error types for task submission and completion.
//!
//! [`ExecutorError`] is the single error enum surfaced through
//! [`JoinHandle`](crate::JoinHandle): submission to a stopped pool, a failed
//! queue growth, or a panic inside the task itself.
//!
//! Bus-side failures (a panicking handler, a payload size mismatch, an
//! unsubscribe for an unknown id) never reach a caller; they are logged and
//! swallowed, because dispatch tasks have no caller-visible handle.
//!
//! [`ExecutorError::as_label`] provides a short stable snake_case label for
//! use in logs and metrics.

use thiserror::Error;

/// Errors produced by the executor and delivered through task handles.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The executor was stopped before the task could run.
    ///
    /// Returned for submissions made after [`stop`](crate::TaskExecutor::stop)
    /// and for tasks that were still queued when a non-draining stop
    /// discarded them.
    #[error("executor is stopped; task was not executed")]
    Stopped,

    /// Growing a work queue failed; the queue stays usable at its current
    /// capacity and the task was rejected.
    #[error("work queue growth failed at capacity {capacity}")]
    QueueGrowth {
        /// Capacity the queue had when the growth attempt failed.
        capacity: usize,
    },

    /// The task panicked while running.
    ///
    /// The worker thread survives; the panic payload is recovered as a
    /// message when it is a string.
    #[error("task panicked: {message}")]
    Panicked {
        /// Panic payload rendered as text (`"<non-string panic>"` otherwise).
        message: String,
    },
}

impl ExecutorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecutorError::Stopped => "executor_stopped",
            ExecutorError::QueueGrowth { .. } => "queue_growth_failed",
            ExecutorError::Panicked { .. } => "task_panicked",
        }
    }

    /// Builds a [`ExecutorError::Panicked`] from a `catch_unwind` payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "<non-string panic>".to_string()
        };
        ExecutorError::Panicked { message }
    }
}
