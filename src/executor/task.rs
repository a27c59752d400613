//! # Task envelope and completion handle.
//!
//! Every submitted closure is boxed into a [`Runnable`] envelope holding the
//! sending half of a oneshot channel; [`JoinHandle`] is the receiving half.
//!
//! ## Rules
//! - Each envelope resolves its handle **exactly once**: with the closure's
//!   return value, with [`ExecutorError::Panicked`] if the closure panicked,
//!   or with the error passed to [`Runnable::abort`] if it never ran.
//! - A panicking task never unwinds into the worker thread.
//! - Dropping an envelope without running it resolves the handle with
//!   [`ExecutorError::Stopped`] (the closed channel is mapped on receive).

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::ExecutorError;

/// A queued unit of work.
pub(crate) type Job = Box<dyn Runnable + Send>;

/// Object-safe envelope around a submitted closure and its completion
/// channel.
pub(crate) trait Runnable {
    /// Runs the task and resolves the handle with its outcome.
    fn run(self: Box<Self>);
    /// Resolves the handle with `err` without running the task.
    fn abort(self: Box<Self>, err: ExecutorError);
}

struct Envelope<F, R> {
    task: F,
    tx: oneshot::Sender<Result<R, ExecutorError>>,
}

impl<F, R> Runnable for Envelope<F, R>
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    fn run(self: Box<Self>) {
        let Envelope { task, tx } = *self;
        let outcome = catch_unwind(AssertUnwindSafe(task)).map_err(ExecutorError::from_panic);
        // The caller may have dropped the handle; that is not an error.
        let _ = tx.send(outcome);
    }

    fn abort(self: Box<Self>, err: ExecutorError) {
        let Envelope { task, tx } = *self;
        drop(task);
        let _ = tx.send(Err(err));
    }
}

/// Packs `task` into a queueable envelope plus the handle that will observe
/// its outcome.
pub(crate) fn envelope<F, R>(task: F) -> (Job, JoinHandle<R>)
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    (Box::new(Envelope { task, tx }), JoinHandle { rx })
}

/// Handle to the outcome of one submitted task.
///
/// Resolves exactly once with the task's return value or an
/// [`ExecutorError`]. Await it from async code, or call
/// [`JoinHandle::wait`] from a plain thread.
#[must_use = "dropping a JoinHandle discards the task outcome"]
pub struct JoinHandle<R> {
    rx: oneshot::Receiver<Result<R, ExecutorError>>,
}

impl<R> JoinHandle<R> {
    /// Builds a handle that is already resolved with `err`.
    pub(crate) fn rejected(err: ExecutorError) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(err));
        Self { rx }
    }

    /// Blocks the current thread until the task resolves.
    ///
    /// Must not be called from async context; `await` the handle there
    /// instead.
    pub fn wait(self) -> Result<R, ExecutorError> {
        self.rx.blocking_recv().unwrap_or(Err(ExecutorError::Stopped))
    }
}

impl<R> Future for JoinHandle<R> {
    type Output = Result<R, ExecutorError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(ExecutorError::Stopped)))
    }
}
