//! Task handles: move-only owners of running coroutine frames.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::runtime::context;
use crate::runtime::frame::{self, RawHandle, Suspend};

/// A running or completed task producing a `T`.
///
/// Creating a task runs its body immediately on the calling thread, up to
/// the first suspension; trivial bodies complete before `spawn` returns.
/// From there the task advances whenever the scheduler it parked itself on
/// is updated.
///
/// Exactly one party owns the frame at a time:
/// - holding the `Task` and dropping it destroys the frame (a frame still
///   in flight is destroyed at its next scheduled resume),
/// - awaiting the `Task` inside another task consumes it and yields the
///   task's value, re-raising the task's panic if it failed,
/// - [`forget`](Task::forget) hands the frame to itself, making it clean up
///   at completion; this is the fire-and-forget entry point.
pub struct Task<T> {
    raw: RawHandle,
    _result: PhantomData<T>,
}

impl<T> Unpin for Task<T> {}

impl<T: Send + 'static> Task<T> {
    /// Start a task. The body runs eagerly until it first suspends.
    ///
    /// Before [`initialize`](crate::initialize) the frame comes from the
    /// system allocator and the body must not reach a suspension point.
    pub fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Task {
            raw: frame::spawn_raw(future),
            _result: PhantomData,
        }
    }

    /// Whether the task has produced its result (or captured a failure).
    pub fn is_ready(&self) -> bool {
        self.raw.is_ready()
    }

    /// Detach the task and let it run to completion on its own. The frame
    /// destroys itself when it finishes; a failure is swallowed.
    pub fn forget(self) {
        let raw = self.raw;
        std::mem::forget(self);
        unsafe { raw.mark_forgotten() };
    }

    /// Degrade to a `Task<()>`, discarding the eventual value.
    pub fn into_unit(self) -> Task<()> {
        Task::spawn(async move {
            let _ = self.await;
        })
    }

    /// Await without unwinding: a captured panic is handed back as a value.
    pub(crate) fn catch(self) -> CatchUnwind<T> {
        CatchUnwind { task: self }
    }
}

impl<T> Drop for Task<T> {
    fn drop(&mut self) {
        unsafe { self.raw.release_owner() };
    }
}

impl<T: Send + 'static> Future for Task<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<T> {
        let raw = self.raw;
        if raw.is_ready() {
            return Poll::Ready(unsafe { raw.take_result::<T>() }.into_value());
        }
        let current = context::current_frame()
            .expect("a Task can only be awaited from inside another task");
        unsafe { current.set_pending(Suspend::AwaitTask(raw)) };
        Poll::Pending
    }
}

/// Awaits a task but converts a captured panic into an `Err` instead of
/// resuming the unwind. Used by the combinators, which must observe a
/// member's failure without dying with it.
pub(crate) struct CatchUnwind<T> {
    task: Task<T>,
}

impl<T> Unpin for CatchUnwind<T> {}

impl<T: Send + 'static> Future for CatchUnwind<T> {
    type Output = Result<T, Box<dyn Any + Send>>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let raw = self.task.raw;
        if raw.is_ready() {
            return Poll::Ready(unsafe { raw.take_result::<T>() }.into_result());
        }
        let current = context::current_frame()
            .expect("a Task can only be awaited from inside another task");
        unsafe { current.set_pending(Suspend::AwaitTask(raw)) };
        Poll::Pending
    }
}
