//! Frame and time waits.
//!
//! All of these are yield loops over the activated scheduler: time-based
//! waits re-check a monotonic clock each frame, so their granularity is the
//! host's update cadence. Each wait takes an optional [`CancelToken`] and
//! fails with [`Error::Stopped`] at the first yield after cancellation is
//! requested.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::runtime::context;
use crate::runtime::frame::{Reschedule, Suspend};
use crate::runtime::task::Task;

/// Suspend the current task for one frame tick: it is re-enqueued on the
/// activated scheduler and resumed by the next update.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

/// Future returned by [`yield_now`].
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        let current = context::current_frame().expect("yield_now outside a running task");
        unsafe { current.set_pending(Suspend::Reschedule(Reschedule::Activated)) };
        Poll::Pending
    }
}

/// An already-completed task. Awaiting it never suspends.
pub fn completed_task() -> Task<()> {
    Task::spawn(async {})
}

fn check_stopped(cancel: &Option<CancelToken>) -> Result<()> {
    match cancel {
        Some(token) if token.is_requested() => Err(Error::Stopped),
        _ => Ok(()),
    }
}

/// Complete after `frames` scheduler updates. `frames <= 0` completes
/// synchronously.
pub fn delay_frames(frames: i32, cancel: impl Into<Option<CancelToken>>) -> Task<Result<()>> {
    let cancel = cancel.into();
    Task::spawn(async move {
        let mut remaining = frames;
        while remaining > 0 {
            check_stopped(&cancel)?;
            yield_now().await;
            remaining -= 1;
        }
        Ok(())
    })
}

/// Complete once `duration` has elapsed, checked once per frame.
pub fn wait_for(duration: Duration, cancel: impl Into<Option<CancelToken>>) -> Task<Result<()>> {
    let cancel = cancel.into();
    Task::spawn(async move {
        let start = Instant::now();
        while start.elapsed() < duration {
            check_stopped(&cancel)?;
            yield_now().await;
        }
        Ok(())
    })
}

/// Complete once the clock reaches `deadline`. Past deadlines complete
/// synchronously.
pub fn wait_until(deadline: Instant, cancel: impl Into<Option<CancelToken>>) -> Task<Result<()>> {
    let cancel = cancel.into();
    Task::spawn(async move {
        while Instant::now() < deadline {
            check_stopped(&cancel)?;
            yield_now().await;
        }
        Ok(())
    })
}
