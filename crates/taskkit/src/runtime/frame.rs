//! Type-erased task frames and the resume trampoline.
//!
//! A frame is one heap block holding a header (vtable, completion word,
//! suspension request slot, owning allocator) followed by the task's future
//! and result slot. Frames are created eagerly: the body runs on the calling
//! thread until its first suspension.
//!
//! The completion word encodes the whole promise lifecycle in one atomic
//! `usize`:
//!
//! | value            | meaning                                             |
//! |------------------|-----------------------------------------------------|
//! | `STATE_EMPTY`    | running or suspended, nobody waiting                |
//! | `STATE_DONE`     | result stored, ready forever                        |
//! | `STATE_FORGOTTEN`| owner detached; destroy self at completion          |
//! | `STATE_DETACHED` | owner dropped mid-flight; destroy at next resume    |
//! | other            | a continuation handle registered by an awaiter      |
//!
//! Awaiters never enqueue or register directly from inside a poll. They
//! record a [`Suspend`] request in the header, and [`resume`] honors it once
//! the poll has returned and the frame is quiescent. That one rule makes
//! cross-thread handoff sound: a frame is either being polled or parked in
//! exactly one queue / continuation slot, never both.

use std::any::Any;
use std::cell::{Cell, UnsafeCell};
use std::future::Future;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

use crate::alloc::{TaskAllocator, MAX_ALIGN};
use crate::runtime::context::{self, PromiseContext};
use crate::runtime::manager::SchedulerId;

pub(crate) const STATE_EMPTY: usize = 0;
pub(crate) const STATE_DONE: usize = 1;
pub(crate) const STATE_FORGOTTEN: usize = 2;
pub(crate) const STATE_DETACHED: usize = 3;

/// Where a suspended frame wants to be re-enqueued.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Reschedule {
    /// The scheduler activated on the thread performing the resume.
    Activated,
    /// A specific scheduler.
    Scheduler(SchedulerId),
    /// The thread pool, round-robin.
    ThreadPool,
}

/// Request left in the header by an awaiter returning `Pending`.
#[derive(Clone, Copy)]
pub(crate) enum Suspend {
    /// Re-enqueue the frame somewhere.
    Reschedule(Reschedule),
    /// Register the frame as the continuation of this sub-task.
    AwaitTask(RawHandle),
}

/// Outcome of polling a frame once.
enum Step {
    /// `Pending`; any `Suspend` request is waiting in the header.
    Yielded,
    /// Completed; control passes to this continuation.
    Transfer(RawHandle),
    /// Completed (or destroyed itself) with nothing to resume.
    Done,
}

struct Vtable {
    /// Poll the future once. The caller must hold the frame exclusively.
    poll: unsafe fn(NonNull<Header>) -> Step,
    /// Drop the body (future or untaken result) and free the frame memory.
    drop_frame: unsafe fn(NonNull<Header>),
    /// Move the stored `PromiseResult<T>` out into `*out`.
    take_result: unsafe fn(NonNull<Header>, out: *mut ()),
}

#[repr(C)]
pub(crate) struct Header {
    vtable: &'static Vtable,
    state: AtomicUsize,
    /// Only touched by the thread currently polling the frame.
    pending: Cell<Option<Suspend>>,
    allocator: TaskAllocator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Running,
    Done,
    Taken,
}

#[repr(C)]
struct Frame<F: Future> {
    header: Header,
    stage: Cell<Stage>,
    future: UnsafeCell<ManuallyDrop<F>>,
    result: UnsafeCell<MaybeUninit<PromiseResult<F::Output>>>,
}

impl<F: Future> Frame<F> {
    const VTABLE: Vtable = Vtable {
        poll: poll_frame::<F>,
        drop_frame: drop_frame::<F>,
        take_result: take_result::<F>,
    };
}

/// A task's stored outcome: the returned value or a captured panic payload.
pub(crate) enum PromiseResult<T> {
    Returned(T),
    Panicked(Box<dyn Any + Send>),
}

impl<T> PromiseResult<T> {
    /// Unwrap the value, re-raising a captured panic in the caller.
    pub(crate) fn into_value(self) -> T {
        match self {
            PromiseResult::Returned(value) => value,
            PromiseResult::Panicked(payload) => panic::resume_unwind(payload),
        }
    }

    pub(crate) fn into_result(self) -> Result<T, Box<dyn Any + Send>> {
        match self {
            PromiseResult::Returned(value) => Ok(value),
            PromiseResult::Panicked(payload) => Err(payload),
        }
    }
}

/// Opaque reference to a frame. Copyable; validity is governed by the
/// ownership rules above.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct RawHandle(NonNull<Header>);

// Frames migrate between threads through scheduler queues; access is
// serialized by the single-holder discipline.
unsafe impl Send for RawHandle {}

impl RawHandle {
    fn as_usize(self) -> usize {
        self.0.as_ptr() as usize
    }

    unsafe fn from_usize(value: usize) -> Self {
        RawHandle(NonNull::new_unchecked(value as *mut Header))
    }

    unsafe fn header<'a>(self) -> &'a Header {
        self.0.as_ref()
    }

    /// Whether the frame's result has been produced. True forever once set.
    pub(crate) fn is_ready(self) -> bool {
        unsafe { self.header().state.load(Ordering::Acquire) == STATE_DONE }
    }

    /// Detach the frame from its owner: an already-completed frame is
    /// destroyed now, a pending one destroys itself at completion.
    pub(crate) unsafe fn mark_forgotten(self) {
        match self.header().state.compare_exchange(
            STATE_EMPTY,
            STATE_FORGOTTEN,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STATE_DONE) => self.destroy(),
            Err(_) => unreachable!("forgotten task still had an awaiter"),
        }
    }

    /// The owning `Task` is going away. A completed frame dies now; a
    /// pending one (possibly sitting in a queue or registered as a
    /// continuation) is destroyed at its next resume instead, when the
    /// runtime holds it exclusively.
    pub(crate) unsafe fn release_owner(self) {
        let state = &self.header().state;
        let mut current = state.load(Ordering::Acquire);
        loop {
            if current == STATE_DONE {
                self.destroy();
                return;
            }
            debug_assert!(current != STATE_FORGOTTEN && current != STATE_DETACHED);
            match state.compare_exchange_weak(
                current,
                STATE_DETACHED,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Record the suspension request honored after the current poll returns.
    pub(crate) unsafe fn set_pending(self, request: Suspend) {
        self.header().pending.set(Some(request));
    }

    /// Drop the frame's body and release its memory.
    pub(crate) unsafe fn destroy(self) {
        (self.header().vtable.drop_frame)(self.0);
    }

    /// Move the stored result out. The frame must be ready and `T` must be
    /// the frame's output type.
    pub(crate) unsafe fn take_result<T>(self) -> PromiseResult<T> {
        let mut slot = MaybeUninit::<PromiseResult<T>>::uninit();
        (self.header().vtable.take_result)(self.0, slot.as_mut_ptr() as *mut ());
        slot.assume_init()
    }
}

const NOOP_WAKER_VTABLE: RawWakerVTable = RawWakerVTable::new(
    |_| RawWaker::new(std::ptr::null(), &NOOP_WAKER_VTABLE),
    |_| {},
    |_| {},
    |_| {},
);

// Suspension never goes through wakers here; every awaiter talks to the
// frame header instead.
fn noop_waker() -> Waker {
    unsafe { Waker::from_raw(RawWaker::new(std::ptr::null(), &NOOP_WAKER_VTABLE)) }
}

unsafe fn poll_frame<F: Future>(ptr: NonNull<Header>) -> Step {
    let frame = ptr.cast::<Frame<F>>().as_ptr();
    debug_assert_eq!((*frame).stage.get(), Stage::Running);

    let previous = context::swap_current_frame(Some(RawHandle(ptr)));
    let waker = noop_waker();
    let mut cx = Context::from_waker(&waker);
    let pinned = Pin::new_unchecked(&mut **(*frame).future.get());
    let poll = panic::catch_unwind(AssertUnwindSafe(|| pinned.poll(&mut cx)));
    context::swap_current_frame(previous);

    let result = match poll {
        Ok(Poll::Pending) => return Step::Yielded,
        Ok(Poll::Ready(value)) => PromiseResult::Returned(value),
        Err(payload) => PromiseResult::Panicked(payload),
    };

    ManuallyDrop::drop(&mut *(*frame).future.get());
    (*(*frame).result.get()).write(result);
    (*frame).stage.set(Stage::Done);

    // After this swap publishes DONE, the frame may be destroyed by its
    // owner at any moment; only the branches below may still touch it.
    match (*frame).header.state.swap(STATE_DONE, Ordering::AcqRel) {
        STATE_EMPTY => Step::Done,
        STATE_FORGOTTEN | STATE_DETACHED => {
            drop_frame::<F>(ptr);
            Step::Done
        }
        STATE_DONE => unreachable!("task completed twice"),
        continuation => Step::Transfer(RawHandle::from_usize(continuation)),
    }
}

unsafe fn drop_frame<F: Future>(ptr: NonNull<Header>) {
    let frame = ptr.cast::<Frame<F>>().as_ptr();
    match (*frame).stage.get() {
        Stage::Running => ManuallyDrop::drop(&mut *(*frame).future.get()),
        Stage::Done => (*(*frame).result.get()).assume_init_drop(),
        Stage::Taken => {}
    }
    let allocator = (*frame).header.allocator;
    allocator.deallocate(frame as *mut u8, std::mem::size_of::<Frame<F>>());
}

unsafe fn take_result<F: Future>(ptr: NonNull<Header>, out: *mut ()) {
    let frame = ptr.cast::<Frame<F>>().as_ptr();
    debug_assert_eq!((*frame).stage.get(), Stage::Done);
    let result = (*(*frame).result.get()).assume_init_read();
    (*frame).stage.set(Stage::Taken);
    (out as *mut PromiseResult<F::Output>).write(result);
}

/// Allocate a frame and run it until its first suspension (or completion).
pub(crate) fn spawn_raw<F>(future: F) -> RawHandle
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let allocator = PromiseContext::try_current()
        .map(|context| context.allocator())
        .unwrap_or_else(TaskAllocator::system);
    let handle = allocate_frame(future, allocator, STATE_EMPTY);
    unsafe { resume(handle) };
    handle
}

fn allocate_frame<F>(future: F, allocator: TaskAllocator, state: usize) -> RawHandle
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    assert!(
        std::mem::align_of::<Frame<F>>() <= MAX_ALIGN,
        "task frame alignment exceeds the allocator contract"
    );
    unsafe {
        let ptr = allocator.allocate(std::mem::size_of::<Frame<F>>()) as *mut Frame<F>;
        ptr.write(Frame {
            header: Header {
                vtable: &Frame::<F>::VTABLE,
                state: AtomicUsize::new(state),
                pending: Cell::new(None),
                allocator,
            },
            stage: Cell::new(Stage::Running),
            future: UnsafeCell::new(ManuallyDrop::new(future)),
            result: UnsafeCell::new(MaybeUninit::uninit()),
        });
        RawHandle(NonNull::new_unchecked(ptr as *mut Header))
    }
}

/// Test-only: allocate a frame without the eager first poll, already marked
/// to destroy itself at completion. Mirrors handing a cold handle straight
/// to a scheduler.
#[cfg(test)]
pub(crate) fn spawn_detached_suspended<F>(future: F) -> RawHandle
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    allocate_frame(future, TaskAllocator::system(), STATE_FORGOTTEN)
}

/// Resume a suspended frame: poll it, honor its suspension request, and
/// keep transferring into continuations of completed frames iteratively so
/// chains never grow the stack.
pub(crate) unsafe fn resume(handle: RawHandle) {
    let mut current = handle;
    loop {
        let header = current.header();
        if header.state.load(Ordering::Acquire) == STATE_DETACHED {
            current.destroy();
            return;
        }
        match (header.vtable.poll)(current.0) {
            Step::Yielded => match header.pending.take() {
                None => return,
                Some(Suspend::Reschedule(target)) => {
                    dispatch_reschedule(current, target);
                    return;
                }
                Some(Suspend::AwaitTask(sub)) => {
                    match sub.header().state.compare_exchange(
                        STATE_EMPTY,
                        current.as_usize(),
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        // The sub-task resumes us when it completes.
                        Ok(_) => return,
                        // It completed while we were suspending; take the
                        // ready path by polling again.
                        Err(STATE_DONE) => continue,
                        Err(_) => unreachable!("awaited task has another owner"),
                    }
                }
            },
            Step::Transfer(next) => current = next,
            Step::Done => return,
        }
    }
}

/// Enqueue a frame that just suspended. Runs only after the poll returned,
/// so a cross-thread target can resume the frame immediately.
unsafe fn dispatch_reschedule(handle: RawHandle, target: Reschedule) {
    let context = PromiseContext::current();
    match target {
        Reschedule::Activated => {
            let manager = context.manager();
            let id = manager.activated_id();
            manager.schedule(id, handle);
        }
        Reschedule::Scheduler(id) => {
            context.manager().schedule(id, handle);
            if let Some(pool) = context.thread_pool() {
                pool.notify_owner(id);
            }
        }
        Reschedule::ThreadPool => {
            context
                .thread_pool()
                .expect("no thread pool was configured")
                .schedule(handle);
        }
    }
}
