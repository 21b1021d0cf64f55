//! Process-global runtime context and the per-thread "current frame" slot.

use std::cell::Cell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use crate::alloc::TaskAllocator;
use crate::runtime::frame::RawHandle;
use crate::runtime::manager::SchedulerManager;
use crate::runtime::thread_pool::ThreadPool;

/// Pointers-only view of the initialized runtime, reachable from any running
/// task through a process-global slot.
///
/// The slot is installed by [`initialize`](crate::initialize) and cleared by
/// [`shutdown`](crate::shutdown); references obtained from it are valid only
/// inside that window.
pub(crate) struct PromiseContext {
    allocator: TaskAllocator,
    manager: Arc<SchedulerManager>,
    thread_pool: Option<Arc<ThreadPool>>,
}

static CURRENT_CONTEXT: AtomicPtr<PromiseContext> = AtomicPtr::new(ptr::null_mut());

impl PromiseContext {
    pub(crate) fn new(
        allocator: TaskAllocator,
        manager: Arc<SchedulerManager>,
        thread_pool: Option<Arc<ThreadPool>>,
    ) -> Self {
        Self {
            allocator,
            manager,
            thread_pool,
        }
    }

    /// Publish `context` as the process-wide current context.
    pub(crate) fn install(context: Box<PromiseContext>) {
        let previous = CURRENT_CONTEXT.swap(Box::into_raw(context), Ordering::AcqRel);
        assert!(
            previous.is_null(),
            "a promise context is already installed"
        );
    }

    /// Clear the slot, returning the installed context for teardown.
    pub(crate) fn clear() -> Option<Box<PromiseContext>> {
        let previous = CURRENT_CONTEXT.swap(ptr::null_mut(), Ordering::AcqRel);
        if previous.is_null() {
            None
        } else {
            Some(unsafe { Box::from_raw(previous) })
        }
    }

    /// The current context, if the runtime is initialized.
    pub(crate) fn try_current() -> Option<&'static PromiseContext> {
        unsafe { CURRENT_CONTEXT.load(Ordering::Acquire).as_ref() }
    }

    /// The current context; panics when the runtime is not initialized.
    pub(crate) fn current() -> &'static PromiseContext {
        Self::try_current().expect("TaskKit is not initialized; call taskkit::initialize first")
    }

    pub(crate) fn allocator(&self) -> TaskAllocator {
        self.allocator
    }

    pub(crate) fn manager(&self) -> &SchedulerManager {
        &self.manager
    }

    pub(crate) fn manager_arc(&self) -> Arc<SchedulerManager> {
        self.manager.clone()
    }

    pub(crate) fn thread_pool(&self) -> Option<&ThreadPool> {
        self.thread_pool.as_deref()
    }
}

thread_local! {
    static CURRENT_FRAME: Cell<Option<RawHandle>> = const { Cell::new(None) };
}

/// Set the frame being polled on this thread, returning the previous value
/// so nested spawns restore it.
pub(crate) fn swap_current_frame(frame: Option<RawHandle>) -> Option<RawHandle> {
    CURRENT_FRAME.with(|slot| slot.replace(frame))
}

/// The frame currently being polled on this thread, if any.
pub(crate) fn current_frame() -> Option<RawHandle> {
    CURRENT_FRAME.with(Cell::get)
}
