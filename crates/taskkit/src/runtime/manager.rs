//! Scheduler registry keyed by owning thread, plus per-thread activation
//! stacks.
//!
//! Thread contexts are created at initialization and thread-pool bring-up
//! and treated as read-only afterwards; the map lock is only ever contended
//! while a new scheduler is being registered.

use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::runtime::frame::{self, RawHandle};
use crate::runtime::scheduler::Scheduler;

/// Stable identifier of one scheduler: the owning thread and the
/// scheduler's index on that thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedulerId {
    thread: ThreadId,
    index: usize,
}

impl SchedulerId {
    /// The thread that owns the scheduler.
    pub fn thread_id(&self) -> ThreadId {
        self.thread
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }
}

#[derive(Default)]
struct ThreadContext {
    schedulers: Vec<Scheduler>,
    /// Indices of the schedulers activated on this thread, innermost last.
    activation_stack: Mutex<Vec<usize>>,
}

pub(crate) struct SchedulerManager {
    contexts: RwLock<FxHashMap<ThreadId, ThreadContext>>,
}

impl SchedulerManager {
    pub(crate) fn new() -> Self {
        Self {
            contexts: RwLock::new(FxHashMap::default()),
        }
    }

    /// Register a new scheduler owned by `thread`.
    pub(crate) fn create_scheduler(&self, thread: ThreadId, reserved: usize) -> SchedulerId {
        let mut contexts = self.contexts.write();
        let context = contexts.entry(thread).or_default();
        context.schedulers.push(Scheduler::new(thread, reserved));
        SchedulerId {
            thread,
            index: context.schedulers.len() - 1,
        }
    }

    /// Enqueue `handle` on the scheduler named by `id`. Callable from any
    /// thread; non-owner calls go through the scheduler's remote stack.
    pub(crate) fn schedule(&self, id: SchedulerId, handle: RawHandle) {
        let contexts = self.contexts.read();
        Self::scheduler(&contexts, id).schedule(handle);
    }

    /// Push `id` onto its owner thread's activation stack. Must be called
    /// on that thread.
    pub(crate) fn activate(&self, id: SchedulerId) {
        assert_eq!(
            thread::current().id(),
            id.thread,
            "scheduler activated from a thread that does not own it"
        );
        let contexts = self.contexts.read();
        let context = contexts
            .get(&id.thread)
            .expect("scheduler id from an unregistered thread");
        assert!(
            id.index < context.schedulers.len(),
            "invalid scheduler id"
        );
        context.activation_stack.lock().push(id.index);
    }

    /// Pop the current thread's activation stack.
    pub(crate) fn deactivate(&self) {
        let contexts = self.contexts.read();
        let context = contexts
            .get(&thread::current().id())
            .expect("no schedulers registered for this thread");
        let popped = context.activation_stack.lock().pop();
        assert!(popped.is_some(), "no scheduler is activated on this thread");
    }

    /// The most recently activated scheduler on the calling thread.
    pub(crate) fn activated_id(&self) -> SchedulerId {
        let thread = thread::current().id();
        let contexts = self.contexts.read();
        let context = contexts
            .get(&thread)
            .expect("no schedulers registered for this thread");
        let index = *context
            .activation_stack
            .lock()
            .last()
            .expect("no scheduler is activated on this thread");
        SchedulerId { thread, index }
    }

    /// One drain tick of the activated scheduler. Frames are resumed with
    /// no manager lock held, so they are free to schedule more work.
    pub(crate) fn update_activated(&self) {
        let id = self.activated_id();
        let buffer = {
            let contexts = self.contexts.read();
            Self::scheduler(&contexts, id).begin_update()
        };
        for &handle in &buffer {
            unsafe { frame::resume(handle) };
        }
        let contexts = self.contexts.read();
        Self::scheduler(&contexts, id).end_update(buffer);
    }

    /// Queued frame count for `id`. An observation, not a synchronization
    /// point; exact only on the owner thread.
    pub(crate) fn pending_count(&self, id: SchedulerId) -> usize {
        let contexts = self.contexts.read();
        Self::scheduler(&contexts, id).pending_count()
    }

    /// Whether `thread` has any schedulers registered.
    pub(crate) fn has_schedulers(&self, thread: ThreadId) -> bool {
        let contexts = self.contexts.read();
        contexts
            .get(&thread)
            .is_some_and(|context| !context.schedulers.is_empty())
    }

    /// Activate with a scoped guard that deactivates on drop.
    pub(crate) fn activate_scoped(self: &Arc<Self>, id: SchedulerId) -> SchedulerActivation {
        self.activate(id);
        SchedulerActivation {
            manager: self.clone(),
            _not_send: PhantomData,
        }
    }

    fn scheduler<'a>(
        contexts: &'a FxHashMap<ThreadId, ThreadContext>,
        id: SchedulerId,
    ) -> &'a Scheduler {
        let context = contexts
            .get(&id.thread)
            .expect("scheduler id from an unregistered thread");
        context
            .schedulers
            .get(id.index)
            .expect("invalid scheduler id")
    }
}

/// Scoped scheduler activation. While alive, the scheduler is the target
/// for yields and frame delays of the tasks running on this thread;
/// dropping the guard pops the activation. Move-only and pinned to the
/// activating thread.
pub struct SchedulerActivation {
    manager: Arc<SchedulerManager>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for SchedulerActivation {
    fn drop(&mut self) {
        self.manager.deactivate();
    }
}
