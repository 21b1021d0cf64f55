//! Runtime lifecycle: initialization, shutdown, and the scheduler surface
//! used by host main loops.

use std::sync::Arc;
use std::thread::{self, ThreadId};

use parking_lot::Mutex;

use crate::alloc::PoolAllocator;
use crate::config::TaskSystemConfig;
use crate::runtime::context::PromiseContext;
use crate::runtime::manager::{SchedulerActivation, SchedulerId, SchedulerManager};
use crate::runtime::thread_pool::ThreadPool;

struct TaskSystem {
    main_thread: ThreadId,
    main_ids: Vec<SchedulerId>,
    // Field order is teardown order: pool joins its workers before the
    // manager destroys the schedulers, and the allocator outlives every
    // frame destroyed along the way.
    thread_pool: Option<Arc<ThreadPool>>,
    manager: Arc<SchedulerManager>,
    default_allocator: Option<Box<PoolAllocator>>,
}

static SYSTEM: Mutex<Option<TaskSystem>> = Mutex::new(None);

/// Bring the runtime up on the calling thread, which becomes the main
/// thread. Must be called exactly once before any other runtime API;
/// calling it twice panics.
pub fn initialize(config: TaskSystemConfig) {
    let mut system = SYSTEM.lock();
    assert!(system.is_none(), "TaskKit is already initialized");

    let main_thread = thread::current().id();
    let manager = Arc::new(SchedulerManager::new());

    let main_ids: Vec<SchedulerId> = (0..config.main_thread_scheduler_count)
        .map(|_| manager.create_scheduler(main_thread, config.reserved_task_count))
        .collect();

    let (default_allocator, allocator) = match config.allocator {
        Some(allocator) => (None, allocator),
        None => {
            let pool = Box::new(PoolAllocator::new());
            let allocator = pool.create_task_allocator();
            (Some(pool), allocator)
        }
    };

    let thread_pool = config
        .thread_pool_size
        .filter(|&worker_count| worker_count > 0)
        .map(|worker_count| {
            Arc::new(ThreadPool::new(
                manager.clone(),
                worker_count,
                config.reserved_task_count,
            ))
        });

    PromiseContext::install(Box::new(PromiseContext::new(
        allocator,
        manager.clone(),
        thread_pool.clone(),
    )));

    log::debug!(
        "runtime initialized: {} main scheduler(s), pool: {:?}",
        main_ids.len(),
        thread_pool.as_ref().map(|pool| pool.worker_count())
    );

    *system = Some(TaskSystem {
        main_thread,
        main_ids,
        thread_pool,
        manager,
        default_allocator,
    });
}

/// Tear the runtime down. Must run on the main thread, after the host has
/// drained the work it cares about: frames still queued anywhere are
/// destroyed, and frames waiting on one of those are leaked.
pub fn shutdown() {
    let mut system = SYSTEM.lock();
    let state = system.take().expect("TaskKit is not initialized");
    assert_eq!(
        thread::current().id(),
        state.main_thread,
        "shutdown must run on the main thread"
    );

    if let Some(pool) = state.thread_pool.as_deref() {
        pool.shutdown();
    }
    // No new frames after this point; in-flight context references are the
    // caller's responsibility, as documented on PromiseContext.
    drop(PromiseContext::clear());
    drop(state);
    log::debug!("runtime shut down");
}

/// Whether [`initialize`] has run (and [`shutdown`] has not).
pub fn is_initialized() -> bool {
    SYSTEM.lock().is_some()
}

/// Ids of the schedulers created on the main thread at initialization.
pub fn main_thread_scheduler_ids() -> Vec<SchedulerId> {
    SYSTEM
        .lock()
        .as_ref()
        .expect("TaskKit is not initialized")
        .main_ids
        .clone()
}

/// Scoped activation: while the returned guard lives, `id` is the scheduler
/// that tasks running on this thread re-enqueue themselves on. Must be
/// called on the thread owning `id`.
pub fn activate_scheduler(id: SchedulerId) -> SchedulerActivation {
    PromiseContext::current().manager_arc().activate_scoped(id)
}

/// One drain tick of the activated scheduler: resumes exactly the frames
/// that were ready when the tick began.
pub fn update_activated_scheduler() {
    PromiseContext::current().manager().update_activated();
}

/// Queued frame count for `id`. An observation, not a synchronization
/// point.
pub fn pending_task_count(id: SchedulerId) -> usize {
    PromiseContext::current().manager().pending_count(id)
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixture for tests that need the global runtime: runs each
    //! body under a process-wide lock with a fresh runtime and one
    //! activated main scheduler.

    use super::*;
    use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

    static SERIAL: Mutex<()> = Mutex::new(());

    pub(crate) fn with_runtime<R>(
        config: TaskSystemConfig,
        body: impl FnOnce(SchedulerId) -> R,
    ) -> R {
        let _serial = SERIAL.lock();
        initialize(config);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            let id = main_thread_scheduler_ids()[0];
            let _activation = activate_scheduler(id);
            body(id)
        }));
        shutdown();
        match outcome {
            Ok(value) => value,
            Err(payload) => resume_unwind(payload),
        }
    }

    pub(crate) fn run_scheduler(frames: usize) {
        for _ in 0..frames {
            update_activated_scheduler();
        }
    }
}
