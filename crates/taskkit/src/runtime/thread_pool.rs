//! Worker thread pool: each worker drives one scheduler of its own.
//!
//! Dispatch just enqueues onto a worker's scheduler (always through the
//! remote path, since callers are never the worker) and taps the worker's
//! condition variable. Workers sleep whenever their scheduler is empty.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};

use crate::runtime::frame::RawHandle;
use crate::runtime::manager::{SchedulerId, SchedulerManager};

struct WorkerContext {
    /// The worker's scheduler id, published by the constructing thread
    /// once the scheduler exists. The same mutex/condvar pair later carries
    /// wake-up taps.
    state: Mutex<Option<SchedulerId>>,
    cv: Condvar,
}

pub(crate) struct ThreadPool {
    manager: Arc<SchedulerManager>,
    contexts: Vec<Arc<WorkerContext>>,
    scheduler_ids: Vec<SchedulerId>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    next_worker: AtomicUsize,
}

impl ThreadPool {
    /// Spawn `worker_count` workers. Each worker's scheduler is created
    /// here, on the constructing thread, keyed by the worker's real thread
    /// id; the worker blocks until its id is published.
    pub(crate) fn new(
        manager: Arc<SchedulerManager>,
        worker_count: usize,
        reserved: usize,
    ) -> Self {
        assert!(worker_count > 0, "thread pool needs at least one worker");

        let running = Arc::new(AtomicBool::new(true));
        let mut contexts = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for index in 0..worker_count {
            let context = Arc::new(WorkerContext {
                state: Mutex::new(None),
                cv: Condvar::new(),
            });
            let worker = {
                let context = context.clone();
                let manager = manager.clone();
                let running = running.clone();
                thread::Builder::new()
                    .name(format!("taskkit-worker-{index}"))
                    .spawn(move || Self::worker_main(context, manager, running))
                    .expect("failed to spawn worker thread")
            };
            contexts.push(context);
            workers.push(worker);
        }

        let mut scheduler_ids = Vec::with_capacity(worker_count);
        for (context, worker) in contexts.iter().zip(&workers) {
            let id = manager.create_scheduler(worker.thread().id(), reserved);
            debug_assert!(manager.has_schedulers(worker.thread().id()));
            *context.state.lock() = Some(id);
            context.cv.notify_one();
            scheduler_ids.push(id);
        }

        log::debug!("thread pool started with {worker_count} workers");

        Self {
            manager,
            contexts,
            scheduler_ids,
            workers: Mutex::new(workers),
            running,
            next_worker: AtomicUsize::new(0),
        }
    }

    fn worker_main(
        context: Arc<WorkerContext>,
        manager: Arc<SchedulerManager>,
        running: Arc<AtomicBool>,
    ) {
        let id = {
            let mut state = context.state.lock();
            loop {
                if let Some(id) = *state {
                    break id;
                }
                context.cv.wait(&mut state);
            }
        };

        loop {
            {
                let mut state = context.state.lock();
                while running.load(Ordering::Acquire) && manager.pending_count(id) == 0 {
                    context.cv.wait(&mut state);
                }
                if !running.load(Ordering::Acquire) && manager.pending_count(id) == 0 {
                    break;
                }
            }
            manager.activate(id);
            manager.update_activated();
            manager.deactivate();
        }
    }

    /// Round-robin dispatch.
    pub(crate) fn schedule(&self, handle: RawHandle) {
        let index = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.contexts.len();
        self.schedule_worker(index, handle);
    }

    /// Pin `handle` to a specific worker.
    pub(crate) fn schedule_worker(&self, index: usize, handle: RawHandle) {
        assert!(index < self.contexts.len(), "invalid worker index");
        self.manager.schedule(self.scheduler_ids[index], handle);
        let context = &self.contexts[index];
        let _guard = context.state.lock();
        context.cv.notify_one();
    }

    /// Wake the worker owning `id`, if `id` names a pool scheduler. Used
    /// when a frame was enqueued on a worker scheduler directly.
    pub(crate) fn notify_owner(&self, id: SchedulerId) {
        if let Some(index) = self.scheduler_ids.iter().position(|&known| known == id) {
            let context = &self.contexts[index];
            let _guard = context.state.lock();
            context.cv.notify_one();
        }
    }

    pub(crate) fn worker_count(&self) -> usize {
        self.contexts.len()
    }

    /// The scheduler owned by worker `index`.
    pub(crate) fn scheduler_id(&self, index: usize) -> SchedulerId {
        assert!(index < self.scheduler_ids.len(), "invalid worker index");
        self.scheduler_ids[index]
    }

    /// Stop accepting work and join the workers. Idempotent. Handles still
    /// queued on worker schedulers die with the scheduler manager.
    pub(crate) fn shutdown(&self) {
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        if workers.is_empty() {
            return;
        }

        self.running.store(false, Ordering::Release);
        for context in &self.contexts {
            let _guard = context.state.lock();
            context.cv.notify_one();
        }
        for worker in workers {
            worker.join().expect("worker thread panicked");
        }
        log::debug!("thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::frame;
    use std::time::{Duration, Instant};

    fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    fn pool(worker_count: usize) -> (Arc<SchedulerManager>, ThreadPool) {
        let manager = Arc::new(SchedulerManager::new());
        let pool = ThreadPool::new(manager.clone(), worker_count, 16);
        (manager, pool)
    }

    #[test]
    fn test_construction_reports_worker_count() {
        let (manager, pool) = pool(4);
        assert_eq!(pool.worker_count(), 4);
        for index in 0..4 {
            let id = pool.scheduler_id(index);
            assert!(manager.has_schedulers(id.thread_id()));
            assert_ne!(id.thread_id(), thread::current().id());
        }
    }

    #[test]
    fn test_schedule_runs_task_on_a_worker() {
        let (_manager, pool) = pool(2);
        let counter = Arc::new(AtomicUsize::new(0));
        let handle = {
            let counter = counter.clone();
            frame::spawn_detached_suspended(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        };
        pool.schedule(handle);
        assert!(wait_until(Duration::from_secs(5), || {
            counter.load(Ordering::SeqCst) == 1
        }));
    }

    #[test]
    fn test_round_robin_runs_many_tasks() {
        let (_manager, pool) = pool(4);
        let counter = Arc::new(AtomicUsize::new(0));
        const TASKS: usize = 100;
        for _ in 0..TASKS {
            let counter = counter.clone();
            pool.schedule(frame::spawn_detached_suspended(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        assert!(wait_until(Duration::from_secs(5), || {
            counter.load(Ordering::SeqCst) == TASKS
        }));
    }

    #[test]
    fn test_targeted_dispatch_runs_on_requested_worker() {
        let (_manager, pool) = pool(4);
        let matches = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));
        const PER_WORKER: usize = 10;

        for index in 0..4 {
            let expected = pool.scheduler_id(index).thread_id();
            for _ in 0..PER_WORKER {
                let matches = matches.clone();
                let total = total.clone();
                pool.schedule_worker(
                    index,
                    frame::spawn_detached_suspended(async move {
                        if thread::current().id() == expected {
                            matches.fetch_add(1, Ordering::SeqCst);
                        }
                        total.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }
        }

        assert!(wait_until(Duration::from_secs(5), || {
            total.load(Ordering::SeqCst) == 4 * PER_WORKER
        }));
        assert_eq!(matches.load(Ordering::SeqCst), 4 * PER_WORKER);
    }

    #[test]
    fn test_concurrent_scheduling_from_many_threads() {
        let (_manager, pool) = pool(4);
        let pool = Arc::new(pool);
        let counter = Arc::new(AtomicUsize::new(0));
        const PER_THREAD: usize = 100;

        let mut producers = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let counter = counter.clone();
            producers.push(thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    let counter = counter.clone();
                    pool.schedule(frame::spawn_detached_suspended(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }));
                }
            }));
        }
        for producer in producers {
            producer.join().unwrap();
        }

        assert!(wait_until(Duration::from_secs(5), || {
            counter.load(Ordering::SeqCst) == 4 * PER_THREAD
        }));
    }

    #[test]
    fn test_shutdown_waits_for_scheduled_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let (_manager, pool) = pool(2);
            for _ in 0..10 {
                let counter = counter.clone();
                pool.schedule(frame::spawn_detached_suspended(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }));
            }
            assert!(wait_until(Duration::from_secs(5), || {
                counter.load(Ordering::SeqCst) == 10
            }));
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let (_manager, pool) = pool(2);
        pool.shutdown();
        pool.shutdown();
    }
}
