//! Moving tasks between schedulers and the thread pool.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::runtime::context::{self, PromiseContext};
use crate::runtime::frame::{Reschedule, Suspend};
use crate::runtime::manager::SchedulerId;
use crate::runtime::task::Task;

/// Suspend the current task and resume it on a thread-pool worker, picked
/// round-robin. Panics if the runtime has no thread pool.
pub fn switch_to_thread_pool() -> SwitchToThreadPool {
    SwitchToThreadPool { switched: false }
}

/// Future returned by [`switch_to_thread_pool`].
pub struct SwitchToThreadPool {
    switched: bool,
}

impl Future for SwitchToThreadPool {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.switched {
            return Poll::Ready(());
        }
        self.switched = true;
        assert!(
            PromiseContext::current().thread_pool().is_some(),
            "no thread pool was configured"
        );
        let current =
            context::current_frame().expect("switch_to_thread_pool outside a running task");
        unsafe { current.set_pending(Suspend::Reschedule(Reschedule::ThreadPool)) };
        Poll::Pending
    }
}

/// Suspend the current task and resume it on the scheduler named by `id`,
/// typically to come back from the pool. The caller must ensure the target
/// scheduler is still alive and being updated.
pub fn switch_to_scheduler(id: SchedulerId) -> SwitchToScheduler {
    SwitchToScheduler { id, switched: false }
}

/// Future returned by [`switch_to_scheduler`].
pub struct SwitchToScheduler {
    id: SchedulerId,
    switched: bool,
}

impl Future for SwitchToScheduler {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        if self.switched {
            return Poll::Ready(());
        }
        self.switched = true;
        let current =
            context::current_frame().expect("switch_to_scheduler outside a running task");
        unsafe { current.set_pending(Suspend::Reschedule(Reschedule::Scheduler(self.id))) };
        Poll::Pending
    }
}

/// Run `work` on the thread pool and come back: the task hops to a worker,
/// invokes the closure, then returns to the scheduler that was activated
/// when the call was made.
pub fn run_on_thread_pool<F, R>(work: F) -> Task<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    Task::spawn(async move {
        let origin = PromiseContext::current().manager().activated_id();
        switch_to_thread_pool().await;
        let result = work();
        switch_to_scheduler(origin).await;
        result
    })
}

/// Like [`run_on_thread_pool`], for work that is itself a task: the inner
/// task is created and awaited on the worker before switching back.
pub fn run_task_on_thread_pool<F, R>(work: F) -> Task<R>
where
    F: FnOnce() -> Task<R> + Send + 'static,
    R: Send + 'static,
{
    Task::spawn(async move {
        let origin = PromiseContext::current().manager().activated_id();
        switch_to_thread_pool().await;
        let result = work().await;
        switch_to_scheduler(origin).await;
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::system::testing::with_runtime;
    use crate::runtime::system::{activate_scheduler, main_thread_scheduler_ids,
        update_activated_scheduler};
    use crate::wait::yield_now;
    use crate::TaskSystemConfig;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::thread::{self, ThreadId};
    use std::time::{Duration, Instant};

    fn drive_until_ready<T: Send + 'static>(task: &Task<T>) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !task.is_ready() {
            assert!(Instant::now() < deadline, "task did not complete in time");
            update_activated_scheduler();
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_round_trip_runs_closure_off_thread_and_resumes_on_main() {
        let config = TaskSystemConfig::new().with_thread_pool_size(2);
        with_runtime(config, |_| {
            let observed: Arc<Mutex<Option<(ThreadId, ThreadId)>>> = Arc::new(Mutex::new(None));
            let out = observed.clone();

            let task = Task::spawn(async move {
                let worker = run_on_thread_pool(|| thread::current().id()).await;
                *out.lock() = Some((worker, thread::current().id()));
            });
            drive_until_ready(&task);

            let (worker, resumed_on) = observed.lock().take().unwrap();
            assert_ne!(worker, thread::current().id());
            assert_eq!(resumed_on, thread::current().id());
        });
    }

    #[test]
    fn test_task_returning_work_is_awaited_on_the_worker() {
        let config = TaskSystemConfig::new().with_thread_pool_size(2);
        with_runtime(config, |_| {
            let observed: Arc<Mutex<Option<ThreadId>>> = Arc::new(Mutex::new(None));
            let out = observed.clone();

            let task = Task::spawn(async move {
                let worker = run_task_on_thread_pool(|| {
                    Task::spawn(async {
                        // Parks on the worker's own scheduler for one tick.
                        yield_now().await;
                        thread::current().id()
                    })
                })
                .await;
                *out.lock() = Some(worker);
            });
            drive_until_ready(&task);

            let worker = observed.lock().take().unwrap();
            assert_ne!(worker, thread::current().id());
        });
    }

    #[test]
    fn test_switch_to_selected_scheduler_waits_for_its_update() {
        let config = TaskSystemConfig::new().with_main_thread_scheduler_count(2);
        with_runtime(config, |_| {
            let ids = main_thread_scheduler_ids();
            let second = ids[1];

            let task = Task::spawn(async move {
                switch_to_scheduler(second).await;
            });
            assert!(!task.is_ready());

            // Updating the first scheduler does nothing for it.
            update_activated_scheduler();
            assert!(!task.is_ready());

            let _activation = activate_scheduler(second);
            update_activated_scheduler();
            assert!(task.is_ready());
        });
    }
}
