//! Wait for every task in a group.
//!
//! Members are awaited in order. A member that failed aborts the wait and
//! re-raises its panic; members not yet awaited are forgotten at that point
//! so they still run to completion on their own schedule.

use std::panic::resume_unwind;

use crate::runtime::task::Task;

/// Await every task in `tasks`, collecting the results in order. An empty
/// vector completes synchronously.
pub fn when_all<T>(tasks: Vec<Task<T>>) -> Task<Vec<T>>
where
    T: Send + 'static,
{
    Task::spawn(async move {
        let mut tasks = tasks.into_iter();
        let mut results = Vec::with_capacity(tasks.len());
        while let Some(task) = tasks.next() {
            match task.catch().await {
                Ok(value) => results.push(value),
                Err(payload) => {
                    for remaining in tasks {
                        remaining.forget();
                    }
                    resume_unwind(payload);
                }
            }
        }
        results
    })
}

/// Await both tasks and return both results.
pub fn when_all2<A, B>(a: Task<A>, b: Task<B>) -> Task<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    Task::spawn(async move {
        let ra = match a.catch().await {
            Ok(value) => value,
            Err(payload) => {
                b.forget();
                resume_unwind(payload)
            }
        };
        let rb = b.await;
        (ra, rb)
    })
}

/// Await three tasks and return all three results.
pub fn when_all3<A, B, C>(a: Task<A>, b: Task<B>, c: Task<C>) -> Task<(A, B, C)>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    Task::spawn(async move {
        let ra = match a.catch().await {
            Ok(value) => value,
            Err(payload) => {
                b.forget();
                c.forget();
                resume_unwind(payload)
            }
        };
        let rb = match b.catch().await {
            Ok(value) => value,
            Err(payload) => {
                c.forget();
                resume_unwind(payload)
            }
        };
        let rc = c.await;
        (ra, rb, rc)
    })
}

/// Await four tasks and return all four results.
pub fn when_all4<A, B, C, D>(
    a: Task<A>,
    b: Task<B>,
    c: Task<C>,
    d: Task<D>,
) -> Task<(A, B, C, D)>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    D: Send + 'static,
{
    Task::spawn(async move {
        let ra = match a.catch().await {
            Ok(value) => value,
            Err(payload) => {
                b.forget();
                c.forget();
                d.forget();
                resume_unwind(payload)
            }
        };
        let rb = match b.catch().await {
            Ok(value) => value,
            Err(payload) => {
                c.forget();
                d.forget();
                resume_unwind(payload)
            }
        };
        let rc = match c.catch().await {
            Ok(value) => value,
            Err(payload) => {
                d.forget();
                resume_unwind(payload)
            }
        };
        let rd = d.await;
        (ra, rb, rc, rd)
    })
}

/// Await five tasks and return all five results.
pub fn when_all5<A, B, C, D, E>(
    a: Task<A>,
    b: Task<B>,
    c: Task<C>,
    d: Task<D>,
    e: Task<E>,
) -> Task<(A, B, C, D, E)>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    D: Send + 'static,
    E: Send + 'static,
{
    Task::spawn(async move {
        let head = when_all4(a, b, c, d);
        let (ra, rb, rc, rd) = match head.catch().await {
            Ok(values) => values,
            Err(payload) => {
                e.forget();
                resume_unwind(payload)
            }
        };
        let re = e.await;
        (ra, rb, rc, rd, re)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::system::testing::{run_scheduler, with_runtime};
    use crate::wait::yield_now;
    use crate::TaskSystemConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_empty_vector_completes_synchronously() {
        with_runtime(TaskSystemConfig::default(), |_| {
            let task = when_all(Vec::<Task<()>>::new());
            assert!(task.is_ready());
        });
    }

    #[test]
    fn test_all_synchronous_members_complete_inline() {
        with_runtime(TaskSystemConfig::default(), |_| {
            let task = when_all3(
                Task::spawn(async { 1u32 }),
                Task::spawn(async { 2u32 }),
                Task::spawn(async { 3u32 }),
            );
            assert!(task.is_ready());
        });
    }

    #[test]
    fn test_waits_for_slowest_member() {
        with_runtime(TaskSystemConfig::default(), |_| {
            let slow = Task::spawn(async {
                yield_now().await;
                yield_now().await;
            });
            let fast = Task::spawn(async {});
            let task = when_all2(slow, fast);
            assert!(!task.is_ready());
            run_scheduler(1);
            assert!(!task.is_ready());
            run_scheduler(1);
            assert!(task.is_ready());
        });
    }

    #[test]
    fn test_failed_member_forgets_the_rest() {
        with_runtime(TaskSystemConfig::default(), |_| {
            let survivor_ran = Arc::new(AtomicUsize::new(0));
            let observed = survivor_ran.clone();

            let failing: Task<()> = Task::spawn(async {
                yield_now().await;
                panic!("member failed");
            });
            let survivor = Task::spawn(async move {
                yield_now().await;
                yield_now().await;
                observed.fetch_add(1, Ordering::SeqCst);
            });

            let group = when_all2(failing, survivor);
            group.forget();

            run_scheduler(1);
            run_scheduler(1);
            // The forgotten survivor still ran to completion after the
            // group aborted.
            assert_eq!(survivor_ran.load(Ordering::SeqCst), 1);
        });
    }
}
