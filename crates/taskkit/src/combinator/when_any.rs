//! Wait for the first task in a group to complete.
//!
//! Each input gets a forgotten helper task that awaits it and records a
//! first-writer-wins outcome in a shared cell; the orchestrator yields until
//! the cell fills. Losers are not cancelled: they keep running and their
//! eventual values are discarded. A winner that failed re-raises its panic
//! in the orchestrator.

use std::any::Any;
use std::panic::resume_unwind;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::runtime::task::Task;
use crate::wait::yield_now;

/// Winner of a two-way [`when_any2`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Any2<A, B> {
    First(A),
    Second(B),
}

impl<A, B> Any2<A, B> {
    /// Position of the winning task among the inputs.
    pub fn index(&self) -> usize {
        match self {
            Any2::First(_) => 0,
            Any2::Second(_) => 1,
        }
    }
}

/// Winner of a three-way [`when_any3`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Any3<A, B, C> {
    First(A),
    Second(B),
    Third(C),
}

impl<A, B, C> Any3<A, B, C> {
    /// Position of the winning task among the inputs.
    pub fn index(&self) -> usize {
        match self {
            Any3::First(_) => 0,
            Any3::Second(_) => 1,
            Any3::Third(_) => 2,
        }
    }
}

/// Winner of a four-way [`when_any4`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Any4<A, B, C, D> {
    First(A),
    Second(B),
    Third(C),
    Fourth(D),
}

impl<A, B, C, D> Any4<A, B, C, D> {
    /// Position of the winning task among the inputs.
    pub fn index(&self) -> usize {
        match self {
            Any4::First(_) => 0,
            Any4::Second(_) => 1,
            Any4::Third(_) => 2,
            Any4::Fourth(_) => 3,
        }
    }
}

type Winner<W> = Arc<Mutex<Option<Result<W, Box<dyn Any + Send>>>>>;

/// Spawn a forgotten helper that awaits `task` and records the outcome if
/// no winner has been recorded yet.
fn watch<T, W, F>(task: Task<T>, winner: Winner<W>, wrap: F)
where
    T: Send + 'static,
    W: Send + 'static,
    F: FnOnce(T) -> W + Send + 'static,
{
    Task::spawn(async move {
        let outcome = task.catch().await;
        let mut slot = winner.lock();
        if slot.is_none() {
            *slot = Some(match outcome {
                Ok(value) => Ok(wrap(value)),
                Err(payload) => Err(payload),
            });
        }
    })
    .forget();
}

async fn wait_for_winner<W: Send + 'static>(winner: Winner<W>) -> W {
    loop {
        if let Some(outcome) = winner.lock().take() {
            return match outcome {
                Ok(value) => value,
                Err(payload) => resume_unwind(payload),
            };
        }
        yield_now().await;
    }
}

/// First of a homogeneous group: resolves to the winner's index and value.
pub fn when_any<T>(tasks: Vec<Task<T>>) -> Task<(usize, T)>
where
    T: Send + 'static,
{
    assert!(!tasks.is_empty(), "when_any requires at least one task");
    Task::spawn(async move {
        let winner: Winner<(usize, T)> = Arc::new(Mutex::new(None));
        for (index, task) in tasks.into_iter().enumerate() {
            watch(task, winner.clone(), move |value| (index, value));
        }
        wait_for_winner(winner).await
    })
}

/// First of two tasks.
pub fn when_any2<A, B>(a: Task<A>, b: Task<B>) -> Task<Any2<A, B>>
where
    A: Send + 'static,
    B: Send + 'static,
{
    Task::spawn(async move {
        let winner: Winner<Any2<A, B>> = Arc::new(Mutex::new(None));
        watch(a, winner.clone(), Any2::First);
        watch(b, winner.clone(), Any2::Second);
        wait_for_winner(winner).await
    })
}

/// First of three tasks.
pub fn when_any3<A, B, C>(a: Task<A>, b: Task<B>, c: Task<C>) -> Task<Any3<A, B, C>>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
{
    Task::spawn(async move {
        let winner: Winner<Any3<A, B, C>> = Arc::new(Mutex::new(None));
        watch(a, winner.clone(), Any3::First);
        watch(b, winner.clone(), Any3::Second);
        watch(c, winner.clone(), Any3::Third);
        wait_for_winner(winner).await
    })
}

/// First of four tasks.
pub fn when_any4<A, B, C, D>(
    a: Task<A>,
    b: Task<B>,
    c: Task<C>,
    d: Task<D>,
) -> Task<Any4<A, B, C, D>>
where
    A: Send + 'static,
    B: Send + 'static,
    C: Send + 'static,
    D: Send + 'static,
{
    Task::spawn(async move {
        let winner: Winner<Any4<A, B, C, D>> = Arc::new(Mutex::new(None));
        watch(a, winner.clone(), Any4::First);
        watch(b, winner.clone(), Any4::Second);
        watch(c, winner.clone(), Any4::Third);
        watch(d, winner.clone(), Any4::Fourth);
        wait_for_winner(winner).await
    })
}
