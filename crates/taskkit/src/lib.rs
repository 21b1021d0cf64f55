//! TaskKit: a cooperative coroutine runtime for hosts that own the main
//! loop.
//!
//! # Overview
//!
//! TaskKit is built for programs like games and simulations where the
//! application drives execution frame by frame. There is no background
//! executor and no hidden reactor: tasks advance only when the host updates
//! a scheduler, and everything in between is explicit.
//!
//! - **Tasks** run eagerly on creation, up to their first suspension, and
//!   either deliver a value to an awaiter or are [forgotten](Task::forget)
//!   to run fire-and-forget.
//! - **Schedulers** are plain queues owned by one thread each; the host
//!   calls [`update_activated_scheduler`] once per frame to resume whatever
//!   became ready.
//! - **The thread pool** lets a task hop off the cooperative loop with
//!   [`switch_to_thread_pool`] or [`run_on_thread_pool`], do blocking work
//!   on a worker, and come back.
//! - **The pool allocator** recycles the short-lived, fixed-size frames
//!   produced by tasks through per-thread slab pools with lock-free
//!   cross-thread frees.
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! taskkit::initialize(taskkit::TaskSystemConfig::default());
//!
//! let ids = taskkit::main_thread_scheduler_ids();
//! {
//!     let _activation = taskkit::activate_scheduler(ids[0]);
//!
//!     taskkit::Task::spawn(async {
//!         taskkit::delay_frames(5, None).await.unwrap();
//!         println!("five frames later");
//!     })
//!     .forget();
//!
//!     while taskkit::pending_task_count(ids[0]) > 0 {
//!         taskkit::update_activated_scheduler();
//!         std::thread::sleep(Duration::from_millis(16));
//!     }
//! }
//!
//! taskkit::shutdown();
//! ```

pub mod alloc;
pub mod cancel;
pub mod combinator;
pub mod config;
pub mod error;
mod runtime;
pub mod switch;
pub mod wait;

pub use alloc::{PoolAllocator, TaskAllocator, POOL_SIZES};
pub use cancel::CancelToken;
pub use combinator::{
    when_all, when_all2, when_all3, when_all4, when_all5, when_any, when_any2, when_any3,
    when_any4, Any2, Any3, Any4,
};
pub use config::TaskSystemConfig;
pub use error::{Error, Result};
pub use runtime::manager::{SchedulerActivation, SchedulerId};
pub use runtime::system::{
    activate_scheduler, initialize, is_initialized, main_thread_scheduler_ids,
    pending_task_count, shutdown, update_activated_scheduler,
};
pub use runtime::task::Task;
pub use switch::{
    run_on_thread_pool, run_task_on_thread_pool, switch_to_scheduler, switch_to_thread_pool,
};
pub use wait::{completed_task, delay_frames, wait_for, wait_until, yield_now};
