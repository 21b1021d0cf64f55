//! Shared fixture: each test runs against a fresh runtime, serialized on a
//! process-wide lock, with the first main scheduler activated.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use taskkit::{SchedulerId, TaskSystemConfig};

static SERIAL: Mutex<()> = Mutex::new(());

pub fn with_runtime<R>(config: TaskSystemConfig, body: impl FnOnce(SchedulerId) -> R) -> R {
    let _serial = SERIAL.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    taskkit::initialize(config);
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let id = taskkit::main_thread_scheduler_ids()[0];
        let _activation = taskkit::activate_scheduler(id);
        body(id)
    }));
    taskkit::shutdown();
    match outcome {
        Ok(value) => value,
        Err(payload) => resume_unwind(payload),
    }
}

/// Drive the activated scheduler for a fixed number of frames.
#[allow(dead_code)]
pub fn run_scheduler(frames: usize) {
    for _ in 0..frames {
        taskkit::update_activated_scheduler();
    }
}

/// Drive the activated scheduler until `done` holds, updating and sleeping
/// between checks. Panics after five seconds.
#[allow(dead_code)]
pub fn run_scheduler_until(done: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        taskkit::update_activated_scheduler();
        std::thread::sleep(Duration::from_millis(1));
    }
}
