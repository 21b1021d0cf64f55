//! Runtime configuration.

use crate::alloc::TaskAllocator;

/// Configuration handed to [`initialize`](crate::initialize).
///
/// ```no_run
/// use taskkit::TaskSystemConfig;
///
/// taskkit::initialize(
///     TaskSystemConfig::new()
///         .with_thread_pool_size(4)
///         .with_reserved_task_count(256),
/// );
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TaskSystemConfig {
    pub(crate) allocator: Option<TaskAllocator>,
    pub(crate) main_thread_scheduler_count: usize,
    pub(crate) thread_pool_size: Option<usize>,
    pub(crate) reserved_task_count: usize,
}

impl Default for TaskSystemConfig {
    fn default() -> Self {
        Self {
            allocator: None,
            main_thread_scheduler_count: 1,
            thread_pool_size: None,
            reserved_task_count: 100,
        }
    }
}

impl TaskSystemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom frame allocator instead of the built-in pool. The
    /// allocator must be usable from any thread and outlive the runtime.
    pub fn with_allocator(mut self, allocator: TaskAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }

    /// How many schedulers to pre-create on the main thread. Default 1.
    pub fn with_main_thread_scheduler_count(mut self, count: usize) -> Self {
        self.main_thread_scheduler_count = count;
        self
    }

    /// Create a worker thread pool with that many workers. A pool is only
    /// created for counts greater than zero; `0` leaves the pool disabled.
    pub fn with_thread_pool_size(mut self, worker_count: usize) -> Self {
        self.thread_pool_size = Some(worker_count);
        self
    }

    /// Capacity hint for scheduler queues. Default 100.
    pub fn with_reserved_task_count(mut self, count: usize) -> Self {
        self.reserved_task_count = count;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TaskSystemConfig::default();
        assert!(config.allocator.is_none());
        assert_eq!(config.main_thread_scheduler_count, 1);
        assert!(config.thread_pool_size.is_none());
        assert_eq!(config.reserved_task_count, 100);
    }

    #[test]
    fn test_builder_methods() {
        let config = TaskSystemConfig::new()
            .with_main_thread_scheduler_count(3)
            .with_thread_pool_size(8)
            .with_reserved_task_count(512);
        assert_eq!(config.main_thread_scheduler_count, 3);
        assert_eq!(config.thread_pool_size, Some(8));
        assert_eq!(config.reserved_task_count, 512);
    }
}
