//! Cooperative cancellation tokens.
//!
//! Cancellation is observed only at yield points: a wait combinator that was
//! handed a token checks it before every yield and fails with
//! [`Error::Stopped`](crate::Error::Stopped) once a request is seen. Nothing
//! is ever preempted.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cloneable cancellation flag shared between a requester and any number
/// of cooperative waits.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    requested: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token with no pending request.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent; never blocks.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Whether cancellation has been requested.
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}
