//! Error types surfaced to task code.

use thiserror::Error;

/// Recoverable errors produced by the runtime's wait combinators.
///
/// Contract violations (activating a scheduler from the wrong thread,
/// using the runtime before initialization, and so on) are not represented
/// here; they panic.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A cooperative wait observed a cancellation request at a yield point.
    #[error("operation stopped by cancellation")]
    Stopped,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;
