//! Task composition combinators.

mod when_all;
mod when_any;

pub use when_all::{when_all, when_all2, when_all3, when_all4, when_all5};
pub use when_any::{when_any, when_any2, when_any3, when_any4, Any2, Any3, Any4};
