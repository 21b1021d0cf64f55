//! Frame allocation: the type-erased allocator handle and the pooled
//! allocator installed by default.

mod pool;
mod task_allocator;

pub use pool::{PoolAllocator, POOL_SIZES};
pub use task_allocator::TaskAllocator;
pub(crate) use task_allocator::MAX_ALIGN;
