//! Segregated-size pool allocator for task frames.
//!
//! Each (allocator, thread) pair owns a `ThreadLocalPool`: one free list per
//! bucket in the fixed size ladder, backed by slabs of `SLAB_BLOCK_COUNT`
//! blocks. The owner thread allocates and frees without synchronization;
//! other threads return blocks through a lock-free remote list that the
//! owner drains on its next allocation. Every block carries a max-aligned
//! `BlockMeta` prefix naming its owner pool and bucket, so deallocation
//! needs nothing but the pointer.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::cell::{Cell, UnsafeCell};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::task_allocator::{TaskAllocator, MAX_ALIGN};

/// The bucket ladder. Requests are rounded up to the smallest entry that
/// fits; larger requests go straight to the system allocator.
pub const POOL_SIZES: [usize; 9] = [48, 64, 128, 256, 512, 1024, 2048, 4096, 8192];

/// Blocks carved out of one slab allocation.
const SLAB_BLOCK_COUNT: usize = 32;

/// `pool_index` value marking a block that bypassed the ladder.
const OVERSIZE_INDEX: u8 = POOL_SIZES.len() as u8;

/// Prefix written at the start of every raw block. The user pointer sits
/// `ALIGNED_META_SIZE` bytes past it.
#[repr(C, align(16))]
struct BlockMeta {
    owner: *mut ThreadLocalPool,
    /// Full raw allocation size; needed to rebuild the layout when an
    /// oversize block is returned to the system allocator.
    block_size: usize,
    pool_index: u8,
}

const ALIGNED_META_SIZE: usize =
    (std::mem::size_of::<BlockMeta>() + MAX_ALIGN - 1) & !(MAX_ALIGN - 1);

/// Overlay for a block sitting on its owner's local free list.
struct FreeNode {
    next: *mut FreeNode,
}

/// Overlay for a block pushed onto a foreign pool's remote list. Carries the
/// bucket index because the meta prefix has been overwritten.
struct RemoteFreeNode {
    next: *mut RemoteFreeNode,
    pool_index: usize,
}

#[repr(C, align(16))]
struct Slab {
    next: *mut Slab,
    size: usize,
}

const SLAB_HEADER_SIZE: usize = std::mem::size_of::<Slab>();

#[derive(Clone, Copy)]
struct PoolState {
    free_list: *mut FreeNode,
    slabs: *mut Slab,
}

impl PoolState {
    const EMPTY: PoolState = PoolState {
        free_list: ptr::null_mut(),
        slabs: ptr::null_mut(),
    };
}

/// Per-thread allocation state. Boxed so blocks can point back at it.
struct ThreadLocalPool {
    owner: ThreadId,
    /// Bucket states; touched only by `owner`.
    pools: UnsafeCell<[PoolState; POOL_SIZES.len()]>,
    /// Blocks freed by non-owner threads, drained by the owner.
    remote_head: AtomicPtr<RemoteFreeNode>,
}

// Owner-only fields are behind `UnsafeCell` and only ever touched from the
// owning thread; `remote_head` is the one cross-thread entry point.
unsafe impl Send for ThreadLocalPool {}
unsafe impl Sync for ThreadLocalPool {}

impl ThreadLocalPool {
    fn new(owner: ThreadId) -> Self {
        Self {
            owner,
            pools: UnsafeCell::new([PoolState::EMPTY; POOL_SIZES.len()]),
            remote_head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Owner-thread allocation of one raw block for `pool_index`.
    unsafe fn allocate_from_pool(&self, pool_index: usize) -> *mut u8 {
        debug_assert_eq!(thread::current().id(), self.owner);
        let pools = self.pools.get();

        if let Some(block) = self.pop_free(pool_index) {
            return block;
        }

        self.collect_remote_free();
        if let Some(block) = self.pop_free(pool_index) {
            return block;
        }

        let user_size = POOL_SIZES[pool_index];
        let block_size = user_size + ALIGNED_META_SIZE;
        let slab_size = SLAB_HEADER_SIZE + block_size * SLAB_BLOCK_COUNT;
        let layout = Layout::from_size_align(slab_size, MAX_ALIGN).expect("invalid slab layout");
        let slab = alloc(layout) as *mut Slab;
        if slab.is_null() {
            handle_alloc_error(layout);
        }
        log::trace!("pool bucket {user_size}: growing by one slab ({slab_size} bytes)");
        (*slab).next = (*pools)[pool_index].slabs;
        (*slab).size = slab_size;
        (*pools)[pool_index].slabs = slab;

        // Block 0 goes straight to the caller; the rest seed the free list.
        let first = (slab as *mut u8).add(SLAB_HEADER_SIZE);
        for i in 1..SLAB_BLOCK_COUNT {
            let node = first.add(i * block_size) as *mut FreeNode;
            (*node).next = (*pools)[pool_index].free_list;
            (*pools)[pool_index].free_list = node;
        }
        first
    }

    unsafe fn pop_free(&self, pool_index: usize) -> Option<*mut u8> {
        let pools = self.pools.get();
        let node = (*pools)[pool_index].free_list;
        if node.is_null() {
            return None;
        }
        (*pools)[pool_index].free_list = (*node).next;
        Some(node as *mut u8)
    }

    /// Owner-thread push onto the local free list. LIFO, so a tight
    /// allocate/free loop keeps handing back the same hot block.
    unsafe fn push_local_free(&self, raw: *mut u8, pool_index: usize) {
        debug_assert_eq!(thread::current().id(), self.owner);
        let pools = self.pools.get();
        let node = raw as *mut FreeNode;
        (*node).next = (*pools)[pool_index].free_list;
        (*pools)[pool_index].free_list = node;
    }

    /// Non-owner push onto the remote list.
    unsafe fn push_remote_free(&self, raw: *mut u8, pool_index: usize) {
        let node = raw as *mut RemoteFreeNode;
        (*node).pool_index = pool_index;
        let mut head = self.remote_head.load(Ordering::Relaxed);
        loop {
            (*node).next = head;
            match self.remote_head.compare_exchange_weak(
                head,
                node,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => head = observed,
            }
        }
    }

    /// Owner-thread drain of the remote list into the local free lists.
    unsafe fn collect_remote_free(&self) {
        debug_assert_eq!(thread::current().id(), self.owner);
        let mut head = self.remote_head.swap(ptr::null_mut(), Ordering::Acquire);
        let pools = self.pools.get();
        while !head.is_null() {
            let next = (*head).next;
            let pool_index = (*head).pool_index;
            debug_assert!(pool_index < POOL_SIZES.len());
            let node = head as *mut FreeNode;
            (*node).next = (*pools)[pool_index].free_list;
            (*pools)[pool_index].free_list = node;
            head = next;
        }
    }
}

impl Drop for ThreadLocalPool {
    fn drop(&mut self) {
        unsafe {
            let pools = self.pools.get();
            for state in (*pools).iter() {
                let mut slab = state.slabs;
                while !slab.is_null() {
                    let next = (*slab).next;
                    let layout = Layout::from_size_align((*slab).size, MAX_ALIGN)
                        .expect("invalid slab layout");
                    dealloc(slab as *mut u8, layout);
                    slab = next;
                }
            }
        }
    }
}

#[derive(Clone, Copy)]
struct TlsCacheEntry {
    allocator_id: u64,
    pool: *mut ThreadLocalPool,
}

thread_local! {
    static POOL_CACHE: Cell<TlsCacheEntry> = const {
        Cell::new(TlsCacheEntry {
            allocator_id: 0,
            pool: ptr::null_mut(),
        })
    };
}

static NEXT_ALLOCATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Pooled frame allocator.
///
/// Safe to share across threads; each thread lazily gets its own pool on
/// first allocation. Independent instances coexist: the per-thread lookup
/// cache is keyed by a unique allocator id.
///
/// All blocks still held by callers must be returned before the allocator is
/// dropped; dropping tears down every slab. Oversize blocks alive at that
/// point are leaked.
pub struct PoolAllocator {
    id: u64,
    thread_pools: Mutex<FxHashMap<ThreadId, Box<ThreadLocalPool>>>,
}

impl PoolAllocator {
    pub fn new() -> Self {
        Self {
            id: NEXT_ALLOCATOR_ID.fetch_add(1, Ordering::Relaxed),
            thread_pools: Mutex::new(FxHashMap::default()),
        }
    }

    /// Allocate `size` usable bytes, aligned to 16. Never returns null;
    /// exhaustion aborts via `handle_alloc_error`.
    pub fn allocate(&self, size: usize) -> *mut u8 {
        let pool = self.thread_pool();
        unsafe {
            let (raw, block_size, pool_index) = match find_pool_index(size) {
                Some(index) => {
                    let raw = (*pool).allocate_from_pool(index);
                    (raw, POOL_SIZES[index] + ALIGNED_META_SIZE, index as u8)
                }
                None => {
                    let block_size = size + ALIGNED_META_SIZE;
                    let layout = Layout::from_size_align(block_size, MAX_ALIGN)
                        .expect("invalid block layout");
                    let raw = alloc(layout);
                    if raw.is_null() {
                        handle_alloc_error(layout);
                    }
                    (raw, block_size, OVERSIZE_INDEX)
                }
            };

            let meta = raw as *mut BlockMeta;
            (*meta).owner = pool;
            (*meta).block_size = block_size;
            (*meta).pool_index = pool_index;
            raw.add(ALIGNED_META_SIZE)
        }
    }

    /// Return a block obtained from [`allocate`](Self::allocate). The size
    /// is advisory; the true bucket comes from the block's meta prefix.
    /// Null is a no-op. May be called from any thread.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a live pointer previously returned by
    /// `allocate` and not freed since.
    pub unsafe fn deallocate(&self, ptr: *mut u8, _size: usize) {
        if ptr.is_null() {
            return;
        }

        let raw = ptr.sub(ALIGNED_META_SIZE);
        let meta = raw as *mut BlockMeta;
        let owner = (*meta).owner;
        let pool_index = (*meta).pool_index;

        if owner.is_null() {
            return;
        }

        if pool_index >= OVERSIZE_INDEX {
            let layout = Layout::from_size_align((*meta).block_size, MAX_ALIGN)
                .expect("invalid block layout");
            dealloc(raw, layout);
            return;
        }

        if (*owner).owner == thread::current().id() {
            (*owner).push_local_free(raw, pool_index as usize);
        } else {
            (*owner).push_remote_free(raw, pool_index as usize);
        }
    }

    /// Type-erased handle that routes frame allocation through this pool.
    /// The pool must outlive every frame allocated through the handle.
    pub fn create_task_allocator(&self) -> TaskAllocator {
        unsafe fn pool_allocate(context: *mut (), size: usize) -> *mut u8 {
            (*(context as *const PoolAllocator)).allocate(size)
        }
        unsafe fn pool_deallocate(context: *mut (), ptr: *mut u8, size: usize) {
            (*(context as *const PoolAllocator)).deallocate(ptr, size);
        }
        TaskAllocator::new(
            self as *const PoolAllocator as *mut (),
            pool_allocate,
            pool_deallocate,
        )
    }

    /// This thread's pool, creating it on first use. The map lookup is
    /// skipped while the thread-local cache still names this allocator.
    fn thread_pool(&self) -> *mut ThreadLocalPool {
        let cached = POOL_CACHE.with(|cache| {
            let entry = cache.get();
            if entry.allocator_id == self.id {
                entry.pool
            } else {
                ptr::null_mut()
            }
        });
        if !cached.is_null() {
            return cached;
        }

        let thread_id = thread::current().id();
        let mut map = self.thread_pools.lock();
        let pool = map
            .entry(thread_id)
            .or_insert_with(|| Box::new(ThreadLocalPool::new(thread_id)));
        let pool = &mut **pool as *mut ThreadLocalPool;
        drop(map);

        POOL_CACHE.with(|cache| {
            cache.set(TlsCacheEntry {
                allocator_id: self.id,
                pool,
            });
        });
        pool
    }
}

impl Default for PoolAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn find_pool_index(size: usize) -> Option<usize> {
    POOL_SIZES.iter().position(|&bucket| size <= bucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::mpsc;
    use std::sync::Arc;

    #[test]
    fn test_bucket_selection() {
        assert_eq!(find_pool_index(1), Some(0));
        assert_eq!(find_pool_index(48), Some(0));
        assert_eq!(find_pool_index(49), Some(1));
        assert_eq!(find_pool_index(8192), Some(8));
        assert_eq!(find_pool_index(8193), None);
    }

    #[test]
    fn test_allocate_is_aligned_and_writable() {
        let allocator = PoolAllocator::new();
        let ptr = allocator.allocate(64);
        assert_eq!(ptr as usize % MAX_ALIGN, 0);
        unsafe {
            ptr.write_bytes(0xcd, 64);
            allocator.deallocate(ptr, 64);
        }
    }

    #[test]
    fn test_deallocate_null_is_noop() {
        let allocator = PoolAllocator::new();
        unsafe {
            allocator.deallocate(ptr::null_mut(), 64);
        }
    }

    #[test]
    fn test_lifo_reuse_returns_same_block() {
        let allocator = PoolAllocator::new();
        let first = allocator.allocate(64);
        unsafe { allocator.deallocate(first, 64) };
        let second = allocator.allocate(64);
        assert_eq!(first, second);
        unsafe { allocator.deallocate(second, 64) };
    }

    #[test]
    fn test_tight_loop_stays_in_one_block() {
        let allocator = PoolAllocator::new();
        let first = allocator.allocate(256);
        unsafe { allocator.deallocate(first, 256) };
        for _ in 0..100 {
            let ptr = allocator.allocate(256);
            assert_eq!(ptr, first);
            unsafe { allocator.deallocate(ptr, 256) };
        }
    }

    #[test]
    fn test_sizes_share_bucket() {
        // 49 and 64 both land in the 64-byte bucket, so the freed block is
        // reused across the two request sizes.
        let allocator = PoolAllocator::new();
        let first = allocator.allocate(49);
        unsafe { allocator.deallocate(first, 49) };
        let second = allocator.allocate(64);
        assert_eq!(first, second);
        unsafe { allocator.deallocate(second, 64) };
    }

    #[test]
    fn test_distinct_live_blocks() {
        let allocator = PoolAllocator::new();
        let mut seen = HashSet::new();
        let blocks: Vec<*mut u8> = (0..100).map(|_| allocator.allocate(128)).collect();
        for &block in &blocks {
            assert!(seen.insert(block as usize), "block handed out twice");
        }
        for block in blocks {
            unsafe { allocator.deallocate(block, 128) };
        }
    }

    #[test]
    fn test_freed_blocks_are_recycled() {
        let allocator = PoolAllocator::new();
        let blocks: Vec<usize> = (0..64)
            .map(|_| allocator.allocate(512) as usize)
            .collect();
        for &block in &blocks {
            unsafe { allocator.deallocate(block as *mut u8, 512) };
        }
        let reused: HashSet<usize> = (0..64)
            .map(|_| allocator.allocate(512) as usize)
            .collect();
        for &block in &blocks {
            assert!(reused.contains(&block));
        }
        for block in reused {
            unsafe { allocator.deallocate(block as *mut u8, 512) };
        }
    }

    #[test]
    fn test_oversize_round_trip() {
        let allocator = PoolAllocator::new();
        let ptr = allocator.allocate(100_000);
        unsafe {
            ptr.write_bytes(0x5a, 100_000);
            allocator.deallocate(ptr, 100_000);
        }
    }

    #[test]
    fn test_remote_free_blocks_return_to_owner() {
        let allocator = Arc::new(PoolAllocator::new());

        let blocks: Vec<usize> = (0..100)
            .map(|_| allocator.allocate(64) as usize)
            .collect();
        let original: HashSet<usize> = blocks.iter().copied().collect();

        let mut workers = Vec::new();
        for chunk in blocks.chunks(25) {
            let chunk = chunk.to_vec();
            let allocator = allocator.clone();
            workers.push(thread::spawn(move || {
                for block in chunk {
                    unsafe { allocator.deallocate(block as *mut u8, 64) };
                }
            }));
        }
        for worker in workers {
            worker.join().unwrap();
        }

        // The owner's next allocations of the same bucket pick the remote
        // frees back up.
        let reused: Vec<usize> = (0..200)
            .map(|_| allocator.allocate(64) as usize)
            .collect();
        let reused_set: HashSet<usize> = reused.iter().copied().collect();
        for block in &original {
            assert!(reused_set.contains(block), "remote-freed block not reused");
        }
        for block in reused {
            unsafe { allocator.deallocate(block as *mut u8, 64) };
        }
    }

    #[test]
    fn test_cross_thread_producer_consumer() {
        let allocator = Arc::new(PoolAllocator::new());
        let (sender, receiver) = mpsc::channel::<usize>();

        let consumer = {
            let allocator = allocator.clone();
            thread::spawn(move || {
                let mut freed = 0usize;
                while let Ok(block) = receiver.recv() {
                    unsafe { allocator.deallocate(block as *mut u8, 128) };
                    freed += 1;
                }
                freed
            })
        };

        const COUNT: usize = 10_000;
        for _ in 0..COUNT {
            sender.send(allocator.allocate(128) as usize).unwrap();
        }
        drop(sender);
        assert_eq!(consumer.join().unwrap(), COUNT);
    }

    #[test]
    fn test_independent_allocators_coexist() {
        // Alternating between instances defeats the thread-local cache but
        // must still route every block back to the pool that issued it.
        let a = PoolAllocator::new();
        let b = PoolAllocator::new();
        for _ in 0..10 {
            let pa = a.allocate(64);
            let pb = b.allocate(64);
            assert_ne!(pa, pb);
            unsafe {
                a.deallocate(pa, 64);
                b.deallocate(pb, 64);
            }
        }
    }

    #[test]
    fn test_task_allocator_handle_round_trip() {
        let allocator = PoolAllocator::new();
        let handle = allocator.create_task_allocator();
        unsafe {
            let ptr = handle.allocate(64);
            assert_eq!(ptr as usize % MAX_ALIGN, 0);
            handle.deallocate(ptr, 64);
            // The block is back on the pool's free list.
            assert_eq!(allocator.allocate(64), ptr);
            allocator.deallocate(ptr, 64);
        }
    }
}
