//! Single-owner scheduler: an ordered queue of ready frames.
//!
//! Each scheduler belongs to exactly one thread. The owner pushes and drains
//! `local` without synchronization; every other thread goes through the
//! lock-free `remote` stack, which the owner folds in at the start of each
//! update.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::thread::{self, ThreadId};

use crate::runtime::frame::{self, RawHandle};

struct RemoteNode {
    handle: RawHandle,
    next: *mut RemoteNode,
}

pub(crate) struct Scheduler {
    owner: ThreadId,
    /// Ready frames, owner thread only.
    local: UnsafeCell<VecDeque<RawHandle>>,
    /// Mirror of `local.len()` so observers on other threads stay safe.
    local_len: AtomicUsize,
    /// Reused drain buffer for updates.
    drain: UnsafeCell<Vec<RawHandle>>,
    /// Frames pushed by non-owner threads.
    remote_head: AtomicPtr<RemoteNode>,
    remote_len: AtomicUsize,
}

// `local` and `drain` are owner-thread-only (debug-asserted); cross-thread
// traffic goes through the atomics.
unsafe impl Send for Scheduler {}
unsafe impl Sync for Scheduler {}

impl Scheduler {
    pub(crate) fn new(owner: ThreadId, reserved: usize) -> Self {
        Self {
            owner,
            local: UnsafeCell::new(VecDeque::with_capacity(reserved)),
            local_len: AtomicUsize::new(0),
            drain: UnsafeCell::new(Vec::with_capacity(reserved)),
            remote_head: AtomicPtr::new(ptr::null_mut()),
            remote_len: AtomicUsize::new(0),
        }
    }

    /// Enqueue a ready frame for the next update. Never blocks: the owner
    /// appends locally, other threads push onto the remote stack.
    pub(crate) fn schedule(&self, handle: RawHandle) {
        if thread::current().id() == self.owner {
            unsafe { (*self.local.get()).push_back(handle) };
            self.local_len.fetch_add(1, Ordering::Relaxed);
        } else {
            self.push_remote(handle);
        }
    }

    fn push_remote(&self, handle: RawHandle) {
        let node = Box::into_raw(Box::new(RemoteNode {
            handle,
            next: ptr::null_mut(),
        }));
        let mut head = self.remote_head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).next = head };
            match self.remote_head.compare_exchange_weak(
                head,
                node,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => head = observed,
            }
        }
        self.remote_len.fetch_add(1, Ordering::Release);
    }

    /// Snapshot the ready set for one update: remote arrivals first, then
    /// the local backlog. Frames enqueued while the snapshot is being
    /// resumed land in `local` and wait for the next update. Owner only.
    pub(crate) fn begin_update(&self) -> Vec<RawHandle> {
        debug_assert_eq!(thread::current().id(), self.owner);
        let mut buffer = std::mem::take(unsafe { &mut *self.drain.get() });
        buffer.clear();

        let mut head = self.remote_head.swap(ptr::null_mut(), Ordering::Acquire);
        while !head.is_null() {
            let node = unsafe { Box::from_raw(head) };
            buffer.push(node.handle);
            self.remote_len.fetch_sub(1, Ordering::Release);
            head = node.next;
        }

        let local = unsafe { &mut *self.local.get() };
        buffer.extend(local.drain(..));
        self.local_len.store(0, Ordering::Relaxed);
        buffer
    }

    /// Hand the drain buffer back for reuse. Owner only.
    pub(crate) fn end_update(&self, mut buffer: Vec<RawHandle>) {
        debug_assert_eq!(thread::current().id(), self.owner);
        buffer.clear();
        unsafe { *self.drain.get() = buffer };
    }

    /// Drain and resume everything currently ready. Owner only.
    #[cfg(test)]
    pub(crate) fn update(&self) {
        let buffer = self.begin_update();
        for &handle in &buffer {
            unsafe { frame::resume(handle) };
        }
        self.end_update(buffer);
    }

    /// Queued frame count. Exact for the owner thread; other threads see a
    /// racy but monotone-safe observation.
    pub(crate) fn pending_count(&self) -> usize {
        self.local_len.load(Ordering::Relaxed) + self.remote_len.load(Ordering::Acquire)
    }
}

impl Drop for Scheduler {
    /// Destroys every frame still queued. The teardown escape hatch for
    /// tasks alive when the host shuts down.
    fn drop(&mut self) {
        for handle in self.local.get_mut().drain(..) {
            unsafe { handle.destroy() };
        }
        let mut head = self.remote_head.swap(ptr::null_mut(), Ordering::Acquire);
        while !head.is_null() {
            let node = unsafe { Box::from_raw(head) };
            unsafe { node.handle.destroy() };
            head = node.next;
        }
        for handle in self.drain.get_mut().drain(..) {
            unsafe { handle.destroy() };
        }
    }
}
