//! A multithreaded heap.

use crate::allocators::raw_heap::{HeapOptions, RawHeap};
use crate::block::{Block, HeapStats};
use crate::error::HeapError;
use crate::header::Addr;
use crate::memory::Memory;

use std::sync::{Mutex, MutexGuard};

/// A multithreaded heap.
///
/// This heap is just a `Mutex` wrapper over [`RawHeap`]. The headers inside the
/// buffer are not updated atomically, so without the lock two threads could
/// both pick the same free block in their first-fit scans and hand out
/// overlapping regions. Every operation here runs the whole scan or update
/// under the lock.
///
/// The buffer is stamped once in [`init`](SharedHeap::init), before the heap
/// can be shared, so initialization needs no further synchronization.
/// Put the heap into an `Arc` to share it between threads.
pub struct SharedHeap<M: Memory> {
    inner: Mutex<RawHeap<M>>,
}

impl<M: Memory> SharedHeap<M> {
    /// See [`RawHeap::init`].
    pub fn init(memory: M) -> Result<Self, HeapError> {
        Self::init_with(memory, HeapOptions::default())
    }

    /// See [`RawHeap::init_with`].
    pub fn init_with(memory: M, options: HeapOptions) -> Result<Self, HeapError> {
        Ok(SharedHeap {
            inner: Mutex::new(RawHeap::init_with(memory, options)?),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, RawHeap<M>>, HeapError> {
        self.inner.lock().map_err(|_| HeapError::Poisoned)
    }

    /// See [`RawHeap::allocate`].
    pub fn allocate(&self, size: u32) -> Result<Addr, HeapError> {
        self.lock()?.allocate(size)
    }

    /// See [`RawHeap::release`], the same caller obligations apply.
    pub fn release(&self, addr: Addr) -> Result<(), HeapError> {
        self.lock()?.release(addr)
    }

    /// See [`RawHeap::check`].
    pub fn check(&self) -> Result<HeapStats, HeapError> {
        self.lock()?.check()
    }

    /// See [`RawHeap::dump`].
    pub fn dump(&self) -> Result<String, HeapError> {
        self.lock()?.dump()
    }

    /// Collects the block chain while holding the lock.
    pub fn blocks(&self) -> Result<Vec<Block>, HeapError> {
        self.lock()?.blocks().collect()
    }

    /// Runs `f` with exclusive access to the underlying heap, e.g. to read or
    /// write the data region of an allocation.
    pub fn with<R>(&self, f: impl FnOnce(&mut RawHeap<M>) -> R) -> Result<R, HeapError> {
        Ok(f(&mut *self.lock()?))
    }

    /// Hands the buffer back.
    pub fn into_inner(self) -> Result<M, HeapError> {
        self.inner
            .into_inner()
            .map(RawHeap::into_inner)
            .map_err(|_| HeapError::Poisoned)
    }
}
