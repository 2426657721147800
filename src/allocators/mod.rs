//! The [`RawHeap`] and [`SharedHeap`] allocators.

pub mod raw_heap;
pub mod shared_heap;

pub use raw_heap::{HeapOptions, RawHeap, ReleasePolicy};
pub use shared_heap::SharedHeap;
