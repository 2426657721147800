//! A first-fit block allocator for a single flat byte buffer.
//!
//! The heap manages a fixed-length buffer that it does not own the allocation of,
//! e.g. a memory region shared between worker threads. There is no system
//! allocator behind it: every piece of bookkeeping lives in headers written
//! into the buffer itself, and addresses handed out are byte offsets into that
//! buffer.
//!
//! # Usage
//! ```
//! use flat_malloc::{RawHeap, NULL};
//!
//! let mut heap = RawHeap::init(vec![0_u8; 1024]).unwrap();
//!
//! let p = heap.allocate(10).unwrap();
//! assert_ne!(p, NULL);
//! heap.region_mut(p).unwrap()[..10].copy_from_slice(b"0123456789");
//!
//! heap.release(p).unwrap();
//! assert_eq!(heap.allocate(10).unwrap(), p);
//! ```
//!
//! # Allocators
//! Two allocators are exported by this crate - [`RawHeap`] and [`SharedHeap`].
//! Use [`RawHeap`] when the buffer is accessed from one thread at a time,
//! [`SharedHeap`] is just a `Mutex` wrapper over it for buffers shared
//! between threads. The headers are plain bytes, so [`RawHeap`] on its own
//! must never be driven from several threads against the same buffer.
//!
//! # Mode of operation
//! The allocator uses a straightforward block chain:
//! - On initialization the buffer is stamped with a single free block spanning all of it.
//! - When an allocation is requested the chain is walked from the first block
//!   and the first free block large enough is picked. If what is left after the
//!   request can hold a header plus 16 bytes the block is split and the rest
//!   becomes a new free block, otherwise the whole block is handed out.
//! - When no block fits, [`NULL`] is returned.
//! - On release the used bit of the block is cleared. Freed blocks are not
//!   merged with their neighbours unless [`ReleasePolicy::Coalesce`] is
//!   configured, so by default fragmentation accumulates.
//!
//! ## Buffer layout
//! ```text
//! offset 0        reserved, the NULL address
//! offset 1        break cell, set to the first header address on initialization
//! offset 2..      first block header + data, next block header + data, ...
//! ```
//! Address 0 is never handed out. The break cell is only used to tell a
//! stamped buffer from a fresh one: initializing a heap on a buffer that is
//! already stamped reuses the blocks it holds.
//!
//! ## Blocks
//! A block is a 9-byte [header](#headers) followed by its data region. The
//! address of the data region is what [`allocate`](RawHeap::allocate) returns
//! and what [`release`](RawHeap::release) takes. Blocks are laid out back to
//! back and tile the buffer from offset 2 to its end.
//!
//! ## Headers
//! A header holds a flags byte (bit 0 set for a used block, the other bits
//! reserved), the size of the data region and the address of the next header
//! (0 for the last block), both as big-endian `u32`.
//!
//! ## Memory
//! The heaps are generic over the buffer they manage. Anything that implements
//! [`Memory`] (`Vec<u8>`, `Box<[u8]>`, byte arrays and mutable borrows of
//! those) can be used.
//!
//! # Errors
//! Running out of memory is reported by returning [`NULL`], not as an error.
//! [`HeapError`] covers buffers that can't hold a heap, addresses outside of
//! the buffer and headers that no longer form a valid chain
//! ([`HeapError::CorruptHeap`]). The heap never recovers from corruption, it
//! only refuses to walk past it.
//!
//! # Logging
//! Operations are instrumented with [`tracing`] spans and events. Install a
//! subscriber in the host program to see them.
//!
//! [`Memory`]: memory::Memory

pub use crate::allocators::{HeapOptions, RawHeap, ReleasePolicy, SharedHeap};
pub use crate::block::{Block, Blocks, HeapStats};
pub use crate::error::{Corruption, HeapError};
pub use crate::header::{is_stamped, Addr, HEADER_SIZE, NULL};

pub mod allocators;
mod block;
mod error;
pub mod header;
pub mod memory;
mod util;
