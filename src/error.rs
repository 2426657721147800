//! Error types reported by the heap.
//!
//! Running out of memory is not an error: [`allocate`](crate::RawHeap::allocate)
//! reports it by returning [`NULL`](crate::NULL). The variants below cover
//! misuse of the buffer and headers that no longer describe a valid chain.

use thiserror::Error;

use crate::header::Addr;

/// Describes which chain invariant a corrupt header violates.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum Corruption {
    #[error("header runs past the end of the buffer")]
    HeaderOverrun,
    #[error("block data runs past the end of the buffer")]
    ExtentOverrun,
    #[error("next header does not start where this block ends")]
    Gap,
    #[error("last block does not end at the end of the buffer")]
    ShortChain,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("buffer of {len} bytes is too small, at least {min} bytes are required")]
    BufferTooSmall { len: usize, min: usize },

    #[error("buffer of {len} bytes is not addressable with 32-bit addresses")]
    BufferTooLarge { len: usize },

    #[error("address {addr:#010x} is outside of the {len}-byte buffer")]
    OutOfBounds { addr: Addr, len: usize },

    #[error("corrupt block header at {addr:#010x}: {reason}")]
    CorruptHeap { addr: Addr, reason: Corruption },

    #[error("heap lock poisoned by a panicking thread")]
    Poisoned,
}
