//! Placement rules specific to the [`RawHeap`](super::RawHeap) allocator.

use super::BLOCK_MIN_SIZE;
use crate::header::HEADER_SIZE;

/// How a request is placed into a free block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Fit {
    /// The block is split, a free block with `tail_size` data bytes follows the allocation.
    Split { tail_size: u32 },
    /// The whole block is handed out, `wasted` bytes past the request stay unused.
    Whole { wasted: u32 },
}

/// Decides how a request of `size` bytes fits into a free block holding `block_size` bytes,
/// or returns `None` if it doesn't fit at all.
///
/// A block is split only when the remainder can hold a header plus
/// [`BLOCK_CONTENT_MIN_SIZE`](super::BLOCK_CONTENT_MIN_SIZE) bytes,
/// otherwise the whole block is consumed.
#[inline]
pub fn fit(block_size: u32, size: u32) -> Option<Fit> {
    let remainder = block_size.checked_sub(size)?;
    if remainder >= BLOCK_MIN_SIZE {
        Some(Fit::Split {
            tail_size: remainder - HEADER_SIZE,
        })
    } else {
        Some(Fit::Whole { wasted: remainder })
    }
}
