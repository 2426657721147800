//! Defines the [`Block`] view of a header, chain traversal and chain statistics.

use core::fmt;

use tracing::error;

use crate::error::{Corruption, HeapError};
use crate::header::{Addr, Header, HEADER_SIZE, NULL};
use crate::util::load_header;

/// A block header read out of the buffer together with its address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Block {
    pub addr: Addr,
    pub header: Header,
}

impl Block {
    #[inline(always)]
    pub fn is_used(&self) -> bool {
        self.header.is_used()
    }

    /// Size of the data region, excluding the header.
    #[inline(always)]
    pub fn size(&self) -> u32 {
        self.header.content_size
    }

    #[inline(always)]
    pub fn next(&self) -> Addr {
        self.header.next
    }

    /// The address handed out to callers for this block.
    #[inline(always)]
    pub fn region(&self) -> Addr {
        self.addr + HEADER_SIZE
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:#010x} {:>8} {:>10} {:#010x} {:#010x}",
            self.addr,
            if self.is_used() { "used" } else { "not used" },
            self.size(),
            self.next(),
            self.region(),
        )
    }
}

/// Reads the block whose header is at `addr` without checking any chain invariant.
/// Returns `None` at the end of the chain, that is when `addr` is [`NULL`]
/// or lies past the end of the buffer.
pub fn next_block(buf: &[u8], addr: Addr) -> Result<Option<Block>, HeapError> {
    if addr == NULL || addr as usize >= buf.len() {
        return Ok(None);
    }
    let header = load_header(buf, addr).map_err(|_| HeapError::CorruptHeap {
        addr,
        reason: Corruption::HeaderOverrun,
    })?;
    Ok(Some(Block { addr, header }))
}

/// Reads the block at `addr` and checks that it tiles the buffer correctly:
/// its data fits in the buffer and the next header starts right where the
/// block ends, or the block ends at the end of the buffer if it is the last one.
pub(crate) fn checked_block(buf: &[u8], addr: Addr) -> Result<Block, HeapError> {
    let corrupt = |reason: Corruption| {
        error!(addr, ?reason, "Corrupt block header.");
        HeapError::CorruptHeap { addr, reason }
    };

    let header = load_header(buf, addr).map_err(|_| corrupt(Corruption::HeaderOverrun))?;
    let end = match header.block_end(addr) {
        Some(end) if end <= buf.len() as u64 => end,
        _ => return Err(corrupt(Corruption::ExtentOverrun)),
    };

    if header.next == NULL {
        if end != buf.len() as u64 {
            return Err(corrupt(Corruption::ShortChain));
        }
    } else if header.next as u64 != end {
        return Err(corrupt(Corruption::Gap));
    }

    Ok(Block { addr, header })
}

/// Iterator over the block chain, see [`RawHeap::blocks`](crate::RawHeap::blocks).
///
/// Every yielded block has been checked with the same rules `allocate` applies.
/// Iteration stops after the last block or after the first error.
pub struct Blocks<'a> {
    buf: &'a [u8],
    cursor: Addr,
}

impl<'a> Blocks<'a> {
    pub(crate) fn new(buf: &'a [u8], first: Addr) -> Self {
        Blocks { buf, cursor: first }
    }
}

impl Iterator for Blocks<'_> {
    type Item = Result<Block, HeapError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NULL {
            return None;
        }
        let item = checked_block(self.buf, self.cursor);
        self.cursor = match &item {
            Ok(block) => block.next(),
            Err(_) => NULL,
        };
        Some(item)
    }
}

/// Summary of the block chain.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub blocks: usize,
    pub used_blocks: usize,
    pub free_blocks: usize,
    /// Data bytes held by used blocks, headers excluded.
    pub used_bytes: u64,
    /// Data bytes held by free blocks, headers excluded.
    pub free_bytes: u64,
    /// Size of the largest free block, i.e. the largest request that can still be served.
    pub largest_free: u32,
}

impl HeapStats {
    pub(crate) fn record(&mut self, block: &Block) {
        self.blocks += 1;
        if block.is_used() {
            self.used_blocks += 1;
            self.used_bytes += block.size() as u64;
        } else {
            self.free_blocks += 1;
            self.free_bytes += block.size() as u64;
            self.largest_free = self.largest_free.max(block.size());
        }
    }

    /// Bytes taken up by block headers.
    pub fn header_bytes(&self) -> u64 {
        self.blocks as u64 * HEADER_SIZE as u64
    }
}
