//! A singlethreaded heap over a flat byte buffer.
//!
// For a general view of the heap's operational semantics see the [`crate`] level documentation.
//
// # Additional implementation notes
// ## Chain checks
// Every header read while walking the chain goes through `checked_block`,
// which also guarantees that `next` is strictly greater than the current
// address. Walks therefore always terminate, and a damaged header surfaces as
// `HeapError::CorruptHeap` instead of an out-of-bounds read or an endless loop.

use self::util::{fit, Fit};
use crate::block::{checked_block, next_block, Block, Blocks, HeapStats};
use crate::error::HeapError;
use crate::header::{
    is_stamped, Addr, Header, BREAK_ADDR, FIRST_BLOCK_ADDR, HEADER_LEN, HEADER_SIZE, NULL,
    USED_BIT,
};
use crate::memory::Memory;
use crate::util::{checked_range, load_header, load_u8, store_header, store_u8};

use core::fmt::Debug;

use static_assertions::const_assert;
use tracing::{debug, info, instrument, Level};

mod util;

/// Smallest data region a split may leave behind.
pub(crate) const BLOCK_CONTENT_MIN_SIZE: u32 = 16;

pub(crate) const BLOCK_MIN_SIZE: u32 = HEADER_SIZE + BLOCK_CONTENT_MIN_SIZE;

/// Smallest buffer the heap can be initialized on.
pub const MIN_BUFFER_LEN: usize = FIRST_BLOCK_ADDR as usize + BLOCK_MIN_SIZE as usize;

// The break cell is a single byte holding the first header address.
const_assert!(FIRST_BLOCK_ADDR <= u8::MAX as u32);
const_assert!(BLOCK_CONTENT_MIN_SIZE > 0);

/// What [`release`](RawHeap::release) does with the neighbours of a freed block.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ReleasePolicy {
    /// Only the used bit is cleared. Freed blocks stay distinct chain entries
    /// and fragmentation accumulates.
    #[default]
    Retain,
    /// Adjacent free blocks are merged. A freed block absorbs the free blocks
    /// directly following it, and the first-fit scan does the same for every
    /// free block it visits, so blocks freed in any order end up merged.
    Coalesce,
}

/// Heap configuration.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HeapOptions {
    pub release: ReleasePolicy,
}

impl HeapOptions {
    /// The default options: [`ReleasePolicy::Retain`].
    #[inline(always)]
    pub const fn new() -> Self {
        HeapOptions {
            release: ReleasePolicy::Retain,
        }
    }

    #[inline(always)]
    pub const fn with_release(self, release: ReleasePolicy) -> Self {
        HeapOptions { release }
    }
}

impl Default for HeapOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// A single threaded heap.
///
/// The heap keeps no state outside of the buffer besides its options: all
/// block metadata lives in headers embedded in the buffer, so a buffer can be
/// snapshotted with [`into_inner`](RawHeap::into_inner) and picked up again
/// with [`init`](RawHeap::init).
pub struct RawHeap<M: Memory> {
    memory: M,
    options: HeapOptions,
}

impl<M: Memory> Debug for RawHeap<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RawHeap")
            .field("len", &self.memory.len())
            .field("options", &self.options)
            .finish()
    }
}

impl<M: Memory> RawHeap<M> {
    /// Takes over `memory` with the default [`HeapOptions`].
    /// See [`init_with`](RawHeap::init_with).
    pub fn init(memory: M) -> Result<Self, HeapError> {
        Self::init_with(memory, HeapOptions::default())
    }

    /// Takes over `memory` and returns a heap handle for it.
    ///
    /// If the break cell of the buffer is still zero, the buffer is stamped:
    /// the break cell is set to the first header address and a single free
    /// block spanning the rest of the buffer is written. Otherwise the buffer
    /// already holds a chain and is used as is, which makes initialization
    /// idempotent for a given buffer.
    #[instrument(level = "info", skip(memory), fields(len = memory.len()), err(Debug, level = Level::ERROR))]
    pub fn init_with(mut memory: M, options: HeapOptions) -> Result<Self, HeapError> {
        let len = memory.len();
        if len < MIN_BUFFER_LEN {
            return Err(HeapError::BufferTooSmall {
                len,
                min: MIN_BUFFER_LEN,
            });
        }
        if len > u32::MAX as usize {
            return Err(HeapError::BufferTooLarge { len });
        }

        let buf = memory.bytes_mut();
        if !is_stamped(buf) {
            let content_size = (len - FIRST_BLOCK_ADDR as usize - HEADER_LEN) as u32;
            store_u8(buf, BREAK_ADDR, FIRST_BLOCK_ADDR as u8)?;
            store_header(buf, FIRST_BLOCK_ADDR, Header::new(content_size, NULL, false))?;
            info!(content_size, "Stamped a fresh heap.");
        } else {
            debug!("Buffer is already stamped, reusing its blocks.");
        }

        Ok(RawHeap { memory, options })
    }

    #[inline(always)]
    pub fn options(&self) -> HeapOptions {
        self.options
    }

    /// Value of the break cell. It records the first header address and is
    /// otherwise only used to tell stamped buffers apart from fresh ones.
    #[inline]
    pub fn break_cell(&self) -> u8 {
        self.memory.bytes()[BREAK_ADDR as usize]
    }

    /// Data capacity of a freshly stamped heap on this buffer,
    /// i.e. the largest request that can ever be served.
    #[inline]
    pub fn capacity(&self) -> u32 {
        (self.memory.len() - FIRST_BLOCK_ADDR as usize - HEADER_LEN) as u32
    }

    /// Returns the whole buffer.
    #[inline(always)]
    pub fn bytes(&self) -> &[u8] {
        self.memory.bytes()
    }

    /// Hands the buffer back.
    #[inline(always)]
    pub fn into_inner(self) -> M {
        self.memory
    }
}

impl<M: Memory> RawHeap<M> {
    /// Allocates `size` bytes and returns the address of the data region.
    ///
    /// Returns [`NULL`] when `size` is zero or when no free block can hold the
    /// request. This is an expected outcome that callers must check for.
    /// The returned region is usable for at least `size` bytes and is not
    /// zeroed.
    ///
    /// # Errors
    /// [`HeapError::CorruptHeap`] if a header visited by the first-fit scan
    /// does not describe a valid chain.
    #[instrument(level = "info", skip(self), ret(level = Level::INFO), err(Debug, level = Level::ERROR))]
    pub fn allocate(&mut self, size: u32) -> Result<Addr, HeapError> {
        if size == 0 {
            return Ok(NULL);
        }

        match self.find_first_fit(size)? {
            Some((block, placement)) => self.place(block, size, placement),
            None => {
                debug!("No free block can hold the request.");
                Ok(NULL)
            }
        }
    }

    /// Releases the block whose data region starts at `addr`. Releasing [`NULL`] does nothing.
    ///
    /// Only bit 0 of the block flags is cleared, other bits and fields are
    /// left as they are. With [`ReleasePolicy::Coalesce`] the block then
    /// absorbs the free blocks directly following it.
    ///
    /// # Caller obligations
    /// `addr` must have been returned by [`allocate`](RawHeap::allocate) on
    /// this buffer and must not have been released since. This is not
    /// checked: releasing any other address inside the buffer clears a bit in
    /// whatever byte sits 9 bytes before it and leaves the heap in an
    /// unspecified state.
    ///
    /// # Errors
    /// [`HeapError::OutOfBounds`] if `addr` cannot be a region address of this
    /// buffer at all, that is below the first region or at or past the end of
    /// the buffer. [`HeapError::CorruptHeap`] if coalescing runs into a bad header.
    #[instrument(level = "info", skip(self), err(Debug, level = Level::ERROR))]
    pub fn release(&mut self, addr: Addr) -> Result<(), HeapError> {
        if addr == NULL {
            return Ok(());
        }

        let len = self.memory.len();
        if addr as usize >= len {
            return Err(HeapError::OutOfBounds { addr, len });
        }
        let block_start = addr
            .checked_sub(HEADER_SIZE)
            .filter(|&start| start >= FIRST_BLOCK_ADDR)
            .ok_or(HeapError::OutOfBounds { addr, len })?;

        let buf = self.memory.bytes_mut();
        let flags = load_u8(buf, block_start)?;
        debug_assert!(flags & USED_BIT != 0, "Block shouldn't be free already.");
        store_u8(buf, block_start, flags & !USED_BIT)?;

        if self.options.release == ReleasePolicy::Coalesce {
            self.merge_subsequent_blocks(block_start)?;
        }
        Ok(())
    }

    /// Walks the chain from the first block and returns the first free block
    /// that can hold `size` bytes, together with how the request fits into it.
    #[instrument(level = "debug", skip(self), err(Debug, level = Level::DEBUG))]
    fn find_first_fit(&mut self, size: u32) -> Result<Option<(Block, Fit)>, HeapError> {
        let mut addr = FIRST_BLOCK_ADDR;

        loop {
            let mut block = checked_block(self.memory.bytes(), addr)?;

            if !block.is_used() {
                if self.options.release == ReleasePolicy::Coalesce {
                    block = self.merge_subsequent_blocks(addr)?;
                }
                if let Some(placement) = fit(block.size(), size) {
                    debug!(block_start = block.addr, block_size = block.size(), "Found free block.");
                    return Ok(Some((block, placement)));
                }
            }

            if block.next() == NULL {
                return Ok(None);
            }
            addr = block.next();
        }
    }

    /// Marks `block` used for a request of `size` bytes, splitting off the tail
    /// of the block as a new free block when `placement` says so.
    /// Returns the address of the data region.
    #[instrument(level = "debug", skip(self), ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    fn place(&mut self, block: Block, size: u32, placement: Fit) -> Result<Addr, HeapError> {
        let buf = self.memory.bytes_mut();

        match placement {
            Fit::Split { tail_size } => {
                let tail_start = block.region() + size;
                store_header(buf, tail_start, Header::new(tail_size, block.next(), false))?;

                let header = Header {
                    content_size: size,
                    next: tail_start,
                    ..block.header
                };
                store_header(buf, block.addr, header.tagged())?;
                debug!(tail_start, tail_size, "Split block.");
            }
            Fit::Whole { wasted } => {
                store_header(buf, block.addr, block.header.tagged())?;
                debug!(wasted, "Handing out the whole block.");
            }
        }

        Ok(block.region())
    }

    /// Merges the free blocks directly following the free block at `block_start`
    /// into it and returns the resulting block.
    ///
    /// The merged block keeps its flags, its size grows by a header plus the data
    /// of every absorbed block and its `next` becomes that of the last absorbed block.
    #[instrument(level = "debug", skip(self), err(Debug, level = Level::ERROR))]
    fn merge_subsequent_blocks(&mut self, block_start: Addr) -> Result<Block, HeapError> {
        let buf = self.memory.bytes_mut();
        let mut block = checked_block(buf, block_start)?;
        debug_assert!(!block.is_used(), "Only free blocks are merged.");

        let mut merged = false;
        while block.next() != NULL {
            let next = checked_block(buf, block.next())?;
            if next.is_used() {
                break;
            }

            block.header.content_size += HEADER_SIZE + next.size();
            block.header.next = next.next();
            merged = true;

            debug!(
                next_block_start = next.addr,
                adjusted_size = block.size(),
                "Merging with successive free block."
            );
        }

        if merged {
            store_header(buf, block_start, block.header)?;
        }
        Ok(block)
    }
}

impl<M: Memory> RawHeap<M> {
    /// Iterates over the block chain starting from the first block.
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks::new(self.memory.bytes(), FIRST_BLOCK_ADDR)
    }

    /// Reads the block whose header starts at `addr` as is, for inspection.
    /// Returns `None` when `addr` is [`NULL`] or lies past the end of the buffer.
    pub fn block_at(&self, addr: Addr) -> Result<Option<Block>, HeapError> {
        next_block(self.memory.bytes(), addr)
    }

    /// Walks the whole chain, checks that its blocks tile the buffer from the
    /// first header to the end without gaps or overlaps and returns a summary.
    #[instrument(level = "debug", skip(self), ret(level = Level::DEBUG), err(Debug, level = Level::ERROR))]
    pub fn check(&self) -> Result<HeapStats, HeapError> {
        let mut stats = HeapStats::default();
        for block in self.blocks() {
            stats.record(&block?);
        }
        Ok(stats)
    }

    /// Renders the block chain as a table, one block per line:
    /// header address, status, data size, next header address and region address.
    pub fn dump(&self) -> Result<String, HeapError> {
        self.blocks()
            .map(|block| block.map(|block| format!("{block}\n")))
            .collect()
    }

    /// Returns the data region of the block whose region starts at `addr`.
    ///
    /// The same caller obligations as for [`release`](RawHeap::release) apply
    /// to `addr`, only its bounds are checked.
    pub fn region(&self, addr: Addr) -> Result<&[u8], HeapError> {
        let range = self.region_range(addr)?;
        Ok(&self.memory.bytes()[range])
    }

    /// Mutable version of [`region`](RawHeap::region).
    pub fn region_mut(&mut self, addr: Addr) -> Result<&mut [u8], HeapError> {
        let range = self.region_range(addr)?;
        Ok(&mut self.memory.bytes_mut()[range])
    }

    fn region_range(&self, addr: Addr) -> Result<core::ops::Range<usize>, HeapError> {
        let buf = self.memory.bytes();
        let block_start = addr
            .checked_sub(HEADER_SIZE)
            .filter(|&start| start >= FIRST_BLOCK_ADDR)
            .ok_or(HeapError::OutOfBounds {
                addr,
                len: buf.len(),
            })?;
        let header = load_header(buf, block_start)?;
        checked_range(buf, addr, header.content_size as usize)
    }
}

#[cfg(test)]
mod tests;
