//! Defines the [`Header`] struct, the buffer address type and the layout constants.
//!
//! Every block starts with a 9-byte header laid out as follows
//! (multi-byte fields are big-endian):
//! ```text
//! header[0]      flags, bit 0 set if the block is used, bits 1..7 reserved
//! header[1..5]   data size in bytes, excluding the header (u32)
//! header[5..9]   address of the next header, 0 for the last block (u32)
//! ```

use static_assertions::const_assert_eq;

/// A byte offset into the heap buffer.
pub type Addr = u32;

/// The null address. Offset 0 of the buffer is never handed out.
pub const NULL: Addr = 0;

/// Address of the break cell, a single byte stamped on initialization.
pub const BREAK_ADDR: Addr = 1;

/// Address of the header of the first block.
pub const FIRST_BLOCK_ADDR: Addr = BREAK_ADDR + 1;

pub const FLAGS_OFFSET: usize = 0;
pub const SIZE_OFFSET: usize = 1;
pub const NEXT_OFFSET: usize = 5;

pub const HEADER_LEN: usize = NEXT_OFFSET + 4;
pub const HEADER_SIZE: u32 = HEADER_LEN as u32;

/// Flag bit marking a block as used.
pub const USED_BIT: u8 = 0b0000_0001;

const_assert_eq!(HEADER_LEN, 9);
const_assert_eq!(SIZE_OFFSET, FLAGS_OFFSET + 1);
const_assert_eq!(NEXT_OFFSET, SIZE_OFFSET + 4);
const_assert_eq!(FIRST_BLOCK_ADDR, 2);

/// Returns whether `buf` has already been stamped by [`RawHeap::init`](crate::RawHeap::init),
/// i.e. whether its break cell is set.
#[inline]
pub fn is_stamped(buf: &[u8]) -> bool {
    buf.get(BREAK_ADDR as usize).is_some_and(|&b| b != 0)
}

/// Stores information about a block: its flags, the size of its data region
/// and the address of the next block header.
///
/// # Tagging
/// The used status lives in bit 0 of `flags`. A tagged header denotes a used
/// block, an untagged header a free one. The other flag bits are reserved,
/// tagging and untagging leaves them as they are.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Header {
    pub flags: u8,
    pub content_size: u32,
    pub next: Addr,
}

impl Header {
    /// Creates a new header with no reserved bits set.
    #[inline(always)]
    pub const fn new(content_size: u32, next: Addr, is_used: bool) -> Header {
        Header {
            flags: if is_used { USED_BIT } else { 0 },
            content_size,
            next,
        }
    }

    /// Returns a tagged (used) version of the header.
    #[inline(always)]
    pub fn tagged(&self) -> Header {
        Header {
            flags: self.flags | USED_BIT,
            ..*self
        }
    }

    /// Returns an untagged (free) version of the header.
    #[inline(always)]
    pub fn untagged(&self) -> Header {
        Header {
            flags: self.flags & !USED_BIT,
            ..*self
        }
    }

    #[inline(always)]
    pub fn is_used(&self) -> bool {
        self.flags & USED_BIT != 0
    }

    /// Returns the address one past the end of the data region of a block
    /// whose header is placed at `addr`, or `None` on address overflow.
    #[inline]
    pub fn block_end(&self, addr: Addr) -> Option<u64> {
        let end = addr as u64 + HEADER_SIZE as u64 + self.content_size as u64;
        (end <= u32::MAX as u64 + 1).then_some(end)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0_u8; HEADER_LEN];
        bytes[FLAGS_OFFSET] = self.flags;
        bytes[SIZE_OFFSET..NEXT_OFFSET].copy_from_slice(&self.content_size.to_be_bytes());
        bytes[NEXT_OFFSET..HEADER_LEN].copy_from_slice(&self.next.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: [u8; HEADER_LEN]) -> Header {
        let [flags, s0, s1, s2, s3, n0, n1, n2, n3] = bytes;
        Header {
            flags,
            content_size: u32::from_be_bytes([s0, s1, s2, s3]),
            next: u32::from_be_bytes([n0, n1, n2, n3]),
        }
    }
}
