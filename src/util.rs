//! Bounds-checked accessors for header fields inside the heap buffer.

use crate::error::HeapError;
use crate::header::{Addr, Header, HEADER_LEN};

/// Returns the `[addr, addr + len)` range if it lies inside `buf`.
#[inline]
pub(crate) fn checked_range(
    buf: &[u8],
    addr: Addr,
    len: usize,
) -> Result<core::ops::Range<usize>, HeapError> {
    let start = addr as usize;
    match start.checked_add(len) {
        Some(end) if end <= buf.len() => Ok(start..end),
        _ => Err(HeapError::OutOfBounds {
            addr,
            len: buf.len(),
        }),
    }
}

#[inline]
pub(crate) fn load_u8(buf: &[u8], addr: Addr) -> Result<u8, HeapError> {
    let range = checked_range(buf, addr, 1)?;
    Ok(buf[range.start])
}

#[inline]
pub(crate) fn store_u8(buf: &mut [u8], addr: Addr, value: u8) -> Result<(), HeapError> {
    let range = checked_range(buf, addr, 1)?;
    buf[range.start] = value;
    Ok(())
}

pub(crate) fn load_header(buf: &[u8], addr: Addr) -> Result<Header, HeapError> {
    let range = checked_range(buf, addr, HEADER_LEN)?;
    let mut bytes = [0_u8; HEADER_LEN];
    bytes.copy_from_slice(&buf[range]);
    Ok(Header::from_bytes(bytes))
}

pub(crate) fn store_header(buf: &mut [u8], addr: Addr, header: Header) -> Result<(), HeapError> {
    let range = checked_range(buf, addr, HEADER_LEN)?;
    buf[range].copy_from_slice(&header.to_bytes());
    Ok(())
}
