//! [`Memory`] trait and the buffer types that implement it.
//!
//! The [`Memory`] trait allows users to easily change the underlying
//! buffer on which the heaps in [`flat_malloc::allocators`](crate::allocators) operate.
//! The heap never grows, shrinks or reallocates the buffer, it only reads and
//! writes block headers inside it.

/// A trait for types that act as a fixed-length, byte-addressable buffer.
pub trait Memory {
    /// Returns the whole buffer.
    fn bytes(&self) -> &[u8];

    /// Returns the whole buffer for writing.
    fn bytes_mut(&mut self) -> &mut [u8];

    #[inline(always)]
    fn len(&self) -> usize {
        self.bytes().len()
    }

    #[inline(always)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Memory for [u8] {
    #[inline(always)]
    fn bytes(&self) -> &[u8] {
        self
    }

    #[inline(always)]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl<const N: usize> Memory for [u8; N] {
    #[inline(always)]
    fn bytes(&self) -> &[u8] {
        self
    }

    #[inline(always)]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl Memory for Vec<u8> {
    #[inline(always)]
    fn bytes(&self) -> &[u8] {
        self
    }

    #[inline(always)]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl Memory for Box<[u8]> {
    #[inline(always)]
    fn bytes(&self) -> &[u8] {
        self
    }

    #[inline(always)]
    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl<T: Memory + ?Sized> Memory for &mut T {
    #[inline(always)]
    fn bytes(&self) -> &[u8] {
        (**self).bytes()
    }

    #[inline(always)]
    fn bytes_mut(&mut self) -> &mut [u8] {
        (**self).bytes_mut()
    }
}
