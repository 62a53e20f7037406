//! The raw address space underneath the heap.
//!
//! ```text
//!   base                        base + brk              base + max
//!    |                              |                        |
//!    v                              v                        v
//!    +------------------------------+------------------------+
//!    |     bytes handed to the heap |   reserved, unused     |
//!    +------------------------------+------------------------+
//!                                   ---> grows, never shrinks
//! ```

use std::ptr::NonNull;

use crate::{error::HeapError, kernel, utils::checked_align};

/// Something that can hand out more bytes at the end of one contiguous region.
///
/// This mirrors the classic `sbrk` contract: the region only ever grows, every
/// successful [`HeapProvider::grow`] returns the old end of the region and the
/// new bytes start exactly there.
pub trait HeapProvider {
    /// Extends the region by `increment` bytes and returns the previous break.
    fn grow(&mut self, increment: usize) -> Result<NonNull<u8>, HeapError>;

    /// Bytes handed out so far.
    fn size(&self) -> usize;
}

/// Default provider. It reserves `max` bytes from the kernel once and then
/// works as a bump pointer over that reservation, so the heap stays
/// contiguous no matter what else the process maps.
pub struct MemLib {
    /// First byte of the reservation.
    base: NonNull<u8>,
    /// Offset of the current break from `base`.
    brk: usize,
    /// Size of the reservation.
    max: usize,
}

// The reservation is exclusively owned by the provider.
unsafe impl Send for MemLib {}

impl MemLib {
    /// Reserves `max_heap` bytes, rounded up to the page size.
    pub fn new(max_heap: usize) -> Result<Self, HeapError> {
        let max = checked_align(max_heap.max(1), kernel::page_size())
            .ok_or(HeapError::ReserveFailed { len: max_heap })?;

        let base = unsafe { kernel::request_memory(max) }
            .ok_or(HeapError::ReserveFailed { len: max })?;

        log::debug!("reserved {max} bytes at {base:?}");

        Ok(Self { base, brk: 0, max })
    }

    /// First byte of the region.
    #[inline]
    pub fn heap_lo(&self) -> NonNull<u8> {
        self.base
    }

    /// Bytes that can still be handed out.
    #[inline]
    pub fn available(&self) -> usize {
        self.max - self.brk
    }
}

impl HeapProvider for MemLib {
    fn grow(&mut self, increment: usize) -> Result<NonNull<u8>, HeapError> {
        if increment > self.available() {
            log::warn!(
                "provider exhausted: requested {increment} bytes, {} available",
                self.available()
            );

            return Err(HeapError::Exhausted {
                requested: increment,
                available: self.available(),
            });
        }

        // SAFETY: `brk <= max`, so the old break is inside the reservation
        // or one past its end.
        let old_brk = unsafe { self.base.add(self.brk) };
        self.brk += increment;

        Ok(old_brk)
    }

    #[inline]
    fn size(&self) -> usize {
        self.brk
    }
}

impl Drop for MemLib {
    fn drop(&mut self) {
        unsafe { kernel::return_memory(self.base, self.max) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_returns_old_break() {
        let mut memlib = MemLib::new(8192).unwrap();
        let lo = memlib.heap_lo();

        let first = memlib.grow(32).unwrap();
        let second = memlib.grow(64).unwrap();

        assert_eq!(first, lo);
        assert_eq!(second.as_ptr() as usize, lo.as_ptr() as usize + 32);
        assert_eq!(memlib.size(), 96);
    }

    #[test]
    fn reservation_is_page_aligned() {
        let memlib = MemLib::new(100).unwrap();

        assert_eq!(memlib.heap_lo().as_ptr() as usize % kernel::page_size(), 0);
        assert_eq!(memlib.available(), kernel::page_size());
    }

    #[test]
    fn unaligned_reservation_past_address_space_fails() {
        assert_eq!(
            MemLib::new(usize::MAX).err(),
            Some(HeapError::ReserveFailed { len: usize::MAX })
        );
    }

    #[test]
    fn exhaustion_leaves_break_untouched() {
        let mut memlib = MemLib::new(4096).unwrap();
        let max = memlib.available();

        memlib.grow(max - 16).unwrap();

        assert_eq!(
            memlib.grow(32),
            Err(HeapError::Exhausted { requested: 32, available: 16 })
        );
        assert_eq!(memlib.size(), max - 16);
        assert!(memlib.grow(16).is_ok());
    }
}
