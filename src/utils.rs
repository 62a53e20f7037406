//! Size arithmetic shared by the allocation and resize paths.

use crate::config::{ALIGNMENT, MIN_BLOCK_SIZE, OVERHEAD};

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// Used to round block sizes up to [`ALIGNMENT`] and the provider reservation
/// up to the computer's page size.
#[inline]
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Same as [`align`], but returns `None` instead of wrapping past `usize::MAX`.
#[inline]
pub fn checked_align(to_be_aligned: usize, aligment: usize) -> Option<usize> {
    to_be_aligned
        .checked_add(aligment - 1)
        .map(|padded| padded & !(aligment - 1))
}

/// Total block size needed to hand out `size` payload bytes.
///
/// Requests of at most one alignment unit get the fixed [`MIN_BLOCK_SIZE`],
/// which is what lets a freed block hold both free list links. Anything bigger
/// pays the header + footer overhead and is rounded up to [`ALIGNMENT`].
///
/// Returns `None` when the result does not fit in a `usize`.
#[inline]
pub fn adjusted_size(size: usize) -> Option<usize> {
    if size <= ALIGNMENT {
        return Some(MIN_BLOCK_SIZE);
    }

    size.checked_add(OVERHEAD + ALIGNMENT - 1)
        .map(|padded| padded & !(ALIGNMENT - 1))
}
