//! Layout constants and runtime knobs of a [`crate::Heap`].

use std::mem;

use crate::error::HeapError;

/// Size of a boundary tag. Headers and footers are one machine word each.
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// Every payload handed out is aligned to two words.
pub const ALIGNMENT: usize = 2 * WORD_SIZE;

/// Bytes taken by the header and footer of every block.
pub const OVERHEAD: usize = 2 * WORD_SIZE;

/// Smallest block we can carve. A free block has to fit its header, its
/// footer and the two free list links stored in the payload.
pub const MIN_BLOCK_SIZE: usize = 2 * ALIGNMENT;

/// Default number of bytes requested from the provider when no free block fits.
pub const CHUNK_SIZE: usize = 1 << 12;

/// Default size of the address space reserved by [`crate::MemLib`].
pub const MAX_HEAP: usize = 20 * (1 << 20);

/// Bytes requested by initialization: alignment padding, prologue header,
/// prologue footer and the epilogue header. None of it is ever handed out.
pub const SENTINEL_OVERHEAD: usize = 4 * WORD_SIZE;

/// Tunables for a single heap instance.
///
/// ```rust
/// use tagheap::HeapConfig;
///
/// let config = HeapConfig::default()
///     .chunk_size(8192)
///     .max_heap(1 << 20)
///     .check_invariants(true);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapConfig {
    /// Minimum number of bytes the heap grows by.
    pub chunk_size: usize,
    /// Address space reserved by the default provider.
    pub max_heap: usize,
    /// Run [`crate::Heap::check`] after every public call and panic on
    /// corruption. Meant for tests and debugging, it makes every call O(n).
    pub check_invariants: bool,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_heap: MAX_HEAP,
            check_invariants: false,
        }
    }
}

impl HeapConfig {
    pub const fn new() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            max_heap: MAX_HEAP,
            check_invariants: false,
        }
    }

    pub const fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub const fn max_heap(mut self, max_heap: usize) -> Self {
        self.max_heap = max_heap;
        self
    }

    pub const fn check_invariants(mut self, enabled: bool) -> Self {
        self.check_invariants = enabled;
        self
    }

    /// Rejects configurations that would break the block layout.
    pub fn validate(&self) -> Result<(), HeapError> {
        if self.chunk_size < MIN_BLOCK_SIZE {
            return Err(HeapError::InvalidConfig("chunk size below minimum block size"));
        }

        if self.chunk_size % ALIGNMENT != 0 {
            return Err(HeapError::InvalidConfig("chunk size is not a multiple of the alignment"));
        }

        match SENTINEL_OVERHEAD.checked_add(self.chunk_size) {
            Some(min_heap) if self.max_heap >= min_heap => Ok(()),
            _ => Err(HeapError::InvalidConfig(
                "max heap cannot hold the sentinels and one chunk",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_constants() {
        assert_eq!(ALIGNMENT, 2 * WORD_SIZE);
        assert_eq!(MIN_BLOCK_SIZE, OVERHEAD + 2 * mem::size_of::<*mut u8>());
        assert_eq!(CHUNK_SIZE % ALIGNMENT, 0);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(HeapConfig::default().validate().is_ok());
        assert_eq!(HeapConfig::default(), HeapConfig::new());
    }

    #[test]
    fn rejects_bad_chunk_sizes() {
        let tiny = HeapConfig::default().chunk_size(ALIGNMENT);
        assert!(matches!(tiny.validate(), Err(HeapError::InvalidConfig(_))));

        let unaligned = HeapConfig::default().chunk_size(CHUNK_SIZE + 1);
        assert!(matches!(unaligned.validate(), Err(HeapError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_heap_smaller_than_one_chunk() {
        let config = HeapConfig::default().max_heap(CHUNK_SIZE);
        assert!(matches!(config.validate(), Err(HeapError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_chunk_that_overflows_with_sentinels() {
        let config = HeapConfig::default()
            .chunk_size(usize::MAX & !(ALIGNMENT - 1))
            .max_heap(usize::MAX);
        assert!(matches!(config.validate(), Err(HeapError::InvalidConfig(_))));

        let config = HeapConfig::default().chunk_size(usize::MAX & !(ALIGNMENT - 1));
        assert!(matches!(config.validate(), Err(HeapError::InvalidConfig(_))));
    }
}
