use std::{cmp::Ordering, ptr::NonNull};

use crate::{
    block::{Block, Tag},
    config::{ALIGNMENT, HeapConfig, MIN_BLOCK_SIZE, WORD_SIZE},
    error::HeapError,
    freelist::FreeList,
    memlib::{HeapProvider, MemLib},
    utils::{adjusted_size, align},
};

/// Explicit free list allocator over one contiguous, growing region.
///
/// The region always starts with a permanently allocated prologue and ends
/// with a permanently allocated, zero sized epilogue header. Every block in
/// between carries boundary tags (see [`Block`]), and every free block is
/// linked into the address ordered [`FreeList`].
///
/// ```text
/// +-----+-----+-----+--------+--------+--------+-----+-----+
/// | pad | P.h | P.f | block  | block  |  ...   | ... | E.h |
/// +-----+-----+-----+--------+--------+--------+-----+-----+
///             ^                                             ^
///          prologue                                        break
/// ```
///
/// Free blocks are merged with their neighbours on every deallocation and on
/// every heap growth, so no two free blocks are ever adjacent once a public
/// call returns.
///
/// The heap is single threaded. Wrap it in a lock to share it, see
/// [`crate::GlobalHeap`].
pub struct Heap<P: HeapProvider = MemLib> {
    pub(crate) provider: P,
    pub(crate) config: HeapConfig,
    pub(crate) free_list: FreeList,
    /// Payload pointer of the prologue block.
    pub(crate) prologue: Block,
}

// The heap exclusively owns every byte its provider handed out.
unsafe impl<P: HeapProvider + Send> Send for Heap<P> {}

impl Heap<MemLib> {
    /// Reserves `config.max_heap` bytes through [`MemLib`] and initializes a
    /// heap on top of them.
    pub fn new(config: HeapConfig) -> Result<Self, HeapError> {
        config.validate()?;
        let provider = MemLib::new(config.max_heap)?;

        Self::init(provider, config)
    }
}

impl<P: HeapProvider> Heap<P> {
    /// Lays down the sentinels and grows the heap by one chunk.
    ///
    /// The provider must hand out [`ALIGNMENT`] aligned regions.
    pub fn init(mut provider: P, config: HeapConfig) -> Result<Self, HeapError> {
        config.validate()?;

        let base = provider.grow(4 * WORD_SIZE)?;

        if base.as_ptr() as usize % ALIGNMENT != 0 {
            return Err(HeapError::Misaligned {
                addr: base.as_ptr() as usize,
            });
        }

        let prologue = unsafe {
            // Alignment padding
            base.cast::<usize>().write(0);

            let prologue = Block::from_payload(base.add(2 * WORD_SIZE));
            prologue.set_tags(ALIGNMENT, true);
            prologue.next().set_header(Tag::EPILOGUE);

            prologue
        };

        let mut heap = Self {
            provider,
            config,
            free_list: FreeList::new(),
            prologue,
        };

        heap.extend(heap.config.chunk_size)?;

        log::debug!(
            "heap initialized at {:?}, {} bytes",
            base,
            heap.provider.size()
        );

        heap.verify();

        Ok(heap)
    }

    /// Total bytes obtained from the provider.
    #[inline]
    pub fn heap_size(&self) -> usize {
        self.provider.size()
    }

    #[inline]
    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    #[inline]
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Grows the heap by at least `bytes` and returns the resulting free block,
    /// already merged with a free predecessor and linked in the free list.
    fn extend(&mut self, bytes: usize) -> Result<Block, HeapError> {
        let size = align(bytes, ALIGNMENT);
        let payload = self.provider.grow(size)?;

        log::debug!("heap extended by {size} bytes, now {} bytes", self.provider.size());

        unsafe {
            // The old epilogue header becomes the header of the new block.
            let block = Block::from_payload(payload);
            block.set_tags(size, false);
            block.next().set_header(Tag::EPILOGUE);

            Ok(self.coalesce(block))
        }
    }

    /// Bytes to ask from the provider when nothing in the free list fits.
    #[inline]
    fn extend_size(&self, asize: usize) -> usize {
        asize.max(self.config.chunk_size)
    }

    /// Allocates at least `size` bytes and returns a pointer aligned to
    /// [`ALIGNMENT`].
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, HeapError> {
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }

        let asize = adjusted_size(size).ok_or(HeapError::Exhausted {
            requested: size,
            available: 0,
        })?;

        let block = match unsafe { self.free_list.find_fit(asize) } {
            Some(block) => {
                log::trace!("allocate({size}): fit at {:#x}", block.addr());
                block
            }
            None => {
                log::trace!("allocate({size}): no fit, growing heap");
                self.extend(self.extend_size(asize))?
            }
        };

        let block = unsafe { self.place(block, asize) };
        self.verify();

        Ok(block.payload())
    }

    /// Takes `block` out of the free list and allocates its first `asize`
    /// bytes, splitting the rest off as a new free block when it is big
    /// enough to stand on its own.
    ///
    /// **SAFETY**: `block` must be linked in the free list and hold at least
    /// `asize` bytes.
    unsafe fn place(&mut self, block: Block, asize: usize) -> Block {
        unsafe {
            self.free_list.delete(block);
            block.set_tags(block.size(), true);

            if let Some(remainder) = self.split(block, asize) {
                self.free_list.insert(remainder);
            }
        }

        block
    }

    /// Shrinks the allocated `block` to `asize` bytes if what is left over
    /// can form a block, and returns the leftover. The leftover gets free
    /// tags but is not linked anywhere, that is up to the caller.
    unsafe fn split(&mut self, block: Block, asize: usize) -> Option<Block> {
        unsafe {
            let size = block.size();
            let remaining = size - asize;

            if remaining < MIN_BLOCK_SIZE {
                log::trace!("block {:#x} used whole ({size} bytes)", block.addr());
                return None;
            }

            block.set_tags(asize, true);
            let remainder = block.next();
            remainder.set_tags(remaining, false);

            log::trace!(
                "block {:#x} split into {asize} + {remaining} bytes",
                block.addr()
            );

            Some(remainder)
        }
    }

    /// Gives the block at `ptr` back to the heap.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`Heap::allocate`] or
    /// [`Heap::resize`] on this heap and must not have been freed since.
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) {
        unsafe {
            let block = Block::from_payload(ptr);
            log::trace!("deallocate({:#x}): {} bytes", block.addr(), block.size());

            block.set_tags(block.size(), false);
            self.coalesce(block);
        }

        self.verify();
    }

    /// Merges the free `block` with whichever neighbours are free and links
    /// the result into the free list. Returns the merged block.
    ///
    /// The sentinels are always allocated, so the neighbours of any block
    /// can be inspected without bounds checks.
    unsafe fn coalesce(&mut self, block: Block) -> Block {
        unsafe {
            let prev_allocated = block.prev_footer().is_allocated();
            let next = block.next();
            let next_allocated = next.is_allocated();
            let mut size = block.size();

            let merged = match (prev_allocated, next_allocated) {
                (true, true) => block,
                (true, false) => {
                    self.free_list.delete(next);
                    size += next.size();
                    block.set_tags(size, false);
                    block
                }
                (false, true) => {
                    let prev = block.prev();
                    self.free_list.delete(prev);
                    size += prev.size();
                    prev.set_tags(size, false);
                    prev
                }
                (false, false) => {
                    let prev = block.prev();
                    self.free_list.delete(prev);
                    self.free_list.delete(next);
                    size += prev.size() + next.size();
                    prev.set_tags(size, false);
                    prev
                }
            };

            self.free_list.insert(merged);

            merged
        }
    }

    /// Resizes the block at `ptr` so it holds at least `new_size` bytes,
    /// keeping the first `min(new_size, old capacity)` bytes of its content.
    ///
    /// Tries, in order: shrinking in place, growing in place by absorbing a
    /// free successor, moving to a free block that fits and moving to a newly
    /// grown part of the heap. If all of them fail the error is returned and
    /// `ptr` stays valid and untouched. A `new_size` of zero is rejected with
    /// [`HeapError::ZeroSize`], it does **not** free the block.
    ///
    /// # Safety
    ///
    /// Same as [`Heap::deallocate`]. On success `ptr` must not be used again
    /// unless it is the returned pointer.
    pub unsafe fn resize(
        &mut self,
        ptr: NonNull<u8>,
        new_size: usize,
    ) -> Result<NonNull<u8>, HeapError> {
        if new_size == 0 {
            return Err(HeapError::ZeroSize);
        }

        let asize = adjusted_size(new_size).ok_or(HeapError::Exhausted {
            requested: new_size,
            available: 0,
        })?;

        let block = Block::from_payload(ptr);

        let result = unsafe {
            match asize.cmp(&block.size()) {
                Ordering::Less => {
                    log::trace!("resize({:#x}, {new_size}): shrink in place", block.addr());
                    if let Some(remainder) = self.split(block, asize) {
                        // The successor may be free, keep them merged.
                        self.coalesce(remainder);
                    }
                    Ok(ptr)
                }
                Ordering::Equal => Ok(ptr),
                Ordering::Greater => self.grow_block(block, asize),
            }
        };

        self.verify();

        result
    }

    unsafe fn grow_block(&mut self, block: Block, asize: usize) -> Result<NonNull<u8>, HeapError> {
        unsafe {
            let size = block.size();
            let next = block.next();

            if !next.is_allocated() && next.size() >= asize - size {
                log::trace!(
                    "resize({:#x}): absorbing {} bytes from successor",
                    block.addr(),
                    next.size()
                );

                // The block never enters the free list here, so its payload
                // is left alone.
                self.free_list.delete(next);
                block.set_tags(size + next.size(), true);

                if let Some(remainder) = self.split(block, asize) {
                    self.free_list.insert(remainder);
                }

                return Ok(block.payload());
            }

            let target = match self.free_list.find_fit(asize) {
                Some(target) => target,
                None => self.extend(self.extend_size(asize))?,
            };

            let moved = self.place(target, asize);
            log::trace!("resize({:#x}): moved to {:#x}", block.addr(), moved.addr());

            block
                .payload()
                .copy_to_nonoverlapping(moved.payload(), block.capacity());

            block.set_tags(size, false);
            self.coalesce(block);

            Ok(moved.payload())
        }
    }

    /// Bytes the client can use in the block at `ptr`, at least the size
    /// requested for it.
    ///
    /// # Safety
    ///
    /// `ptr` must be a live allocation of this heap.
    pub unsafe fn usable_size(&self, ptr: NonNull<u8>) -> usize {
        unsafe { Block::from_payload(ptr).capacity() }
    }

    /// Runs the consistency checker when the config asks for it.
    #[inline]
    fn verify(&self) {
        if self.config.check_invariants {
            if let Err(corruption) = self.check() {
                panic!("heap invariant violated: {corruption}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CHUNK_SIZE, OVERHEAD, SENTINEL_OVERHEAD};

    fn heap() -> Heap {
        let _ = env_logger::builder().is_test(true).try_init();
        Heap::new(HeapConfig::default().max_heap(1 << 20).check_invariants(true)).unwrap()
    }

    fn free_sizes(heap: &Heap) -> Vec<usize> {
        heap.free_blocks().map(|info| info.size).collect()
    }

    fn fill(ptr: NonNull<u8>, len: usize, seed: u8) {
        for i in 0..len {
            unsafe { ptr.as_ptr().add(i).write(seed.wrapping_add(i as u8)) }
        }
    }

    fn assert_filled(ptr: NonNull<u8>, len: usize, seed: u8) {
        for i in 0..len {
            assert_eq!(unsafe { ptr.as_ptr().add(i).read() }, seed.wrapping_add(i as u8));
        }
    }

    #[test]
    fn init_leaves_one_free_chunk() {
        let heap = heap();

        assert_eq!(heap.heap_size(), SENTINEL_OVERHEAD + CHUNK_SIZE);
        assert_eq!(free_sizes(&heap), vec![CHUNK_SIZE]);
        assert!(heap.check().is_ok());
    }

    #[test]
    fn basic_alloc() {
        let mut heap = heap();

        let block = heap.allocate(std::mem::size_of::<u32>()).unwrap().cast::<u32>();

        unsafe {
            block.write(23);
            assert_eq!(23, block.read());
        }
    }

    #[test]
    fn payloads_are_aligned() {
        let mut heap = heap();

        for size in [1, 7, 16, 17, 33, 100, 1000] {
            let ptr = heap.allocate(size).unwrap();
            assert_eq!(ptr.as_ptr() as usize % ALIGNMENT, 0);
            assert!(unsafe { heap.usable_size(ptr) } >= size);
        }
    }

    #[test]
    fn zero_size_requests_are_rejected() {
        let mut heap = heap();
        let ptr = heap.allocate(8).unwrap();

        assert_eq!(heap.allocate(0), Err(HeapError::ZeroSize));
        assert_eq!(unsafe { heap.resize(ptr, 0) }, Err(HeapError::ZeroSize));

        // The block is still live.
        assert_eq!(heap.stats().allocated_blocks, 1);
        unsafe { heap.deallocate(ptr) };
        assert_eq!(heap.stats().allocated_blocks, 0);
    }

    #[test]
    fn first_allocation_splits_initial_chunk() {
        let mut heap = heap();

        let ptr = heap.allocate(100).unwrap();

        assert_eq!(heap.heap_size(), SENTINEL_OVERHEAD + CHUNK_SIZE);
        assert_eq!(free_sizes(&heap), vec![CHUNK_SIZE - 128]);
        assert_eq!(unsafe { heap.usable_size(ptr) }, 128 - OVERHEAD);
    }

    #[test]
    fn freed_block_is_reused() {
        let mut heap = heap();

        let first = heap.allocate(16).unwrap();
        unsafe { heap.deallocate(first) };
        let second = heap.allocate(16).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn space_for_free_block_is_used() {
        let mut heap = heap();

        let first = heap.allocate(4).unwrap();
        let _second = heap.allocate(8).unwrap();
        let _third = heap.allocate(8).unwrap();

        unsafe { heap.deallocate(first) };

        assert_eq!(heap.allocate(4).unwrap(), first);
    }

    #[test]
    fn adjacent_frees_merge() {
        let mut heap = heap();

        let a = heap.allocate(1024).unwrap();
        let b = heap.allocate(1024).unwrap();
        assert_eq!(b.as_ptr() as usize, a.as_ptr() as usize + 1040);

        unsafe {
            heap.deallocate(a);
            assert_eq!(free_sizes(&heap), vec![1040, CHUNK_SIZE - 2080]);

            heap.deallocate(b);
        }

        assert_eq!(free_sizes(&heap), vec![CHUNK_SIZE]);
        assert_eq!(heap.free_blocks().next().unwrap().addr, a);
    }

    #[test]
    fn coalesce_with_predecessor_only() {
        let mut heap = heap();

        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        let _guard = heap.allocate(64).unwrap();

        unsafe {
            heap.deallocate(a);
            heap.deallocate(b);
        }

        let first = heap.free_blocks().next().unwrap();
        assert_eq!(first.addr, a);
        assert_eq!(first.size, 160);
    }

    #[test]
    fn coalesce_with_successor_only() {
        let mut heap = heap();

        let a = heap.allocate(64).unwrap();
        let b = heap.allocate(64).unwrap();
        let _guard = heap.allocate(64).unwrap();

        unsafe {
            heap.deallocate(b);
            heap.deallocate(a);
        }

        let first = heap.free_blocks().next().unwrap();
        assert_eq!(first.addr, a);
        assert_eq!(first.size, 160);
    }

    #[test]
    fn free_list_is_address_ordered() {
        let mut heap = heap();

        let ptrs: Vec<_> = (0..6).map(|_| heap.allocate(32).unwrap()).collect();

        unsafe {
            heap.deallocate(ptrs[4]);
            heap.deallocate(ptrs[0]);
            heap.deallocate(ptrs[2]);
        }

        let listed: Vec<_> = heap.free_blocks().map(|info| info.addr).collect();
        assert_eq!(listed.len(), 4);
        assert_eq!(&listed[..3], &[ptrs[0], ptrs[2], ptrs[4]]);
        assert!(listed[3] > ptrs[5]);
    }

    #[test]
    fn reuse_without_growth() {
        let mut heap = heap();

        let batch: Vec<_> = (0..100).map(|_| heap.allocate(32).unwrap()).collect();
        let grown = heap.heap_size();
        assert!(grown > SENTINEL_OVERHEAD + CHUNK_SIZE);

        for ptr in batch {
            unsafe { heap.deallocate(ptr) };
        }
        assert_eq!(heap.free_blocks().count(), 1);

        for _ in 0..100 {
            heap.allocate(32).unwrap();
        }
        assert_eq!(heap.heap_size(), grown);
    }

    #[test]
    fn large_request_grows_by_request_size() {
        let mut heap = heap();

        let ptr = heap.allocate(3 * CHUNK_SIZE).unwrap();
        let asize = adjusted_size(3 * CHUNK_SIZE).unwrap();

        assert_eq!(heap.heap_size(), SENTINEL_OVERHEAD + CHUNK_SIZE + asize);
        // The new region merged with the initial free chunk before placing.
        assert_eq!(ptr, heap.blocks().next().unwrap().addr);
        assert_eq!(free_sizes(&heap), vec![CHUNK_SIZE]);
    }

    #[test]
    fn exhaustion_is_reported() {
        let config = HeapConfig::default().max_heap(8192).check_invariants(true);
        let mut heap = Heap::new(config).unwrap();
        let available = heap.provider().available();

        assert!(matches!(
            heap.allocate(available + CHUNK_SIZE),
            Err(HeapError::Exhausted { .. })
        ));
        assert!(matches!(heap.allocate(usize::MAX), Err(HeapError::Exhausted { .. })));

        // Still usable afterwards.
        assert!(heap.allocate(64).is_ok());
    }

    #[test]
    fn shrink_in_place_splits_remainder() {
        let mut heap = heap();

        let x = heap.allocate(64).unwrap();
        let _guard = heap.allocate(64).unwrap();
        fill(x, 64, 7);

        let shrunk = unsafe { heap.resize(x, 16) }.unwrap();

        assert_eq!(shrunk, x);
        assert_filled(x, 16, 7);

        let remainder = heap.free_blocks().next().unwrap();
        assert_eq!(remainder.addr.as_ptr() as usize, x.as_ptr() as usize + MIN_BLOCK_SIZE);
        assert_eq!(remainder.size, 80 - MIN_BLOCK_SIZE);
    }

    #[test]
    fn shrink_remainder_merges_with_free_successor() {
        let mut heap = heap();

        let x = heap.allocate(64).unwrap();
        unsafe { heap.resize(x, 16) }.unwrap();

        assert_eq!(free_sizes(&heap), vec![CHUNK_SIZE - MIN_BLOCK_SIZE]);
    }

    #[test]
    fn shrink_too_small_to_split_keeps_block() {
        let mut heap = heap();

        let x = heap.allocate(64).unwrap();
        let before = unsafe { heap.usable_size(x) };

        // 80 byte block, 64 needed: a 16 byte leftover cannot stand alone.
        assert_eq!(unsafe { heap.resize(x, 48) }, Ok(x));
        assert_eq!(unsafe { heap.usable_size(x) }, before);
    }

    #[test]
    fn equal_size_resize_is_noop() {
        let mut heap = heap();

        let x = heap.allocate(64).unwrap();
        let stats = heap.stats();

        assert_eq!(unsafe { heap.resize(x, 50) }, Ok(x));
        assert_eq!(heap.stats(), stats);
    }

    #[test]
    fn grow_in_place_absorbs_free_successor() {
        let mut heap = heap();

        let x = heap.allocate(64).unwrap();
        let y = heap.allocate(64).unwrap();
        fill(x, 64, 3);

        unsafe { heap.deallocate(y) };
        let grown = unsafe { heap.resize(x, 100) }.unwrap();

        assert_eq!(grown, x);
        assert_filled(x, 64, 3);
        assert_eq!(unsafe { heap.usable_size(x) }, 128 - OVERHEAD);
        assert_eq!(free_sizes(&heap), vec![CHUNK_SIZE - 128]);
    }

    #[test]
    fn grow_in_place_preserves_leading_words() {
        let mut heap = heap();

        let x = heap.allocate(16).unwrap();
        let y = heap.allocate(200).unwrap();
        let _guard = heap.allocate(16).unwrap();
        fill(x, 16, 0xC0);

        unsafe { heap.deallocate(y) };
        assert_eq!(unsafe { heap.resize(x, 64) }, Ok(x));

        assert_filled(x, 16, 0xC0);
    }

    #[test]
    fn grow_relocates_to_existing_fit() {
        let mut heap = heap();

        let hole = heap.allocate(256).unwrap();
        let _guard = heap.allocate(16).unwrap();
        let x = heap.allocate(32).unwrap();
        let _after = heap.allocate(16).unwrap();
        fill(x, 32, 11);

        unsafe { heap.deallocate(hole) };
        let moved = unsafe { heap.resize(x, 200) }.unwrap();

        assert_eq!(moved, hole);
        assert_filled(moved, 32, 11);
        // The old spot went back to the free list.
        assert!(heap.free_blocks().any(|info| info.addr == x));
    }

    #[test]
    fn grow_relocates_to_new_memory() {
        let mut heap = heap();

        let x = heap.allocate(64).unwrap();
        let _guard = heap.allocate(CHUNK_SIZE - 128).unwrap();
        fill(x, 64, 5);
        let before = heap.heap_size();

        let moved = unsafe { heap.resize(x, 2 * CHUNK_SIZE) }.unwrap();

        assert_ne!(moved, x);
        assert_filled(moved, 64, 5);
        assert!(heap.heap_size() > before);
    }

    #[test]
    fn failed_resize_keeps_original() {
        let config = HeapConfig::default().max_heap(8192).check_invariants(true);
        let mut heap = Heap::new(config).unwrap();

        let x = heap.allocate(64).unwrap();
        fill(x, 64, 9);
        let size = heap.heap_size();

        assert!(matches!(
            unsafe { heap.resize(x, 1 << 20) },
            Err(HeapError::Exhausted { .. })
        ));

        assert_eq!(heap.heap_size(), size);
        assert_filled(x, 64, 9);
        unsafe { heap.deallocate(x) };
    }

    #[test]
    fn misaligned_provider_is_rejected() {
        struct Offset(MemLib);

        impl HeapProvider for Offset {
            fn grow(&mut self, increment: usize) -> Result<NonNull<u8>, HeapError> {
                self.0.grow(increment).map(|ptr| unsafe { ptr.add(WORD_SIZE) })
            }

            fn size(&self) -> usize {
                self.0.size()
            }
        }

        let config = HeapConfig::default().max_heap(8192);
        let provider = Offset(MemLib::new(config.max_heap).unwrap());

        assert!(matches!(Heap::init(provider, config), Err(HeapError::Misaligned { .. })));
    }

    #[test]
    fn unreservable_max_heap_is_an_error() {
        let config = HeapConfig::default().max_heap(usize::MAX);

        assert!(matches!(Heap::new(config), Err(HeapError::ReserveFailed { .. })));
    }

    #[test]
    fn init_fails_without_room_for_first_chunk() {
        struct Tiny(MemLib, usize);

        impl HeapProvider for Tiny {
            fn grow(&mut self, increment: usize) -> Result<NonNull<u8>, HeapError> {
                if self.0.size() + increment > self.1 {
                    return Err(HeapError::Exhausted {
                        requested: increment,
                        available: self.1 - self.0.size(),
                    });
                }
                self.0.grow(increment)
            }

            fn size(&self) -> usize {
                self.0.size()
            }
        }

        let config = HeapConfig::default().max_heap(8192);
        let provider = Tiny(MemLib::new(config.max_heap).unwrap(), 64);

        assert!(matches!(Heap::init(provider, config), Err(HeapError::Exhausted { .. })));
    }
}
