//! Heap walking and the consistency checker.
//!
//! Nothing in here is needed to allocate. These are the tools used by the
//! tests and by [`crate::HeapConfig::check_invariants`] to make sure the
//! boundary tags and the free list still describe the same heap.

use std::ptr::NonNull;

use crate::{
    block::{Block, Tag},
    config::{ALIGNMENT, MIN_BLOCK_SIZE, SENTINEL_OVERHEAD, WORD_SIZE},
    error::Corruption,
    heap::Heap,
    memlib::HeapProvider,
};

/// What the boundary tags say about one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Payload address, the pointer handed to the client.
    pub addr: NonNull<u8>,
    /// Total size including header and footer.
    pub size: usize,
    pub allocated: bool,
}

impl BlockInfo {
    fn of(block: Block) -> Self {
        let tag = unsafe { block.header() };

        Self {
            addr: block.payload(),
            size: tag.size(),
            allocated: tag.is_allocated(),
        }
    }
}

/// Snapshot of the heap occupancy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeapStats {
    /// Bytes obtained from the provider, sentinels included.
    pub heap_size: usize,
    pub allocated_blocks: usize,
    pub allocated_bytes: usize,
    pub free_blocks: usize,
    pub free_bytes: usize,
    pub largest_free: usize,
}

/// Walks the blocks between the prologue and the epilogue.
struct Blocks {
    current: Block,
}

impl Iterator for Blocks {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.current;

        if unsafe { block.size() } == 0 {
            return None;
        }

        self.current = unsafe { block.next() };

        Some(block)
    }
}

impl<P: HeapProvider> Heap<P> {
    fn walk(&self) -> Blocks {
        Blocks {
            current: unsafe { self.prologue.next() },
        }
    }

    /// Every block in address order, sentinels excluded.
    pub fn blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.walk().map(BlockInfo::of)
    }

    /// Free blocks in free list order.
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        unsafe { self.free_list.iter() }.map(BlockInfo::of)
    }

    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            heap_size: self.heap_size(),
            ..HeapStats::default()
        };

        for info in self.blocks() {
            if info.allocated {
                stats.allocated_blocks += 1;
                stats.allocated_bytes += info.size;
            } else {
                stats.free_blocks += 1;
                stats.free_bytes += info.size;
                stats.largest_free = stats.largest_free.max(info.size);
            }
        }

        stats
    }

    /// Verifies every structural invariant of the heap:
    ///
    /// - Sentinels are intact and the epilogue sits right at the break.
    /// - Every block is aligned, big enough and its header equals its footer.
    /// - No two free blocks are adjacent.
    /// - The free list holds exactly the free blocks, in address order, with
    ///   symmetric links.
    /// - Blocks plus sentinels account for every byte of the heap.
    pub fn check(&self) -> Result<(), Corruption> {
        let heap_lo = self.prologue.addr() - 2 * WORD_SIZE;
        let heap_hi = heap_lo + self.heap_size();

        unsafe {
            let prologue = Tag::new(ALIGNMENT, true);
            if self.prologue.header() != prologue || self.prologue.footer() != prologue {
                return Err(Corruption::Prologue);
            }

            let mut free = 0;
            let mut accounted = SENTINEL_OVERHEAD;
            let mut prev_free: Option<Block> = None;
            let mut current = self.prologue.next();

            loop {
                let addr = current.addr();

                if addr > heap_hi {
                    return Err(Corruption::Epilogue { addr });
                }

                let header = current.header();
                if header.size() == 0 {
                    if header != Tag::EPILOGUE || addr != heap_hi {
                        return Err(Corruption::Epilogue { addr });
                    }
                    break;
                }

                if addr % ALIGNMENT != 0 {
                    return Err(Corruption::Misaligned { addr });
                }

                if header.size() < MIN_BLOCK_SIZE || addr + header.size() > heap_hi {
                    return Err(Corruption::BadSize { addr, size: header.size() });
                }

                let footer = current.footer();
                if header != footer {
                    return Err(Corruption::TagMismatch {
                        addr,
                        header: header.bits(),
                        footer: footer.bits(),
                    });
                }

                if header.is_allocated() {
                    prev_free = None;
                } else {
                    if let Some(prev) = prev_free {
                        return Err(Corruption::AdjacentFree {
                            first: prev.addr(),
                            second: addr,
                        });
                    }
                    prev_free = Some(current);
                    free += 1;
                }

                accounted += header.size();
                current = current.next();
            }

            if accounted != self.heap_size() {
                return Err(Corruption::Accounting {
                    accounted,
                    heap_size: self.heap_size(),
                });
            }

            self.check_free_list(heap_lo, heap_hi, free)
        }
    }

    unsafe fn check_free_list(
        &self,
        heap_lo: usize,
        heap_hi: usize,
        free: usize,
    ) -> Result<(), Corruption> {
        let mut listed = 0;
        let mut prev = None;
        let mut current = self.free_list.first();

        unsafe {
            while let Some(node) = current {
                let addr = node.block().addr();

                if addr <= heap_lo || addr >= heap_hi {
                    return Err(Corruption::OutOfBounds { addr });
                }

                if node.block().is_allocated() {
                    return Err(Corruption::AllocatedInFreeList { addr });
                }

                if node.prev() != prev {
                    return Err(Corruption::BrokenLink { addr });
                }

                if prev.is_some_and(|prev| prev >= node) {
                    return Err(Corruption::OutOfOrder { addr });
                }

                listed += 1;
                // A cycle would otherwise spin forever.
                if listed > free {
                    break;
                }

                prev = current;
                current = node.next();
            }
        }

        if listed != free || listed != self.free_list.len() {
            return Err(Corruption::FreeCount { listed, free });
        }

        Ok(())
    }
}
