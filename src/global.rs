//! [`GlobalAlloc`] adapter, so a [`Heap`] can back `Box`, `Vec` and friends.
//!
//! ```rust,ignore
//! use tagheap::GlobalHeap;
//!
//! #[global_allocator]
//! static ALLOCATOR: GlobalHeap = GlobalHeap::new();
//! ```
//!
//! The heap is single threaded, so the whole heap sits behind one mutex and
//! every call is one critical section. The heap is created on first use with
//! the config given to [`GlobalHeap::with_config`].
//!
//! Do not install a logger that allocates while this is the process
//! allocator: the allocator logs while holding the lock, and the logger
//! allocating again would deadlock.

use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
    sync::Mutex,
};

use crate::{
    check::HeapStats,
    config::{ALIGNMENT, HeapConfig},
    heap::Heap,
};

pub struct GlobalHeap {
    config: HeapConfig,
    heap: Mutex<Option<Heap>>,
}

impl GlobalHeap {
    pub const fn new() -> Self {
        Self::with_config(HeapConfig::new())
    }

    pub const fn with_config(config: HeapConfig) -> Self {
        Self {
            config,
            heap: Mutex::new(None),
        }
    }

    /// Runs `f` with the heap locked, creating the heap if needed. Returns
    /// `None` if the heap cannot be created or the lock is poisoned.
    fn with_heap<T>(&self, f: impl FnOnce(&mut Heap) -> T) -> Option<T> {
        let mut guard = self.heap.lock().ok()?;

        if guard.is_none() {
            *guard = Some(Heap::new(self.config).ok()?);
        }

        guard.as_mut().map(f)
    }

    /// Snapshot of the underlying heap, `None` if it cannot be created.
    pub fn stats(&self) -> Option<HeapStats> {
        self.with_heap(|heap| heap.stats())
    }
}

impl Default for GlobalHeap {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for GlobalHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        self.with_heap(|heap| heap.allocate(layout.size()).ok())
            .flatten()
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(ptr) = NonNull::new(ptr) else {
            return;
        };

        self.with_heap(|heap| unsafe { heap.deallocate(ptr) });
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        let Some(ptr) = NonNull::new(ptr) else {
            return ptr::null_mut();
        };

        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        self.with_heap(|heap| unsafe { heap.resize(ptr, new_size) }.ok())
            .flatten()
            .map_or(ptr::null_mut(), NonNull::as_ptr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_realloc_dealloc() {
        let config = HeapConfig::new().max_heap(1 << 20).check_invariants(true);
        let allocator = GlobalHeap::with_config(config);

        unsafe {
            let layout = Layout::array::<u64>(4).unwrap();
            let ptr = allocator.alloc(layout);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % ALIGNMENT, 0);

            let values = ptr.cast::<u64>();
            for i in 0..4 {
                values.add(i).write(i as u64 * 10);
            }

            let grown = allocator.realloc(ptr, layout, 1024).cast::<u64>();
            assert!(!grown.is_null());
            for i in 0..4 {
                assert_eq!(grown.add(i).read(), i as u64 * 10);
            }

            allocator.dealloc(grown.cast(), Layout::array::<u8>(1024).unwrap());
        }
    }

    #[test]
    fn stats_track_global_allocations() {
        let allocator = GlobalHeap::with_config(HeapConfig::new().max_heap(1 << 20));
        let before = allocator.stats().unwrap();
        assert_eq!(before.allocated_blocks, 0);

        unsafe {
            let layout = Layout::array::<u8>(100).unwrap();
            let ptr = allocator.alloc(layout);

            let during = allocator.stats().unwrap();
            assert_eq!(during.allocated_blocks, 1);
            assert_eq!(during.allocated_bytes, 128);

            allocator.dealloc(ptr, layout);
        }

        assert_eq!(allocator.stats(), Some(before));
    }

    #[test]
    fn rejects_over_aligned_layouts() {
        let allocator = GlobalHeap::new();
        let layout = Layout::from_size_align(64, 4 * ALIGNMENT).unwrap();

        assert!(unsafe { allocator.alloc(layout) }.is_null());
    }

    #[test]
    fn failed_init_returns_null() {
        let allocator = GlobalHeap::with_config(HeapConfig::new().chunk_size(1));

        assert!(unsafe { allocator.alloc(Layout::new::<u64>()) }.is_null());
        assert_eq!(allocator.stats(), None);
    }
}
