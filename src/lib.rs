//! # tagheap
//!
//! A dynamic memory allocator over a single growable heap region, using an
//! explicit free list with first-fit placement and immediate coalescing.
//!
//! ```text
//!   Allocated block                    Free block
//!   +----------------------+           +----------------------+
//!   | header: size | 1     |           | header: size | 0     |
//!   +----------------------+           +----------------------+
//!   |                      |           | prev free block      |
//!   |       payload        |           | next free block      |
//!   |                      |           | (unused)             |
//!   +----------------------+           +----------------------+
//!   | footer: size | 1     |           | footer: size | 0     |
//!   +----------------------+           +----------------------+
//! ```
//!
//! - Every block is tagged at both ends, so both neighbours of a block can be
//!   found in O(1).
//! - Free blocks store the free list links in their own payload.
//! - Allocation takes the first free block that fits and splits off what is
//!   left. When nothing fits the heap grows by at least one chunk.
//! - Freeing merges the block with any free neighbour right away, so two free
//!   blocks are never adjacent.
//! - Resizing shrinks in place, grows in place into a free successor, or moves.
//!
//! The heap gets its bytes from a [`HeapProvider`], a primitive that can only
//! grow one contiguous region, like `sbrk`. [`MemLib`] provides one on top of a
//! single `mmap`/`VirtualAlloc` reservation.
//!
//! ## Quick Start
//!
//! ```rust
//! use tagheap::{Heap, HeapConfig};
//!
//! let mut heap = Heap::new(HeapConfig::default()).unwrap();
//!
//! let ptr = heap.allocate(100).unwrap();
//! unsafe {
//!     ptr.as_ptr().write_bytes(7, 100);
//!
//!     let ptr = heap.resize(ptr, 300).unwrap();
//!     assert_eq!(*ptr.as_ptr().add(99), 7);
//!
//!     heap.deallocate(ptr);
//! }
//!
//! assert!(heap.check().is_ok());
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded**: wrap it in a lock to share it, see [`GlobalHeap`].
//! - **Only grows**: memory is never given back to the provider.
//! - **No overrun detection**: writing past a block or freeing twice corrupts
//!   the heap. [`Heap::check`] can find the damage afterwards.

mod block;
mod check;
mod config;
mod error;
mod freelist;
mod global;
mod heap;
mod kernel;
mod memlib;
mod utils;

pub use check::{BlockInfo, HeapStats};
pub use config::{
    ALIGNMENT, CHUNK_SIZE, HeapConfig, MAX_HEAP, MIN_BLOCK_SIZE, OVERHEAD, WORD_SIZE,
};
pub use error::{Corruption, HeapError};
pub use global::GlobalHeap;
pub use heap::Heap;
pub use memlib::{HeapProvider, MemLib};
