use std::{marker::PhantomData, ptr::NonNull};

use crate::block::Block;

/// Optional link to another free block.
pub(crate) type Link = Option<FreeBlock>;

/// Links stored at the start of a free block's payload.
///
/// ```text
/// +------------------------+
/// |         header         |
/// +------------------------+ <--------+
/// | prev free block (Link) |          |
/// +------------------------+          | -> FreeLinks, only while free
/// | next free block (Link) |          |
/// +------------------------+ <--------+
/// |      Free Payload      |
/// |        (unused)        |
/// +------------------------+
/// |         footer         |
/// +------------------------+
/// ```
#[repr(C)]
struct FreeLinks {
    prev: Link,
    next: Link,
}

/// View of a [`Block`] that is known to be free, so its payload can be
/// reinterpreted as [`FreeLinks`]. The moment a block gets allocated those
/// bytes belong to the client again and this view must not be used anymore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct FreeBlock(Block);

impl FreeBlock {
    #[inline]
    pub fn block(self) -> Block {
        self.0
    }

    #[inline]
    fn links(self) -> NonNull<FreeLinks> {
        self.0.payload().cast()
    }

    #[inline]
    pub unsafe fn prev(self) -> Link {
        unsafe { self.links().as_ref().prev }
    }

    #[inline]
    pub unsafe fn next(self) -> Link {
        unsafe { self.links().as_ref().next }
    }

    #[inline]
    unsafe fn set_prev(self, prev: Link) {
        unsafe { (*self.links().as_ptr()).prev = prev }
    }

    #[inline]
    unsafe fn set_next(self, next: Link) {
        unsafe { (*self.links().as_ptr()).next = next }
    }
}

/// Doubly linked list of every free block in the heap, kept in ascending
/// address order.
///
/// The list itself owns no memory, all the links live inside the free
/// blocks. Inside of the heap it looks something like this:
///
/// ```text
///                     Next free block               Next free block
///                +---------------------+  +-------------------------------+
///                |                     |  |                               |
/// +----------+---|--+    +-------+    +|--|--+    +-------+    +-------+  |
/// | Prologue | Free | -> | Alloc | -> | Free | -> | Alloc | -> | Free  |<-+ ...
/// +----------+------+    +-------+    +------+    +-------+    +-------+
///               ^
///               +--- head
/// ```
///
/// Removal is O(1) because every entry knows both neighbours. Insertion and
/// search walk the list.
pub(crate) struct FreeList {
    head: Link,
    len: usize,
}

impl FreeList {
    /// Creates a new empty List
    pub const fn new() -> Self {
        Self { head: None, len: 0 }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn first(&self) -> Link {
        self.head
    }

    /// Links `block` in before the first entry at a higher address.
    ///
    /// **SAFETY**: `block` must be a free block of at least
    /// [`crate::config::MIN_BLOCK_SIZE`] bytes that is not already linked.
    pub unsafe fn insert(&mut self, block: Block) {
        let node = FreeBlock(block);
        let mut prev = None;
        let mut next = self.head;

        unsafe {
            while let Some(current) = next {
                if current > node {
                    break;
                }
                prev = Some(current);
                next = current.next();
            }

            node.set_prev(prev);
            node.set_next(next);

            match prev {
                Some(prev) => prev.set_next(Some(node)),
                None => self.head = Some(node),
            }

            if let Some(next) = next {
                next.set_prev(Some(node));
            }
        }

        self.len += 1;
    }

    /// Unlinks `block` using its own links, no search involved.
    ///
    /// **SAFETY**: `block` must currently be linked in this list.
    pub unsafe fn delete(&mut self, block: Block) {
        let node = FreeBlock(block);

        unsafe {
            let prev = node.prev();
            let next = node.next();

            match prev {
                Some(prev) => prev.set_next(next),
                None => self.head = next,
            }

            if let Some(next) = next {
                next.set_prev(prev);
            }
        }

        self.len -= 1;
    }

    /// First fit. Returns the first block, in address order, with at least
    /// `size` bytes.
    pub unsafe fn find_fit(&self, size: usize) -> Option<Block> {
        unsafe { self.iter().find(|block| block.size() >= size) }
    }

    /// Iterates the free blocks from the head.
    ///
    /// **SAFETY**: The links of every entry must be intact while iterating.
    pub unsafe fn iter(&self) -> Iter<'_> {
        Iter {
            current: self.head,
            marker: PhantomData,
        }
    }
}

pub(crate) struct Iter<'a> {
    current: Link,
    marker: PhantomData<&'a FreeList>,
}

impl Iterator for Iter<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;
        self.current = unsafe { node.next() };

        Some(node.block())
    }
}
