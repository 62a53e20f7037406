use std::ptr::NonNull;

use crate::config::{ALIGNMENT, OVERHEAD, WORD_SIZE};

/// Size and allocation state of a block packed into one word. Sizes are
/// always multiples of [`ALIGNMENT`], so the low bits are free and the lowest
/// one holds the allocated flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Tag(usize);

impl Tag {
    /// Marks the end of the heap. Zero size, permanently allocated.
    pub const EPILOGUE: Tag = Tag::new(0, true);

    #[inline]
    pub const fn new(size: usize, allocated: bool) -> Self {
        Self(size | allocated as usize)
    }

    #[inline]
    pub const fn size(self) -> usize {
        self.0 & !(ALIGNMENT - 1)
    }

    #[inline]
    pub const fn is_allocated(self) -> bool {
        self.0 & 1 == 1
    }

    #[inline]
    pub const fn bits(self) -> usize {
        self.0
    }
}

/// Handle to a block, pointing at its payload. Every block carries the same
/// [`Tag`] right before and right after the payload:
///
/// ```text
///            +----------------------+
///            |   header (1 word)    |
///   ptr ---> +----------------------+ <------+
///            |                      |        |
///            |       Payload        |        | -> size - OVERHEAD bytes
///            |         ...          |        |
///            +----------------------+ <------+
///            |   footer (1 word)    |
///            +----------------------+
///            |  next block header   |
///            +----------------------+
/// ```
///
/// The footer is what makes walking backwards O(1): the word right before a
/// header is the footer of the previous block, which stores its size.
///
/// The handle itself is just an address. All accessors are `unsafe` because
/// the caller has to guarantee that the tags around it belong to a block of
/// the heap. Only the allocator creates these, from pointers it handed out
/// or from the boundary tags themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Block(NonNull<u8>);

impl Block {
    #[inline]
    pub const fn from_payload(payload: NonNull<u8>) -> Self {
        Self(payload)
    }

    #[inline]
    pub const fn payload(self) -> NonNull<u8> {
        self.0
    }

    #[inline]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline]
    unsafe fn word_at(self, offset: isize) -> *mut usize {
        unsafe { self.0.as_ptr().offset(offset).cast::<usize>() }
    }

    #[inline]
    pub unsafe fn header(self) -> Tag {
        unsafe { Tag(self.word_at(-(WORD_SIZE as isize)).read()) }
    }

    /// Reads the footer, located through the size stored in the header.
    #[inline]
    pub unsafe fn footer(self) -> Tag {
        unsafe {
            let offset = self.header().size() as isize - OVERHEAD as isize;
            Tag(self.word_at(offset).read())
        }
    }

    /// Footer of the block right before this one.
    #[inline]
    pub unsafe fn prev_footer(self) -> Tag {
        unsafe { Tag(self.word_at(-(OVERHEAD as isize)).read()) }
    }

    #[inline]
    pub unsafe fn size(self) -> usize {
        unsafe { self.header().size() }
    }

    #[inline]
    pub unsafe fn is_allocated(self) -> bool {
        unsafe { self.header().is_allocated() }
    }

    /// Bytes the client can use.
    #[inline]
    pub unsafe fn capacity(self) -> usize {
        unsafe { self.size() - OVERHEAD }
    }

    /// Writes only the header. Used for the epilogue, which has no footer.
    #[inline]
    pub unsafe fn set_header(self, tag: Tag) {
        unsafe { self.word_at(-(WORD_SIZE as isize)).write(tag.bits()) }
    }

    /// Writes both tags. The footer position is derived from `size`, not from
    /// whatever the header held before, so this also resizes the block.
    #[inline]
    pub unsafe fn set_tags(self, size: usize, allocated: bool) {
        let tag = Tag::new(size, allocated);

        unsafe {
            self.set_header(tag);
            self.word_at(size as isize - OVERHEAD as isize).write(tag.bits());
        }
    }

    /// Block that starts right after this one ends.
    #[inline]
    pub unsafe fn next(self) -> Block {
        unsafe {
            debug_assert_eq!(
                self.header(),
                self.footer(),
                "boundary tags of {:#x} disagree",
                self.addr()
            );

            Block(self.0.add(self.size()))
        }
    }

    /// Block that ends right before this one starts.
    #[inline]
    pub unsafe fn prev(self) -> Block {
        unsafe {
            let footer = self.prev_footer();
            let prev = Block(self.0.sub(footer.size()));

            debug_assert_eq!(
                prev.header(),
                footer,
                "boundary tags of {:#x} disagree",
                prev.addr()
            );

            prev
        }
    }
}
