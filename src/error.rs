use thiserror::Error;

/// Recoverable failures of the public heap API. None of them are fatal, the
/// caller decides what to do with a request that could not be served.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum HeapError {
    /// Zero byte allocate or resize request.
    #[error("Zero-sized request")]
    ZeroSize,

    /// The provider cannot grow the heap any further.
    #[error("Heap exhausted: requested {requested} bytes, {available} available")]
    Exhausted { requested: usize, available: usize },

    /// The platform refused to reserve the address space for the provider.
    #[error("Failed to reserve {len} bytes from the platform")]
    ReserveFailed { len: usize },

    /// The provider handed out a region that breaks payload alignment.
    #[error("Provider returned misaligned address {addr:#x}")]
    Misaligned { addr: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Structural problems found by [`crate::Heap::check`]. The allocator never
/// produces these on its own, they come from client misuse such as writing past
/// the end of a block or freeing a pointer twice.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum Corruption {
    #[error("Bad prologue block")]
    Prologue,

    #[error("Bad epilogue header at {addr:#x}")]
    Epilogue { addr: usize },

    #[error("Block {addr:#x}: header {header:#x} does not match footer {footer:#x}")]
    TagMismatch { addr: usize, header: usize, footer: usize },

    #[error("Block {addr:#x} payload is not aligned")]
    Misaligned { addr: usize },

    #[error("Block {addr:#x} has invalid size {size}")]
    BadSize { addr: usize, size: usize },

    #[error("Blocks {first:#x} and {second:#x} are adjacent and both free")]
    AdjacentFree { first: usize, second: usize },

    #[error("Allocated block {addr:#x} is linked in the free list")]
    AllocatedInFreeList { addr: usize },

    #[error("Free list entry {addr:#x} lies outside the heap")]
    OutOfBounds { addr: usize },

    #[error("Free list back link of {addr:#x} is broken")]
    BrokenLink { addr: usize },

    #[error("Free list is not in address order at {addr:#x}")]
    OutOfOrder { addr: usize },

    #[error("Free list holds {listed} blocks but the heap has {free} free blocks")]
    FreeCount { listed: usize, free: usize },

    #[error("Blocks account for {accounted} bytes but the heap is {heap_size} bytes")]
    Accounting { accounted: usize, heap_size: usize },
}
