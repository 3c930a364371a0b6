//! Memory Manager Errors
//!
//! Every fallible operation in the crate reports one of these kinds.
//! Errors are plain values: nothing is thrown, nothing is ignored.

/// Error type for memory manager operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmError {
    /// A region with `start >= end`, a zero-sized request, or a range that
    /// overlaps memory already on the free list.
    InvalidRange,
    /// The area id does not name a VMA of this address space.
    InvalidArea,
    /// The region id is outside the symbol table or names nothing.
    InvalidRegionId,
    /// The virtual address lies beyond the page table.
    InvalidAddress,
    /// No free region has exactly the requested bounds.
    NotFound,
    /// No free region is large enough.
    NoFit,
    /// Growing the area would overlap a sibling area.
    Overlap,
    /// Frames for a grown range could not be provided.
    BackingFailure,
    /// Allocation could be satisfied neither from the free list nor by growth.
    GrowthFailed,
    /// A victim page was needed but nothing is resident.
    NoVictim,
    /// A page fault could not be serviced.
    PageFaultFailure,
    /// The RAM pool has no free frame.
    OutOfMemory,
    /// The swap device has no free slot.
    OutOfSwap,
}

impl core::fmt::Display for MmError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidRange => write!(f, "invalid region bounds"),
            Self::InvalidArea => write!(f, "invalid memory area"),
            Self::InvalidRegionId => write!(f, "invalid region id"),
            Self::InvalidAddress => write!(f, "virtual address out of range"),
            Self::NotFound => write!(f, "free region not found"),
            Self::NoFit => write!(f, "no free region large enough"),
            Self::Overlap => write!(f, "area growth overlaps another area"),
            Self::BackingFailure => write!(f, "could not back area with frames"),
            Self::GrowthFailed => write!(f, "area growth failed"),
            Self::NoVictim => write!(f, "no resident page to evict"),
            Self::PageFaultFailure => write!(f, "page fault could not be serviced"),
            Self::OutOfMemory => write!(f, "out of physical frames"),
            Self::OutOfSwap => write!(f, "out of swap slots"),
        }
    }
}
