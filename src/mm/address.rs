//! Simulated Address Types
//!
//! Type-safe wrappers for the numbers that flow through the memory
//! manager, so that a page number is never used as a frame number or a
//! swap slot by accident.
//!
//! # Layout
//! - Virtual addresses are `ADDRESS_BITS` wide
//! - The low `PAGE_SHIFT` bits are the in-page offset
//! - The remaining bits index the flat page table

use core::fmt;

/// Bits to shift for page number
pub const PAGE_SHIFT: usize = 8;
/// Page size (256 bytes)
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
/// Page size mask
pub const PAGE_MASK: usize = PAGE_SIZE - 1;

/// Width of a simulated virtual address.
pub const ADDRESS_BITS: usize = 22;

/// Number of entries in the flat page table.
pub const MAX_PAGES: usize = 1 << (ADDRESS_BITS - PAGE_SHIFT);

/// Round `size` up to the next page boundary.
///
/// Returns `None` if the rounded size does not fit a `usize`.
#[inline]
pub const fn checked_page_align_up(size: usize) -> Option<usize> {
    match size.checked_add(PAGE_MASK) {
        Some(sum) => Some(sum & !PAGE_MASK),
        None => None,
    }
}

/// A virtual address inside one address space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(usize);

impl VirtAddr {
    /// Create a new virtual address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Get the page this address falls in.
    ///
    /// Returns `None` if the page lies beyond the page table.
    #[inline]
    pub const fn page_number(self) -> Option<PageNumber> {
        PageNumber::new(self.0 >> PAGE_SHIFT)
    }

    /// Get the page offset (lowest `PAGE_SHIFT` bits).
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Add an offset to this address.
    ///
    /// Returns `None` on overflow.
    #[inline]
    pub const fn checked_add(self, offset: usize) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#08x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#08x}", self.0)
    }
}

/// A byte address inside the RAM pool.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(usize);

impl PhysAddr {
    /// Build the physical address of `offset` within `frame`.
    #[inline]
    pub const fn from_parts(frame: FrameNumber, offset: usize) -> Self {
        Self(frame.0 * PAGE_SIZE + offset)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Get the frame this address falls in.
    #[inline]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber(self.0 >> PAGE_SHIFT)
    }

    /// Get the offset inside the frame.
    #[inline]
    pub const fn frame_offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#08x})", self.0)
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#08x}", self.0)
    }
}

/// Index of a virtual page in the flat page table.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct PageNumber(usize);

impl PageNumber {
    /// Create a page number.
    ///
    /// Returns `None` if it does not fit the page table.
    #[inline]
    pub const fn new(pgn: usize) -> Option<Self> {
        if pgn < MAX_PAGES {
            Some(Self(pgn))
        } else {
            None
        }
    }

    /// Get the index value.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }

    /// First virtual address of this page.
    #[inline]
    pub const fn start_address(self) -> VirtAddr {
        VirtAddr(self.0 << PAGE_SHIFT)
    }
}

/// Index of a physical frame in the RAM pool.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct FrameNumber(usize);

impl FrameNumber {
    /// Create a frame number.
    #[inline]
    pub const fn new(fpn: usize) -> Self {
        Self(fpn)
    }

    /// Get the index value.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Index of a page-sized slot on the swap device.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct SwapSlot(usize);

impl SwapSlot {
    /// Create a swap slot index.
    #[inline]
    pub const fn new(slot: usize) -> Self {
        Self(slot)
    }

    /// Get the index value.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_split() {
        let addr = VirtAddr::new(0x1234);
        assert_eq!(addr.page_number().map(PageNumber::index), Some(0x12));
        assert_eq!(addr.page_offset(), 0x34);
        assert!(!addr.is_aligned());
        assert!(VirtAddr::new(0x1200).is_aligned());
    }

    #[test]
    fn test_page_alignment() {
        assert_eq!(checked_page_align_up(0), Some(0));
        assert_eq!(checked_page_align_up(1), Some(PAGE_SIZE));
        assert_eq!(checked_page_align_up(PAGE_SIZE), Some(PAGE_SIZE));
        assert_eq!(checked_page_align_up(PAGE_SIZE + 1), Some(2 * PAGE_SIZE));
        assert_eq!(checked_page_align_up(usize::MAX - PAGE_MASK), Some(usize::MAX - PAGE_MASK));
        assert_eq!(checked_page_align_up(usize::MAX - PAGE_MASK + 1), None);
        assert_eq!(checked_page_align_up(usize::MAX), None);
    }

    #[test]
    fn test_page_number_bounds() {
        assert!(PageNumber::new(MAX_PAGES - 1).is_some());
        assert!(PageNumber::new(MAX_PAGES).is_none());
        assert!(VirtAddr::new(MAX_PAGES * PAGE_SIZE).page_number().is_none());
    }

    #[test]
    fn test_phys_from_parts() {
        let phys = PhysAddr::from_parts(FrameNumber::new(3), 17);
        assert_eq!(phys.as_usize(), 3 * PAGE_SIZE + 17);
        assert_eq!(phys.frame_number(), FrameNumber::new(3));
        assert_eq!(phys.frame_offset(), 17);
    }
}
