//! Flat Page Table
//!
//! One table per address space, indexed directly by page number.
//!
//! # Entry States
//! - `Absent`: never backed
//! - `Present(frame)`: resident in a RAM frame
//! - `SwappedOut(slot)`: evicted to a swap slot
//!
//! Entries can be packed into a 32-bit word for dumps; see [`PteBits`].

use core::ops::{Index, IndexMut};

use alloc::vec;
use alloc::vec::Vec;
use bitflags::bitflags;

use super::address::{FrameNumber, PageNumber, SwapSlot, MAX_PAGES};

bitflags! {
    /// Flag bits of a packed page table entry.
    ///
    /// The bits below [`PteBits::INDEX_MASK`] hold the frame number when
    /// `PRESENT` is set, or the swap slot when `SWAPPED` is set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteBits: u32 {
        /// Page is resident in RAM.
        const PRESENT = 1 << 31;
        /// Page lives on the swap device.
        const SWAPPED = 1 << 30;
    }
}

impl PteBits {
    /// Mask of the frame / slot field.
    pub const INDEX_MASK: u32 = (1 << 30) - 1;
}

/// A single page table entry.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum PageTableEntry {
    /// The page has never been backed.
    #[default]
    Absent,
    /// The page is resident in the given frame.
    Present(FrameNumber),
    /// The page was evicted to the given swap slot.
    SwappedOut(SwapSlot),
}

impl PageTableEntry {
    /// Check if the entry is resident.
    #[inline]
    pub const fn is_present(self) -> bool {
        matches!(self, Self::Present(_))
    }

    /// Get the frame, if resident.
    #[inline]
    pub const fn frame(self) -> Option<FrameNumber> {
        match self {
            Self::Present(frame) => Some(frame),
            _ => None,
        }
    }

    /// Pack the entry into a 32-bit word.
    pub const fn to_raw(self) -> u32 {
        match self {
            Self::Absent => 0,
            Self::Present(frame) => {
                PteBits::PRESENT.bits() | (frame.index() as u32 & PteBits::INDEX_MASK)
            }
            Self::SwappedOut(slot) => {
                PteBits::SWAPPED.bits() | (slot.index() as u32 & PteBits::INDEX_MASK)
            }
        }
    }

    /// Unpack a 32-bit word. Words carrying neither flag are `Absent`.
    pub fn from_raw(raw: u32) -> Self {
        let flags = PteBits::from_bits_truncate(raw);
        let index = (raw & PteBits::INDEX_MASK) as usize;
        if flags.contains(PteBits::PRESENT) {
            Self::Present(FrameNumber::new(index))
        } else if flags.contains(PteBits::SWAPPED) {
            Self::SwappedOut(SwapSlot::new(index))
        } else {
            Self::Absent
        }
    }
}

impl core::fmt::Display for PageTableEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Absent => write!(f, "PTE(absent)"),
            Self::Present(frame) => write!(f, "PTE(frame={})", frame.index()),
            Self::SwappedOut(slot) => write!(f, "PTE(swap={})", slot.index()),
        }
    }
}

/// The flat page table of one address space.
pub struct PageTable {
    entries: Vec<PageTableEntry>,
}

impl PageTable {
    /// Create a page table with every entry absent.
    pub fn new() -> Self {
        Self {
            entries: vec![PageTableEntry::Absent; MAX_PAGES],
        }
    }

    /// Iterate over all non-absent entries with their page numbers.
    pub fn iter_mapped(&self) -> impl Iterator<Item = (PageNumber, PageTableEntry)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| **e != PageTableEntry::Absent)
            .filter_map(|(i, e)| PageNumber::new(i).map(|pgn| (pgn, *e)))
    }

    /// Reset every entry to absent.
    pub fn clear(&mut self) {
        self.entries.fill(PageTableEntry::Absent);
    }
}

impl Index<PageNumber> for PageTable {
    type Output = PageTableEntry;

    #[inline]
    fn index(&self, pgn: PageNumber) -> &Self::Output {
        &self.entries[pgn.index()]
    }
}

impl IndexMut<PageNumber> for PageTable {
    #[inline]
    fn index_mut(&mut self, pgn: PageNumber) -> &mut Self::Output {
        &mut self.entries[pgn.index()]
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for PageTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_map().entries(self.iter_mapped()).finish()
    }
}
