//! Virtual Memory Areas
//!
//! An address space is divided into areas. Each area covers
//! `[vm_start, vm_end)`, grows upward through its break pointer `sbrk`,
//! and owns the free list of the bytes it has handed out and got back.
//!
//! # Invariants
//! - `vm_start <= sbrk <= vm_end` for every area
//! - Areas of one address space never overlap

use alloc::vec::Vec;

use log::{debug, warn};

use super::address::{checked_page_align_up, PageNumber, VirtAddr, MAX_PAGES, PAGE_SIZE};
use super::error::MmError;
use super::pager::Pager;
use super::region::{FreeList, Region};

/// Identifier of an area within its address space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Hash)]
#[repr(transparent)]
pub struct VmaId(u32);

impl VmaId {
    /// Create an area id.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the index value.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A snapshot of an area's bounds.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VmaInfo {
    /// Area id.
    pub id: VmaId,
    /// First byte of the area.
    pub vm_start: usize,
    /// One past the last byte of the area.
    pub vm_end: usize,
    /// Current break.
    pub sbrk: usize,
}

/// One virtual memory area.
#[derive(Debug)]
pub struct Vma {
    id: VmaId,
    vm_start: usize,
    vm_end: usize,
    sbrk: usize,
    free_list: FreeList,
}

impl Vma {
    /// Create an empty area whose break sits at `vm_start`.
    pub const fn new(id: VmaId, vm_start: usize) -> Self {
        Self {
            id,
            vm_start,
            vm_end: vm_start,
            sbrk: vm_start,
            free_list: FreeList::new(),
        }
    }

    /// Area id.
    #[inline]
    pub fn id(&self) -> VmaId {
        self.id
    }

    /// Bytes covered by the area.
    #[inline]
    pub fn range(&self) -> Region {
        Region::new(self.vm_start, self.vm_end)
    }

    /// Current break.
    #[inline]
    pub fn sbrk(&self) -> usize {
        self.sbrk
    }

    /// Bytes between `vm_start` and the break, i.e. everything that has
    /// been backed so far.
    #[inline]
    pub fn backed_bytes(&self) -> usize {
        self.sbrk - self.vm_start
    }

    /// Snapshot of the bounds.
    pub fn info(&self) -> VmaInfo {
        VmaInfo {
            id: self.id,
            vm_start: self.vm_start,
            vm_end: self.vm_end,
            sbrk: self.sbrk,
        }
    }

    /// The area's free list.
    #[inline]
    pub fn free_list(&self) -> &FreeList {
        &self.free_list
    }

    /// The area's free list, mutably.
    #[inline]
    pub fn free_list_mut(&mut self) -> &mut FreeList {
        &mut self.free_list
    }
}

/// All areas of one address space, indexed by id.
#[derive(Debug, Default)]
pub struct AreaMap {
    areas: Vec<Vma>,
}

impl AreaMap {
    /// Create a map with no areas.
    pub const fn new() -> Self {
        Self { areas: Vec::new() }
    }

    /// Create a map holding area 0, empty, at `vm_start`.
    pub fn with_initial(vm_start: usize) -> Self {
        Self {
            areas: alloc::vec![Vma::new(VmaId::new(0), vm_start)],
        }
    }

    /// Check whether `vaddr` lies below the break of some area.
    pub fn covers(&self, vaddr: VirtAddr) -> bool {
        let addr = vaddr.as_usize();
        self.areas
            .iter()
            .any(|a| a.vm_start <= addr && addr < a.sbrk)
    }

    /// Look up an area.
    #[inline]
    pub fn get(&self, id: VmaId) -> Option<&Vma> {
        self.areas.get(id.index())
    }

    /// Look up an area mutably.
    #[inline]
    pub fn get_mut(&mut self, id: VmaId) -> Option<&mut Vma> {
        self.areas.get_mut(id.index())
    }

    /// Iterate over all areas in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Vma> {
        self.areas.iter()
    }

    /// Add an empty area starting at `vm_start`.
    ///
    /// # Errors
    /// - [`MmError::InvalidRange`] if `vm_start` lies beyond the page table
    /// - [`MmError::Overlap`] if `vm_start` falls inside, or at the start
    ///   of, an existing area
    pub fn create(&mut self, vm_start: usize) -> Result<VmaId, MmError> {
        if vm_start >= MAX_PAGES * PAGE_SIZE {
            return Err(MmError::InvalidRange);
        }
        let clash = self.areas.iter().any(|a| {
            a.vm_start == vm_start || (a.vm_start <= vm_start && vm_start < a.vm_end)
        });
        if clash {
            return Err(MmError::Overlap);
        }

        let id = VmaId::new(self.areas.len() as u32);
        self.areas.push(Vma::new(id, vm_start));
        debug!("created area {} at {:#x}", id.index(), vm_start);
        Ok(id)
    }

    /// Check `candidate` against every area except `id` itself.
    ///
    /// # Errors
    /// [`MmError::Overlap`] on the first sibling that intersects.
    pub fn validate_overlap(&self, id: VmaId, candidate: &Region) -> Result<(), MmError> {
        // An empty sibling still owns its start address.
        let hit = self.areas.iter().filter(|a| a.id != id).any(|a| {
            a.range().overlaps(candidate)
                || (candidate.start <= a.vm_start && a.vm_start < candidate.end)
        });
        if hit {
            Err(MmError::Overlap)
        } else {
            Ok(())
        }
    }

    /// Move the break of area `id` up by `size` rounded to whole pages and
    /// back the new pages with frames.
    ///
    /// Returns the grown range `[old_sbrk, old_sbrk + increment)`. The
    /// caller decides what part of it is allocated and what goes on the
    /// free list.
    ///
    /// # Errors
    /// - [`MmError::InvalidArea`] if `id` names no area
    /// - [`MmError::InvalidRange`] for a zero-sized request
    /// - [`MmError::Overlap`] if the grown range hits a sibling area
    /// - [`MmError::BackingFailure`] if frames could not be provided; the
    ///   area and page table are left as they were
    pub fn grow(&mut self, id: VmaId, size: usize, pager: &mut Pager) -> Result<Region, MmError> {
        if size == 0 {
            return Err(MmError::InvalidRange);
        }
        let vma = self.get(id).ok_or(MmError::InvalidArea)?;
        let increment = checked_page_align_up(size).ok_or(MmError::BackingFailure)?;
        let old_sbrk = vma.sbrk;
        let old_end = vma.vm_end;

        let new_sbrk = old_sbrk
            .checked_add(increment)
            .ok_or(MmError::BackingFailure)?;
        let candidate = Region::new(old_sbrk, new_sbrk);
        self.validate_overlap(id, &candidate)?;

        let first = VirtAddr::new(old_sbrk).page_number();
        let last = VirtAddr::new(new_sbrk - 1).page_number();
        let (Some(first), Some(last)) = (first, last) else {
            warn!("area {}: growth to {:#x} leaves the address space", id.index(), new_sbrk);
            return Err(MmError::BackingFailure);
        };

        let vma = self.get_mut(id).ok_or(MmError::InvalidArea)?;
        vma.vm_end = old_end + increment;
        vma.sbrk = new_sbrk;

        let mut backed = Vec::new();
        for pgn in (first.index()..=last.index()).filter_map(PageNumber::new) {
            match pager.back_page(pgn) {
                Ok(true) => backed.push(pgn),
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        "area {}: backing page {} failed: {}",
                        id.index(),
                        pgn.index(),
                        err
                    );
                    for pgn in backed {
                        pager.unmap_page(pgn);
                    }
                    vma.vm_end = old_end;
                    vma.sbrk = old_sbrk;
                    return Err(MmError::BackingFailure);
                }
            }
        }

        debug!(
            "area {}: break {:#x} -> {:#x} ({} new pages)",
            id.index(),
            old_sbrk,
            new_sbrk,
            backed.len()
        );
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::memphy::MemPhy;
    use crate::mm::paging::PageTableEntry;
    use alloc::sync::Arc;

    fn setup(frames: usize, slots: usize) -> (AreaMap, Pager, Arc<MemPhy>) {
        let ram = Arc::new(MemPhy::with_frames(frames));
        let swap = Arc::new(MemPhy::with_frames(slots));
        let pager = Pager::new(ram.clone(), swap);
        let mut areas = AreaMap::new();
        areas.create(0).unwrap();
        (areas, pager, ram)
    }

    fn page(n: usize) -> PageNumber {
        PageNumber::new(n).unwrap()
    }

    #[test]
    fn test_create_assigns_sequential_ids() {
        let (mut areas, _, _) = setup(1, 1);
        assert_eq!(areas.create(0x1000), Ok(VmaId::new(1)));
        assert_eq!(areas.create(0x1000), Err(MmError::Overlap));
        assert_eq!(areas.create(MAX_PAGES * PAGE_SIZE), Err(MmError::InvalidRange));
        assert_eq!(areas.iter().count(), 2);
    }

    #[test]
    fn test_grow_rounds_to_pages_and_backs_them() {
        let (mut areas, mut pager, ram) = setup(4, 0);
        let id = VmaId::new(0);

        let grown = areas.grow(id, 300, &mut pager).unwrap();
        assert_eq!(grown, Region::new(0, 2 * PAGE_SIZE));

        let info = areas.get(id).unwrap().info();
        assert_eq!(info.sbrk, 2 * PAGE_SIZE);
        assert_eq!(info.vm_end, 2 * PAGE_SIZE);
        assert!(pager.entry(page(0)).is_present());
        assert!(pager.entry(page(1)).is_present());
        assert_eq!(ram.free_frames(), 2);
    }

    #[test]
    fn test_with_initial_and_covers() {
        let mut areas = AreaMap::with_initial(0);
        let mut pager = Pager::new(
            Arc::new(MemPhy::with_frames(2)),
            Arc::new(MemPhy::with_frames(0)),
        );
        assert_eq!(areas.get(VmaId::new(0)).map(Vma::id), Some(VmaId::new(0)));
        assert!(!areas.covers(VirtAddr::new(0)));

        areas.grow(VmaId::new(0), 10, &mut pager).unwrap();
        assert!(areas.covers(VirtAddr::new(0)));
        assert!(areas.covers(VirtAddr::new(PAGE_SIZE - 1)));
        assert!(!areas.covers(VirtAddr::new(PAGE_SIZE)));
    }

    #[test]
    fn test_grow_huge_request_fails_cleanly() {
        let (mut areas, mut pager, ram) = setup(2, 0);
        let id = VmaId::new(0);
        assert_eq!(areas.grow(id, usize::MAX, &mut pager), Err(MmError::BackingFailure));
        assert_eq!(
            areas.grow(id, usize::MAX - PAGE_SIZE + 1, &mut pager),
            Err(MmError::BackingFailure)
        );
        let info = areas.get(id).unwrap().info();
        assert_eq!((info.sbrk, info.vm_end), (0, 0));
        assert_eq!(ram.free_frames(), 2);
    }

    #[test]
    fn test_grow_zero_size_rejected() {
        let (mut areas, mut pager, _) = setup(1, 0);
        assert_eq!(areas.grow(VmaId::new(0), 0, &mut pager), Err(MmError::InvalidRange));
        assert_eq!(areas.grow(VmaId::new(9), 1, &mut pager), Err(MmError::InvalidArea));
    }

    #[test]
    fn test_grow_into_sibling_is_overlap() {
        let (mut areas, mut pager, ram) = setup(8, 0);
        let low = VmaId::new(0);
        areas.create(2 * PAGE_SIZE).unwrap();

        areas.grow(low, PAGE_SIZE, &mut pager).unwrap();
        areas.grow(low, PAGE_SIZE, &mut pager).unwrap();
        assert_eq!(areas.grow(low, 1, &mut pager), Err(MmError::Overlap));

        // Nothing moved on failure.
        assert_eq!(areas.get(low).unwrap().sbrk(), 2 * PAGE_SIZE);
        assert_eq!(ram.free_frames(), 6);
    }

    #[test]
    fn test_validate_overlap_ignores_self() {
        let (mut areas, mut pager, _) = setup(2, 0);
        let id = VmaId::new(0);
        areas.grow(id, PAGE_SIZE, &mut pager).unwrap();
        assert!(areas
            .validate_overlap(id, &Region::new(0, PAGE_SIZE))
            .is_ok());
        let other = areas.create(4 * PAGE_SIZE).unwrap();
        assert_eq!(
            areas.validate_overlap(other, &Region::new(0, 1)),
            Err(MmError::Overlap)
        );
    }

    #[test]
    fn test_backing_failure_rolls_back() {
        // One frame and no swap: the second page cannot be backed.
        let (mut areas, mut pager, ram) = setup(1, 0);
        let id = VmaId::new(0);

        assert_eq!(
            areas.grow(id, 2 * PAGE_SIZE, &mut pager),
            Err(MmError::BackingFailure)
        );
        let info = areas.get(id).unwrap().info();
        assert_eq!((info.sbrk, info.vm_end), (0, 0));
        assert_eq!(pager.entry(page(0)), PageTableEntry::Absent);
        assert!(pager.resident_pages().is_empty());
        assert_eq!(ram.free_frames(), 1);
    }

    #[test]
    fn test_grow_from_unaligned_break_skips_backed_page() {
        let ram = Arc::new(MemPhy::with_frames(4));
        let swap = Arc::new(MemPhy::with_frames(0));
        let mut pager = Pager::new(ram.clone(), swap);
        let mut areas = AreaMap::new();
        let id = areas.create(10).unwrap();

        let first = areas.grow(id, 20, &mut pager).unwrap();
        assert_eq!(first, Region::new(10, 10 + PAGE_SIZE));
        assert_eq!(ram.free_frames(), 2);

        // Page 1 was backed by the first call; only page 2 is new.
        let second = areas.grow(id, 1, &mut pager).unwrap();
        assert_eq!(second, Region::new(10 + PAGE_SIZE, 10 + 2 * PAGE_SIZE));
        assert!(pager.entry(page(2)).is_present());
        assert_eq!(ram.free_frames(), 1);
    }
}
