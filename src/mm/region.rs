//! Byte Regions and the Free-Region List
//!
//! A [`Region`] is a half-open byte range `[start, end)` inside one
//! address space. A [`FreeList`] keeps the free regions of one memory
//! area.
//!
//! # Invariants
//! - Entries are sorted by `start`
//! - Entries never overlap
//! - No two entries touch (`a.end == b.start` is always merged)

use alloc::vec::Vec;

use super::error::MmError;

/// A half-open byte range `[start, end)`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct Region {
    /// First byte of the range.
    pub start: usize,
    /// One past the last byte of the range.
    pub end: usize,
}

impl Region {
    /// The empty range, used for cleared symbol slots.
    pub const EMPTY: Self = Self { start: 0, end: 0 };

    /// Create a region. No validation is done here; the free list checks
    /// bounds on insertion.
    #[inline]
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered.
    #[inline]
    pub const fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    /// Check if the region covers no bytes.
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Half-open interval overlap test.
    #[inline]
    pub const fn overlaps(&self, other: &Region) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl core::fmt::Display for Region {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}

/// Address-ordered list of free regions with neighbour coalescing.
///
/// An empty list stands for "no free regions yet"; the first insertion
/// becomes its only entry.
#[derive(Debug, Default, Clone)]
pub struct FreeList {
    regions: Vec<Region>,
}

impl FreeList {
    /// Create an empty free list.
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Insert a free region, merging it with adjacent neighbours.
    ///
    /// # Errors
    /// [`MmError::InvalidRange`] if `start >= end` or the region overlaps
    /// a range that is already free (double free).
    pub fn insert(&mut self, region: Region) -> Result<(), MmError> {
        if region.is_empty() {
            return Err(MmError::InvalidRange);
        }

        // First entry starting at or after the new region.
        let idx = self.regions.partition_point(|r| r.start < region.start);

        if idx > 0 && self.regions[idx - 1].end > region.start {
            return Err(MmError::InvalidRange);
        }
        if idx < self.regions.len() && self.regions[idx].start < region.end {
            return Err(MmError::InvalidRange);
        }

        let merge_prev = idx > 0 && self.regions[idx - 1].end == region.start;
        let merge_next = idx < self.regions.len() && self.regions[idx].start == region.end;

        match (merge_prev, merge_next) {
            (true, true) => {
                let succ = self.regions.remove(idx);
                self.regions[idx - 1].end = succ.end;
            }
            (true, false) => self.regions[idx - 1].end = region.end,
            (false, true) => self.regions[idx].start = region.start,
            (false, false) => self.regions.insert(idx, region),
        }
        Ok(())
    }

    /// Remove the entry whose bounds equal `region` exactly.
    ///
    /// # Errors
    /// [`MmError::NotFound`] if no entry matches.
    pub fn remove_exact(&mut self, region: Region) -> Result<(), MmError> {
        let idx = self
            .regions
            .iter()
            .position(|r| *r == region)
            .ok_or(MmError::NotFound)?;
        self.regions.remove(idx);
        Ok(())
    }

    /// First-fit search: carve `size` bytes off the start of the first
    /// entry that is large enough. The remainder stays on the list.
    ///
    /// # Errors
    /// - [`MmError::InvalidRange`] for a zero-sized request
    /// - [`MmError::NoFit`] if no entry is large enough
    pub fn first_fit(&mut self, size: usize) -> Result<Region, MmError> {
        if size == 0 {
            return Err(MmError::InvalidRange);
        }

        let found = *self
            .regions
            .iter()
            .find(|r| r.len() >= size)
            .ok_or(MmError::NoFit)?;

        let allocated = Region::new(found.start, found.start + size);
        self.remove_exact(found)?;
        if found.end > allocated.end {
            self.insert(Region::new(allocated.end, found.end))?;
        }
        Ok(allocated)
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Check if nothing is free.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Total free bytes.
    pub fn free_bytes(&self) -> usize {
        self.regions.iter().map(Region::len).sum()
    }

    /// Iterate over the free regions in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Region> {
        self.regions.iter()
    }

    /// Copy the entries out.
    pub fn to_vec(&self) -> Vec<Region> {
        self.regions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn list_of(regions: &[(usize, usize)]) -> FreeList {
        let mut list = FreeList::new();
        for &(start, end) in regions {
            list.insert(Region::new(start, end)).unwrap();
        }
        list
    }

    fn assert_closed(list: &FreeList) {
        let v = list.to_vec();
        for pair in v.windows(2) {
            assert!(pair[0].end < pair[1].start, "uncoalesced or unsorted: {:?}", v);
        }
    }

    #[test]
    fn test_insert_rejects_empty_range() {
        let mut list = FreeList::new();
        assert_eq!(list.insert(Region::new(5, 5)), Err(MmError::InvalidRange));
        assert_eq!(list.insert(Region::new(6, 5)), Err(MmError::InvalidRange));
        assert!(list.is_empty());
    }

    #[test]
    fn test_first_insert_replaces_empty_head() {
        let list = list_of(&[(40, 80)]);
        assert_eq!(list.to_vec(), vec![Region::new(40, 80)]);
    }

    #[test]
    fn test_insert_keeps_order() {
        let list = list_of(&[(50, 60), (10, 20), (30, 40)]);
        assert_eq!(
            list.to_vec(),
            vec![Region::new(10, 20), Region::new(30, 40), Region::new(50, 60)]
        );
    }

    #[test]
    fn test_coalesce_predecessor() {
        let list = list_of(&[(0, 10), (10, 20)]);
        assert_eq!(list.to_vec(), vec![Region::new(0, 20)]);
    }

    #[test]
    fn test_coalesce_successor() {
        let list = list_of(&[(10, 20), (0, 10)]);
        assert_eq!(list.to_vec(), vec![Region::new(0, 20)]);
    }

    #[test]
    fn test_coalesce_both() {
        let list = list_of(&[(0, 10), (20, 30), (10, 20)]);
        assert_eq!(list.to_vec(), vec![Region::new(0, 30)]);
    }

    #[test]
    fn test_double_free_rejected() {
        let mut list = list_of(&[(0, 10), (20, 30)]);
        assert_eq!(list.insert(Region::new(5, 15)), Err(MmError::InvalidRange));
        assert_eq!(list.insert(Region::new(20, 25)), Err(MmError::InvalidRange));
        assert_eq!(list.insert(Region::new(15, 21)), Err(MmError::InvalidRange));
        assert_eq!(list.to_vec(), vec![Region::new(0, 10), Region::new(20, 30)]);
    }

    #[test]
    fn test_remove_exact() {
        let mut list = list_of(&[(0, 10), (20, 30)]);
        assert_eq!(list.remove_exact(Region::new(0, 5)), Err(MmError::NotFound));
        list.remove_exact(Region::new(20, 30)).unwrap();
        assert_eq!(list.to_vec(), vec![Region::new(0, 10)]);
        list.remove_exact(Region::new(0, 10)).unwrap();
        assert!(list.is_empty());
    }

    #[test]
    fn test_first_fit_split_and_scenario() {
        let mut list = list_of(&[(0, 100)]);

        let a = list.first_fit(30).unwrap();
        assert_eq!(a, Region::new(0, 30));
        assert_eq!(list.to_vec(), vec![Region::new(30, 100)]);

        let b = list.first_fit(20).unwrap();
        assert_eq!(b, Region::new(30, 50));
        assert_eq!(list.to_vec(), vec![Region::new(50, 100)]);

        // Give back the first 20 bytes of `a`: a gap remains at 20..50.
        list.insert(Region::new(0, 20)).unwrap();
        assert_eq!(list.to_vec(), vec![Region::new(0, 20), Region::new(50, 100)]);

        assert_eq!(list.first_fit(51), Err(MmError::NoFit));
        assert_eq!(list.free_bytes(), 70);
    }

    #[test]
    fn test_first_fit_takes_lowest_fitting() {
        let mut list = list_of(&[(0, 8), (16, 48), (64, 128)]);
        assert_eq!(list.first_fit(16).unwrap(), Region::new(16, 32));
        assert_eq!(list.first_fit(8).unwrap(), Region::new(0, 8));
        assert_eq!(list.first_fit(16).unwrap(), Region::new(32, 48));
        assert_eq!(list.to_vec(), vec![Region::new(64, 128)]);
    }

    #[test]
    fn test_first_fit_exact_consumes_entry() {
        let mut list = list_of(&[(0, 16)]);
        assert_eq!(list.first_fit(16).unwrap(), Region::new(0, 16));
        assert!(list.is_empty());
        assert_eq!(list.first_fit(0), Err(MmError::InvalidRange));
    }

    #[test]
    fn test_coalescing_closure_any_free_order() {
        // Carve 8 blocks of 10 bytes and give them back in a scrambled order.
        let order = [5usize, 0, 7, 2, 6, 1, 3, 4];
        let mut list = list_of(&[(0, 80)]);
        let blocks: Vec<Region> = (0..8).map(|_| list.first_fit(10).unwrap()).collect();
        assert!(list.is_empty());

        for &i in &order {
            list.insert(blocks[i]).unwrap();
            assert_closed(&list);
        }
        assert_eq!(list.to_vec(), vec![Region::new(0, 80)]);
    }
}
