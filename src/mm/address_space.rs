//! Per-Process Address Space
//!
//! The [`AddressSpace`] is the only surface process code sees: allocate,
//! free, read a byte, write a byte. Everything else (first-fit search,
//! break growth, page faults, swapping) happens behind it.
//!
//! # Locking
//! One spinlock per address space guards its page table, areas, free
//! lists, symbol table and FIFO list. Calls on the same address space are
//! serialized; calls on different address spaces only meet inside the
//! shared RAM and swap devices, which lock themselves.

use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{debug, warn};
use spin::Mutex;

use super::address::{PageNumber, PhysAddr, VirtAddr};
use super::error::MmError;
use super::memphy::{PhysicalMemory, SwapDevice};
use super::pager::Pager;
use super::paging::PageTableEntry;
use super::region::Region;
use super::symtbl::{RegionId, Symbol, SymbolTable};
use super::vma::{AreaMap, VmaId, VmaInfo};

/// Everything behind the address space lock.
struct MmState {
    pager: Pager,
    areas: AreaMap,
    symbols: SymbolTable,
}

impl MmState {
    /// Resolve a region id and offset to a virtual address.
    ///
    /// The offset must fall inside the region.
    fn resolve(&self, region_id: u32, offset: usize) -> Result<VirtAddr, MmError> {
        let id = RegionId::new(region_id).ok_or(MmError::InvalidRegionId)?;
        let symbol = self.symbols.get(id).ok_or(MmError::InvalidRegionId)?;
        self.areas.get(symbol.area).ok_or(MmError::InvalidArea)?;
        if offset >= symbol.region.len() {
            return Err(MmError::InvalidAddress);
        }
        Ok(VirtAddr::new(symbol.region.start + offset))
    }
}

/// The virtual memory of one process.
pub struct AddressSpace {
    state: Mutex<MmState>,
}

impl AddressSpace {
    /// Create an address space with a single empty area 0 at address 0.
    pub fn new(ram: Arc<dyn PhysicalMemory>, swap: Arc<dyn SwapDevice>) -> Self {
        Self {
            state: Mutex::new(MmState {
                pager: Pager::new(ram, swap),
                areas: AreaMap::with_initial(0),
                symbols: SymbolTable::new(),
            }),
        }
    }

    /// Add another empty area starting at `vm_start`.
    pub fn create_area(&self, vm_start: usize) -> Result<VmaId, MmError> {
        self.state.lock().areas.create(vm_start)
    }

    /// Allocate `size` bytes in `area` and name them `region_id`.
    ///
    /// The free list of the area is searched first-fit; if nothing fits,
    /// the area's break is raised by whole pages and the unused tail of
    /// the growth goes on the free list. An occupied slot is overwritten:
    /// its old region stays mapped but is no longer named.
    ///
    /// Returns the start address of the allocation.
    ///
    /// # Errors
    /// - [`MmError::InvalidRegionId`] if `region_id` is outside the table
    /// - [`MmError::InvalidRange`] for `size == 0`
    /// - [`MmError::InvalidArea`] if `area` does not exist
    /// - [`MmError::GrowthFailed`] if the area could not grow
    pub fn allocate(&self, area: VmaId, region_id: u32, size: usize) -> Result<VirtAddr, MmError> {
        let id = RegionId::new(region_id).ok_or(MmError::InvalidRegionId)?;
        if size == 0 {
            return Err(MmError::InvalidRange);
        }

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let fit = state
            .areas
            .get_mut(area)
            .ok_or(MmError::InvalidArea)?
            .free_list_mut()
            .first_fit(size);

        let region = match fit {
            Ok(region) => region,
            Err(MmError::NoFit) => {
                let grown = state
                    .areas
                    .grow(area, size, &mut state.pager)
                    .map_err(|err| {
                        warn!("alloc of {} bytes in area {}: {}", size, area.index(), err);
                        MmError::GrowthFailed
                    })?;
                let region = Region::new(grown.start, grown.start + size);
                let tail = Region::new(region.end, grown.end);
                if !tail.is_empty() {
                    state
                        .areas
                        .get_mut(area)
                        .ok_or(MmError::InvalidArea)?
                        .free_list_mut()
                        .insert(tail)?;
                }
                region
            }
            Err(err) => return Err(err),
        };

        if let Some(old) = state.symbols.set(id, Symbol { area, region }) {
            warn!(
                "region {} reallocated without free; {} stays mapped",
                region_id, old.region
            );
        }
        debug!(
            "alloc region {} in area {}: {} ({} bytes)",
            region_id,
            area.index(),
            region,
            size
        );
        Ok(VirtAddr::new(region.start))
    }

    /// Release the region named `region_id` back to `area`'s free list.
    ///
    /// The slot is cleared even if it was already empty.
    ///
    /// # Errors
    /// - [`MmError::InvalidRegionId`] if `region_id` is outside the table
    /// - [`MmError::InvalidArea`] if `area` does not exist or the region
    ///   was carved from a different area
    pub fn free(&self, area: VmaId, region_id: u32) -> Result<(), MmError> {
        let id = RegionId::new(region_id).ok_or(MmError::InvalidRegionId)?;

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let vma = state.areas.get_mut(area).ok_or(MmError::InvalidArea)?;
        let symbol = state.symbols.get(id).copied();
        let result = match symbol {
            Some(symbol) if symbol.area != area => return Err(MmError::InvalidArea),
            Some(symbol) if !symbol.region.is_empty() => {
                vma.free_list_mut().insert(symbol.region)
            }
            _ => Ok(()),
        };
        state.symbols.clear(id);

        debug!("free region {} in area {}", region_id, area.index());
        result
    }

    /// Read the byte at `offset` inside the region named `region_id`.
    ///
    /// # Errors
    /// - [`MmError::InvalidRegionId`] if the slot is out of range or empty
    /// - [`MmError::InvalidArea`] if the region's area is gone
    /// - [`MmError::InvalidAddress`] if `offset` is past the region's end
    /// - any paging error from the access itself
    pub fn read(&self, region_id: u32, offset: usize) -> Result<u8, MmError> {
        let mut state = self.state.lock();
        let vaddr = state.resolve(region_id, offset)?;
        state.pager.read_byte(vaddr)
    }

    /// Write `value` at `offset` inside the region named `region_id`.
    ///
    /// # Errors
    /// As for [`read`](Self::read).
    pub fn write(&self, region_id: u32, offset: usize, value: u8) -> Result<(), MmError> {
        let mut state = self.state.lock();
        let vaddr = state.resolve(region_id, offset)?;
        state.pager.write_byte(vaddr, value)
    }

    /// Translate a virtual address, faulting its page in if needed.
    ///
    /// # Errors
    /// [`MmError::InvalidAddress`] if no area has grown over `vaddr`.
    pub fn translate(&self, vaddr: VirtAddr) -> Result<PhysAddr, MmError> {
        let mut state = self.state.lock();
        if !state.areas.covers(vaddr) {
            return Err(MmError::InvalidAddress);
        }
        state.pager.translate(vaddr)
    }

    /// The region currently named `region_id`, if any.
    pub fn region(&self, region_id: u32) -> Option<Region> {
        let id = RegionId::new(region_id)?;
        self.state.lock().symbols.get(id).map(|s| s.region)
    }

    /// Snapshot of an area's free list.
    pub fn free_regions(&self, area: VmaId) -> Result<Vec<Region>, MmError> {
        let state = self.state.lock();
        let vma = state.areas.get(area).ok_or(MmError::InvalidArea)?;
        Ok(vma.free_list().to_vec())
    }

    /// Snapshot of an area's bounds.
    pub fn area(&self, area: VmaId) -> Option<VmaInfo> {
        self.state.lock().areas.get(area).map(|v| v.info())
    }

    /// Bytes of `area` that are named by live regions.
    pub fn live_bytes(&self, area: VmaId) -> usize {
        self.state
            .lock()
            .symbols
            .iter()
            .filter(|(_, s)| s.area == area)
            .map(|(_, s)| s.region.len())
            .sum()
    }

    /// Current page table entry of a page.
    pub fn page_entry(&self, pgn: PageNumber) -> PageTableEntry {
        self.state.lock().pager.entry(pgn)
    }

    /// Resident pages, oldest first.
    pub fn resident_pages(&self) -> Vec<PageNumber> {
        self.state.lock().pager.resident_pages()
    }

    /// Number of page faults serviced so far.
    pub fn page_faults(&self) -> usize {
        self.state.lock().pager.fault_count()
    }

    /// Log the page table entries of pages `[first, last]`.
    pub fn dump_page_table(&self, first: PageNumber, last: PageNumber) {
        self.state.lock().pager.dump(first, last);
    }

    /// Return every frame and swap slot of this address space to its
    /// device. Also done on drop.
    pub fn release(&self) {
        self.state.lock().pager.release();
    }
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("AddressSpace")
            .field("areas", &state.areas)
            .field("symbols", &state.symbols.iter().count())
            .field("resident", &state.pager.resident_pages().len())
            .finish()
    }
}
