//! Demand Paging Engine
//!
//! Owns the page table of one address space together with the FIFO list
//! of resident pages, and turns virtual addresses into RAM bytes.
//!
//! # Page Faults
//! A fault on an absent or swapped-out page obtains a frame, either a
//! free one from the RAM pool or the frame of the oldest resident page,
//! which is written to a fresh swap slot first. The faulting page is then
//! zero-filled or swapped in and appended to the FIFO list.
//!
//! A fault is all-or-nothing: if any step fails, slots and frames taken
//! so far are handed back and no page table entry changes.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::{info, trace, warn};

use super::address::{FrameNumber, PageNumber, PhysAddr, SwapSlot, VirtAddr};
use super::error::MmError;
use super::memphy::{MemPhyError, PhysicalMemory, SwapDevice};
use super::paging::{PageTable, PageTableEntry};

/// A victim whose content has been copied to swap, but whose page table
/// entry still says `Present`.
#[derive(Debug, Clone, Copy)]
struct Eviction {
    victim: PageNumber,
    slot: SwapSlot,
    frame: FrameNumber,
}

/// Where the frame for a fault came from.
#[derive(Debug, Clone, Copy)]
enum FrameSource {
    Free(FrameNumber),
    Evicted(Eviction),
}

impl FrameSource {
    fn frame(self) -> FrameNumber {
        match self {
            Self::Free(frame) => frame,
            Self::Evicted(ev) => ev.frame,
        }
    }
}

/// Page table, FIFO resident list and the devices behind them.
pub struct Pager {
    table: PageTable,
    /// Resident pages in the order they became present. Front = next victim.
    fifo: VecDeque<PageNumber>,
    ram: Arc<dyn PhysicalMemory>,
    swap: Arc<dyn SwapDevice>,
    faults: usize,
}

impl Pager {
    /// Create a pager with an all-absent page table.
    pub fn new(ram: Arc<dyn PhysicalMemory>, swap: Arc<dyn SwapDevice>) -> Self {
        Self {
            table: PageTable::new(),
            fifo: VecDeque::new(),
            ram,
            swap,
            faults: 0,
        }
    }

    /// Current entry for a page.
    #[inline]
    pub fn entry(&self, pgn: PageNumber) -> PageTableEntry {
        self.table[pgn]
    }

    /// Resident pages, oldest first.
    pub fn resident_pages(&self) -> Vec<PageNumber> {
        self.fifo.iter().copied().collect()
    }

    /// Number of page faults serviced so far.
    pub fn fault_count(&self) -> usize {
        self.faults
    }

    /// Make a page resident and return its frame.
    ///
    /// # Errors
    /// - [`MmError::NoVictim`] if RAM is full and nothing of this address
    ///   space is resident
    /// - [`MmError::PageFaultFailure`] for any other device failure
    pub fn ensure_resident(&mut self, pgn: PageNumber) -> Result<FrameNumber, MmError> {
        let entry = self.table[pgn];
        if let PageTableEntry::Present(frame) = entry {
            return Ok(frame);
        }

        trace!("page fault: page {} ({})", pgn.index(), entry);
        let source = self.acquire_frame().map_err(|err| {
            warn!("page fault on page {} failed: {}", pgn.index(), err);
            match err {
                MmError::NoVictim => MmError::NoVictim,
                _ => MmError::PageFaultFailure,
            }
        })?;
        let frame = source.frame();

        let fill = match entry {
            PageTableEntry::SwappedOut(slot) => {
                self.ram.copy_swap_to_frame(self.swap.as_ref(), slot, frame)
            }
            _ => self.ram.zero_frame(frame),
        };
        if let Err(err) = fill {
            warn!("page fault on page {}: fill failed: {}", pgn.index(), err);
            self.rollback(source);
            return Err(MmError::PageFaultFailure);
        }

        self.commit(source);
        if let PageTableEntry::SwappedOut(old_slot) = entry {
            self.swap.free_slot(old_slot);
        }
        self.table[pgn] = PageTableEntry::Present(frame);
        self.fifo.push_back(pgn);
        self.faults += 1;
        Ok(frame)
    }

    /// Back an absent page with a zeroed frame. Pages that are already
    /// present or swapped out are left alone.
    ///
    /// Returns `true` if the page was newly backed.
    pub fn back_page(&mut self, pgn: PageNumber) -> Result<bool, MmError> {
        match self.table[pgn] {
            PageTableEntry::Absent => self.ensure_resident(pgn).map(|_| true),
            _ => Ok(false),
        }
    }

    /// Drop whatever backs a page and mark it absent.
    pub fn unmap_page(&mut self, pgn: PageNumber) {
        match core::mem::take(&mut self.table[pgn]) {
            PageTableEntry::Present(frame) => {
                self.fifo.retain(|p| *p != pgn);
                self.ram.free_frame(frame);
            }
            PageTableEntry::SwappedOut(slot) => self.swap.free_slot(slot),
            PageTableEntry::Absent => {}
        }
    }

    /// Translate a virtual address, faulting the page in if needed.
    ///
    /// # Errors
    /// [`MmError::InvalidAddress`] for addresses beyond the page table,
    /// otherwise whatever [`ensure_resident`](Self::ensure_resident) fails with.
    pub fn translate(&mut self, vaddr: VirtAddr) -> Result<PhysAddr, MmError> {
        let pgn = vaddr.page_number().ok_or(MmError::InvalidAddress)?;
        let frame = self.ensure_resident(pgn)?;
        Ok(PhysAddr::from_parts(frame, vaddr.page_offset()))
    }

    /// Read one byte of virtual memory.
    pub fn read_byte(&mut self, vaddr: VirtAddr) -> Result<u8, MmError> {
        let phys = self.translate(vaddr)?;
        Ok(self
            .ram
            .read_byte(phys.frame_number(), phys.frame_offset())?)
    }

    /// Write one byte of virtual memory.
    pub fn write_byte(&mut self, vaddr: VirtAddr, value: u8) -> Result<(), MmError> {
        let phys = self.translate(vaddr)?;
        self.ram
            .write_byte(phys.frame_number(), phys.frame_offset(), value)?;
        Ok(())
    }

    /// Return every frame and swap slot to its device and reset the table.
    pub fn release(&mut self) {
        for (_, entry) in self.table.iter_mapped() {
            match entry {
                PageTableEntry::Present(frame) => self.ram.free_frame(frame),
                PageTableEntry::SwappedOut(slot) => self.swap.free_slot(slot),
                PageTableEntry::Absent => {}
            }
        }
        self.table.clear();
        self.fifo.clear();
    }

    /// Log the packed entries of every mapped page in `[first, last]`.
    pub fn dump(&self, first: PageNumber, last: PageNumber) {
        info!("page table: {} resident, {} faults", self.fifo.len(), self.faults);
        for (pgn, entry) in self
            .table
            .iter_mapped()
            .filter(|(pgn, _)| *pgn >= first && *pgn <= last)
        {
            info!("  {:05}: {:08x} {}", pgn.index(), entry.to_raw(), entry);
        }
    }

    /// Get a frame for a fault: a free one if the pool has it, otherwise
    /// the frame of the FIFO victim.
    fn acquire_frame(&mut self) -> Result<FrameSource, MmError> {
        match self.ram.alloc_frame() {
            Ok(frame) => return Ok(FrameSource::Free(frame)),
            Err(MemPhyError::OutOfMemory) => {}
            Err(err) => return Err(err.into()),
        }
        self.start_eviction().map(FrameSource::Evicted)
    }

    /// Copy the oldest resident page to a fresh swap slot. Its page table
    /// entry is only changed by [`commit`](Self::commit).
    fn start_eviction(&mut self) -> Result<Eviction, MmError> {
        let slot = self.swap.alloc_slot()?;
        let Some(victim) = self.fifo.pop_front() else {
            self.swap.free_slot(slot);
            return Err(MmError::NoVictim);
        };

        let Some(frame) = self.table[victim].frame() else {
            // The FIFO list only ever holds present pages.
            self.fifo.push_front(victim);
            self.swap.free_slot(slot);
            return Err(MmError::PageFaultFailure);
        };

        if let Err(err) = self
            .ram
            .copy_frame_to_swap(frame, self.swap.as_ref(), slot)
        {
            self.fifo.push_front(victim);
            self.swap.free_slot(slot);
            return Err(err.into());
        }

        trace!(
            "evicting page {} from frame {} to swap slot {}",
            victim.index(),
            frame.index(),
            slot.index()
        );
        Ok(Eviction {
            victim,
            slot,
            frame,
        })
    }

    fn commit(&mut self, source: FrameSource) {
        if let FrameSource::Evicted(ev) = source {
            self.table[ev.victim] = PageTableEntry::SwappedOut(ev.slot);
        }
    }

    /// Undo [`acquire_frame`](Self::acquire_frame) after a failed fill.
    /// A victim's content is restored from its swap copy.
    fn rollback(&mut self, source: FrameSource) {
        match source {
            FrameSource::Free(frame) => self.ram.free_frame(frame),
            FrameSource::Evicted(ev) => {
                if let Err(err) = self
                    .ram
                    .copy_swap_to_frame(self.swap.as_ref(), ev.slot, ev.frame)
                {
                    warn!("could not restore page {}: {}", ev.victim.index(), err);
                }
                self.fifo.push_front(ev.victim);
                self.swap.free_slot(ev.slot);
            }
        }
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        self.release();
    }
}
