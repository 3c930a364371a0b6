//! Virtual memory management for simulated processes
//!
//! Provides:
//! - Region free lists with first-fit allocation
//! - Virtual memory areas that grow through a break pointer
//! - Demand paging with FIFO replacement over a swap device
//! - The per-process [`AddressSpace`] tying them together
//!
//! # Layering
//! [`AddressSpace`] holds one lock over an [`AreaMap`](vma::AreaMap), a
//! [`SymbolTable`] and a [`Pager`](pager::Pager). The pager talks to RAM
//! and swap only through the [`PhysicalMemory`] and [`SwapDevice`] traits;
//! [`MemPhy`] implements both.

pub mod address;
mod address_space;
mod error;
pub mod memphy;
pub mod pager;
pub mod paging;
pub mod region;
mod symtbl;
pub mod vma;

use alloc::sync::Arc;

pub use address::{FrameNumber, PageNumber, PhysAddr, SwapSlot, VirtAddr, PAGE_SIZE};
pub use address_space::AddressSpace;
pub use error::MmError;
pub use memphy::{MemPhy, MemPhyError, PhysicalMemory, SwapDevice};
pub use paging::PageTableEntry;
pub use region::{FreeList, Region};
pub use symtbl::{RegionId, Symbol, SymbolTable};
pub use vma::{VmaId, VmaInfo};

use crate::config::{DEFAULT_RAM_SIZE, DEFAULT_SWAP_SIZE};

/// RAM and swap devices of the default sizes.
pub fn default_devices() -> (Arc<MemPhy>, Arc<MemPhy>) {
    (
        Arc::new(MemPhy::new(DEFAULT_RAM_SIZE)),
        Arc::new(MemPhy::new(DEFAULT_SWAP_SIZE)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_AREA;

    #[test]
    fn test_default_devices_sizes() {
        let (ram, swap) = default_devices();
        assert_eq!(ram.total_frames(), DEFAULT_RAM_SIZE / PAGE_SIZE);
        assert_eq!(swap.total_frames(), DEFAULT_SWAP_SIZE / PAGE_SIZE);
    }

    #[test]
    fn test_two_spaces_on_default_devices() {
        let (ram, swap) = default_devices();
        let a = AddressSpace::new(ram.clone(), swap.clone());
        let b = AddressSpace::new(ram.clone(), swap);

        // Same virtual addresses, different frames.
        a.allocate(DEFAULT_AREA, 0, 10).unwrap();
        b.allocate(DEFAULT_AREA, 0, 10).unwrap();
        a.write(0, 0, 1).unwrap();
        b.write(0, 0, 2).unwrap();
        assert_eq!(a.read(0, 0), Ok(1));
        assert_eq!(b.read(0, 0), Ok(2));
        assert_ne!(
            a.translate(VirtAddr::new(0)).unwrap(),
            b.translate(VirtAddr::new(0)).unwrap()
        );
        assert_eq!(ram.free_frames(), ram.total_frames() - 2);
    }
}
