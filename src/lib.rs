//! ossim-mm - Virtual Memory Manager for a Teaching OS Simulator
//!
//! Each simulated process owns an [`AddressSpace`]: a set of areas that
//! grow through a break pointer, a table of named regions, and a page
//! table backed by a shared RAM pool and swap device.
//!
//! # Features
//! - First-fit region allocation with coalescing free lists
//! - Break-pointer growth with all-or-nothing backing
//! - Demand paging with FIFO page replacement
//! - One lock per address space; devices lock themselves
//!
//! # Example
//! ```
//! use ossim_mm::config::DEFAULT_AREA;
//! use ossim_mm::mm::{default_devices, AddressSpace};
//!
//! let (ram, swap) = default_devices();
//! let space = AddressSpace::new(ram, swap);
//! space.allocate(DEFAULT_AREA, 0, 100).unwrap();
//! space.write(0, 42, 7).unwrap();
//! assert_eq!(space.read(0, 42), Ok(7));
//! space.free(DEFAULT_AREA, 0).unwrap();
//! ```

#![cfg_attr(not(test), no_std)]
#![forbid(unsafe_code)]

extern crate alloc;

pub mod config;
pub mod mm;

pub use mm::{AddressSpace, MemPhy, MmError, Region, VirtAddr, VmaId};
