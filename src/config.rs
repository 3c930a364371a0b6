//! Tunables of the memory manager

use crate::mm::VmaId;

/// Number of region slots in a symbol table.
pub const SYMTBL_SIZE: usize = 30;

/// Default size of the simulated RAM pool in bytes.
pub const DEFAULT_RAM_SIZE: usize = 0x10_0000;

/// Default size of the simulated swap device in bytes.
pub const DEFAULT_SWAP_SIZE: usize = 0x100_0000;

/// Area every address space is created with.
pub const DEFAULT_AREA: VmaId = VmaId::new(0);
