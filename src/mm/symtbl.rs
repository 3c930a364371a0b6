//! Region Symbol Table
//!
//! Names the live allocations of a process. A process refers to an
//! allocation by a small integer, the way an instruction names a
//! register; the table maps it to the allocated region and its area.
//!
//! # Design
//! - Fixed-size array of slots
//! - Slots are addressed by bounds-checked [`RegionId`] indices
//! - A cleared slot holds nothing and names no memory

use super::region::Region;
use super::vma::VmaId;
use crate::config::SYMTBL_SIZE;

/// A slot index in the symbol table.
///
/// This is a newtype to prevent using arbitrary integers as slot indices.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
#[repr(transparent)]
pub struct RegionId(u32);

impl RegionId {
    /// Create a new slot index.
    ///
    /// Returns None if the index is out of range.
    #[inline]
    pub const fn new(index: u32) -> Option<Self> {
        if (index as usize) < SYMTBL_SIZE {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Get the index value.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// An allocated region together with the area it was carved from.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Symbol {
    /// Area the region belongs to.
    pub area: VmaId,
    /// The allocated bytes.
    pub region: Region,
}

/// Symbol table of one address space.
#[derive(Debug)]
pub struct SymbolTable {
    slots: [Option<Symbol>; SYMTBL_SIZE],
}

impl SymbolTable {
    /// Create a table with every slot cleared.
    pub const fn new() -> Self {
        Self {
            slots: [None; SYMTBL_SIZE],
        }
    }

    /// Look up a slot.
    #[inline]
    pub fn get(&self, id: RegionId) -> Option<&Symbol> {
        self.slots[id.index()].as_ref()
    }

    /// Record a symbol, returning whatever the slot held before.
    pub fn set(&mut self, id: RegionId, symbol: Symbol) -> Option<Symbol> {
        self.slots[id.index()].replace(symbol)
    }

    /// Clear a slot, returning what it held.
    pub fn clear(&mut self, id: RegionId) -> Option<Symbol> {
        self.slots[id.index()].take()
    }

    /// Iterate over the occupied slots.
    pub fn iter(&self) -> impl Iterator<Item = (RegionId, &Symbol)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (RegionId(i as u32), s)))
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}
