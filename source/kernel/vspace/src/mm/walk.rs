// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Multi-level page-table walker
//! OWNERS: @kernel-mm-team
//! PUBLIC API: lookup_pt_slot, lookup_by_target, lookup_leaf, lookup_by_depth
//! DEPENDS_ON: mm::translate::AddressTranslator
//! INVARIANTS: Faults are returned, never stashed in globals; walks never descend through a leaf

use super::page_table::{level_page_bits, next_table, pt_index, slot, PteSlot};
use super::translate::AddressTranslator;
use super::{mask, Pte, PAGE_BITS, PT_INDEX_BITS, PT_LEVELS};
use crate::error::LookupFault;
use crate::types::{PAddr, PPtr};

/// Slot reached by [`lookup_pt_slot`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotLookup {
    pub slot: PteSlot,
    /// Level of the table containing `slot` (1 = root).
    pub level: usize,
}

/// Walk that stopped at an empty slot before reaching the requested level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MissingTable {
    /// The empty slot where the next table would be installed.
    pub slot: PteSlot,
    /// Level of the table containing `slot`.
    pub level: usize,
    /// `MissingCapability` sized to the region `slot` covers.
    pub fault: LookupFault,
}

/// Descends from `root` towards `max_level`.
///
/// Returns the slot at `max_level`, or the slot of the first leaf met on the way (its level
/// is then smaller than `max_level`). An empty slot above `max_level` yields [`MissingTable`].
pub fn lookup_pt_slot<A: AddressTranslator>(
    tr: &A,
    root: PPtr,
    vaddr: usize,
    max_level: usize,
) -> Result<SlotLookup, MissingTable> {
    debug_assert!((1..=PT_LEVELS).contains(&max_level));
    let mut table = root;
    let mut level = 1;
    loop {
        let current = slot(table, pt_index(vaddr, level));
        if level >= max_level {
            return Ok(SlotLookup { slot: current, level });
        }
        let pte = current.read();
        if !pte.is_valid() {
            return Err(MissingTable {
                slot: current,
                level,
                fault: LookupFault::MissingCapability { bits_left: level_page_bits(level) },
            });
        }
        if pte.is_leaf() {
            return Ok(SlotLookup { slot: current, level });
        }
        table = next_table(tr, pte);
        level += 1;
    }
}

/// Finds the slot whose pointer entry refers to the table at `target`.
///
/// Only the path selected by `vaddr` is searched.
pub fn lookup_by_target<A: AddressTranslator>(
    tr: &A,
    root: PPtr,
    vaddr: usize,
    target: PAddr,
) -> Result<PteSlot, LookupFault> {
    let mut table = root;
    for level in 1..PT_LEVELS {
        let current = slot(table, pt_index(vaddr, level));
        let pte = current.read();
        if !pte.is_table() {
            return Err(LookupFault::MissingCapability { bits_left: level_page_bits(level) });
        }
        if pte.paddr() == target {
            return Ok(current);
        }
        table = next_table(tr, pte);
    }
    Err(LookupFault::MissingCapability { bits_left: level_page_bits(PT_LEVELS) })
}

/// Leaf translating an address, with the level it was found at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Leaf {
    pub slot: PteSlot,
    pub pte: Pte,
    pub level: usize,
}

impl Leaf {
    /// Physical address `vaddr` resolves to through this leaf.
    pub fn translate(&self, vaddr: usize) -> PAddr {
        self.pte.paddr().offset(vaddr & mask(level_page_bits(self.level)))
    }
}

/// Resolves `vaddr` to the leaf mapping it.
///
/// A hole at any level, including an empty last-level slot, is reported as
/// `MissingCapability` sized to that level's granularity.
pub fn lookup_leaf<A: AddressTranslator>(
    tr: &A,
    root: PPtr,
    vaddr: usize,
) -> Result<Leaf, LookupFault> {
    let found = lookup_pt_slot(tr, root, vaddr, PT_LEVELS).map_err(|missing| missing.fault)?;
    let pte = found.slot.read();
    if pte.is_leaf() {
        Ok(Leaf { slot: found.slot, pte, level: found.level })
    } else {
        Err(LookupFault::MissingCapability { bits_left: level_page_bits(found.level) })
    }
}

/// Slot found by a depth-bounded walk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthSlot {
    pub slot: PteSlot,
    /// Address bits below the region covered by `slot`.
    pub bits_left: usize,
}

/// Walks at most `depth` levels, stopping early at anything that is not a table pointer.
///
/// When the walk ends at a superpage, `bits_left` is larger than the granularity a full
/// walk of `depth` levels would have produced.
pub fn lookup_by_depth<A: AddressTranslator>(
    tr: &A,
    root: PPtr,
    vaddr: usize,
    depth: usize,
) -> DepthSlot {
    debug_assert!((1..=PT_LEVELS).contains(&depth));
    let mut bits_left = PT_INDEX_BITS * PT_LEVELS + PAGE_BITS;
    let mut remaining = depth;
    let mut table = root;
    loop {
        bits_left -= PT_INDEX_BITS;
        let current = slot(table, (vaddr >> bits_left) & mask(PT_INDEX_BITS));
        remaining -= 1;
        let pte = current.read();
        if !pte.is_table() || remaining == 0 {
            return DepthSlot { slot: current, bits_left };
        }
        table = next_table(tr, pte);
    }
}
