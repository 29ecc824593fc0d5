// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page-table object layout, index helpers and raw slot access.

use core::ptr::NonNull;

use super::translate::AddressTranslator;
use super::{Pte, PAGE_BITS, PAGE_SIZE, PT_ENTRIES, PT_INDEX_BITS, PT_LEVELS};
use crate::types::{PAddr, PPtr};

/// One page-table page. Roots and intermediate tables share this layout.
#[repr(C, align(4096))]
pub struct PageTable {
    pub entries: [Pte; PT_ENTRIES],
}

static_assertions::const_assert_eq!(core::mem::size_of::<PageTable>(), PAGE_SIZE);
static_assertions::const_assert_eq!(core::mem::align_of::<PageTable>(), PAGE_SIZE);

/// Size (log2) of the region one entry of a level-`level` table maps. Level 1 is the root.
#[inline]
pub const fn level_page_bits(level: usize) -> usize {
    PT_INDEX_BITS * (PT_LEVELS - level) + PAGE_BITS
}

/// Index into a level-`level` table for `vaddr`.
#[inline]
pub const fn pt_index(vaddr: usize, level: usize) -> usize {
    (vaddr >> level_page_bits(level)) & (PT_ENTRIES - 1)
}

/// Handle to a single PTE inside a live page table.
///
/// Slots are plain addresses into kernel-mapped table memory; they carry no borrow and stay
/// meaningful for as long as the owning table object is not retyped.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PteSlot(NonNull<Pte>);

impl PteSlot {
    /// Slot `index` of the table at `table`.
    ///
    /// # Safety
    /// `table` must point at a live, kernel-mapped [`PageTable`] and `index < PT_ENTRIES`.
    #[inline]
    pub unsafe fn new(table: PPtr, index: usize) -> Self {
        debug_assert!(index < PT_ENTRIES);
        let base = table.as_mut_ptr::<Pte>();
        // SAFETY: caller guarantees `table` is a live table, so the offset stays inside it.
        Self(unsafe { NonNull::new_unchecked(base.add(index)) })
    }

    /// Reads the entry with a single word load.
    #[inline]
    pub fn read(self) -> Pte {
        // SAFETY: slots are only created over live table memory.
        unsafe { core::ptr::read_volatile(self.0.as_ptr()) }
    }

    /// Replaces the entry with a single word store, atomic w.r.t. the hardware walker.
    #[inline]
    pub fn write(self, pte: Pte) {
        // SAFETY: see `read`.
        unsafe { core::ptr::write_volatile(self.0.as_ptr(), pte) }
    }

    /// Kernel pointer to the slot itself.
    #[inline]
    pub fn pptr(self) -> PPtr {
        PPtr::new(self.0.as_ptr() as usize)
    }

    /// Index of the slot within its table.
    #[inline]
    pub fn index(self) -> usize {
        (self.pptr().raw() & (PAGE_SIZE - 1)) / core::mem::size_of::<Pte>()
    }
}

/// Returns slot `index` of the table at `table`.
#[inline]
pub(crate) fn slot(table: PPtr, index: usize) -> PteSlot {
    // SAFETY: callers in this crate only pass pointers to live page tables obtained from
    // capabilities, the ASID registry or a valid pointer PTE, and indices below PT_ENTRIES.
    unsafe { PteSlot::new(table, index & (PT_ENTRIES - 1)) }
}

/// Kernel pointer to the table a pointer PTE refers to.
#[inline]
pub(crate) fn next_table<A: AddressTranslator>(tr: &A, pte: Pte) -> PPtr {
    tr.pptr_from_paddr(pte.paddr())
}

/// Zeroes a whole table.
pub(crate) fn clear_table(table: PPtr) {
    for index in 0..PT_ENTRIES {
        slot(table, index).write(Pte::INVALID);
    }
}

/// Physical address of a table, for building pointer entries.
#[inline]
pub(crate) fn table_paddr<A: AddressTranslator>(tr: &A, table: PPtr) -> PAddr {
    tr.paddr_from_pptr(table)
}
