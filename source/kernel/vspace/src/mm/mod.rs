// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Sv39/Sv48 page tables, the hand-rolled walker and the ASID registry
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Pte, PteFlags, PageTable, PteSlot, walk::*, VSpaceRegistry, AddressTranslator
//! DEPENDS_ON: hal::Machine, cap::Cap, thread::Thread
//! INVARIANTS: One aligned-word store per PTE update; kernel window mirrored in every root

pub mod boot;
pub mod ipc_buffer;
pub mod page_table;
pub mod pte;
pub mod registry;
pub mod translate;
pub mod verify;
pub mod walk;

pub use page_table::{level_page_bits, pt_index, PageTable, PteSlot};
pub use pte::{Pte, PteFlags};
pub use registry::{AsidPool, VSpaceRegistry};
pub use translate::{AddressTranslator, LinearMap};

/// log2 of the base page size.
pub const PAGE_BITS: usize = 12;
/// Size of a base page in bytes.
pub const PAGE_SIZE: usize = 1 << PAGE_BITS;
/// Index bits consumed per translation level.
pub const PT_INDEX_BITS: usize = 9;
/// Entries per page table.
pub const PT_ENTRIES: usize = 1 << PT_INDEX_BITS;

/// Number of translation levels (Sv39).
#[cfg(not(feature = "sv48"))]
pub const PT_LEVELS: usize = 3;
/// Number of translation levels (Sv48).
#[cfg(feature = "sv48")]
pub const PT_LEVELS: usize = 4;

/// Width of a virtual address.
pub const VA_BITS: usize = PT_LEVELS * PT_INDEX_BITS + PAGE_BITS;
/// First address not available to user mappings (end of the lower canonical half).
pub const USER_TOP: usize = 1 << (VA_BITS - 1);
/// Base of the kernel window (start of the upper canonical half).
pub const KERNEL_BASE: usize = usize::MAX << (VA_BITS - 1);

/// ASID bits selecting a slot inside a pool.
pub const ASID_LOW_BITS: usize = 9;
/// ASID bits selecting a pool in the ASID table.
pub const ASID_HIGH_BITS: usize = 7;
/// Number of pools in the ASID table.
pub const ASID_POOLS: usize = 1 << ASID_HIGH_BITS;
/// Number of slots in one pool.
pub const ASID_POOL_SLOTS: usize = 1 << ASID_LOW_BITS;
/// Size of the untyped object an ASID pool is carved from.
pub const ASID_POOL_BITS: usize = 12;
/// ASID the initial thread's VSpace is bound to.
pub const IT_ASID: crate::types::Asid = crate::types::Asid::new(1);

/// Alignment required of an IPC buffer.
pub const IPC_BUFFER_ALIGN_BITS: usize = 9;

/// Returns a word with its low `bits` bits set.
#[inline]
pub const fn mask(bits: usize) -> usize {
    if bits >= usize::BITS as usize {
        usize::MAX
    } else {
        (1 << bits) - 1
    }
}

static_assertions::const_assert_eq!(core::mem::size_of::<usize>(), 8);
static_assertions::const_assert!(ASID_POOL_SLOTS * core::mem::size_of::<usize>() == 1 << ASID_POOL_BITS);

#[cfg(test)]
mod tests;
#[cfg(test)]
mod tests_prop;
