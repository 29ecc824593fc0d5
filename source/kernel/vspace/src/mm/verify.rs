// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Structural checks over the user half of a VSpace.

use super::page_table::{level_page_bits, next_table, pt_index, slot};
use super::translate::AddressTranslator;
use super::{PteFlags, KERNEL_BASE, PT_ENTRIES, PT_LEVELS};
use crate::types::PPtr;

/// First structural problem found in a VSpace.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PtViolation {
    /// Pointer entry in a last-level table.
    PointerAtLastLevel { vaddr: usize },
    /// Superpage leaf whose physical address is not aligned to its size.
    MisalignedSuperpage { vaddr: usize, level: usize },
    /// Pointer entry carrying leaf-only bits (U/A/D).
    ReservedPointerBits { vaddr: usize, level: usize },
    /// Write permission without read permission.
    WriteWithoutRead { vaddr: usize, level: usize },
}

/// Checks every user-half entry reachable from `root`.
pub fn verify_vspace<A: AddressTranslator>(tr: &A, root: PPtr) -> Result<(), PtViolation> {
    verify_table(tr, root, 1, 0, pt_index(KERNEL_BASE, 1))
}

fn verify_table<A: AddressTranslator>(
    tr: &A,
    table: PPtr,
    level: usize,
    base: usize,
    limit: usize,
) -> Result<(), PtViolation> {
    let page_bits = level_page_bits(level);
    for index in 0..limit.min(PT_ENTRIES) {
        let pte = slot(table, index).read();
        if !pte.is_valid() {
            continue;
        }
        let vaddr = base | (index << page_bits);
        let flags = pte.flags();
        if pte.is_table() {
            if level == PT_LEVELS {
                return Err(PtViolation::PointerAtLastLevel { vaddr });
            }
            if flags.intersects(PteFlags::USER | PteFlags::ACCESSED | PteFlags::DIRTY) {
                return Err(PtViolation::ReservedPointerBits { vaddr, level });
            }
            verify_table(tr, next_table(tr, pte), level + 1, vaddr, PT_ENTRIES)?;
            continue;
        }
        if flags.contains(PteFlags::WRITE) && !flags.contains(PteFlags::READ) {
            return Err(PtViolation::WriteWithoutRead { vaddr, level });
        }
        if !pte.paddr().is_aligned(page_bits) {
            return Err(PtViolation::MisalignedSuperpage { vaddr, level });
        }
    }
    Ok(())
}
