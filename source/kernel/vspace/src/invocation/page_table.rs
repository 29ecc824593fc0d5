// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Page-table capability decode.

use super::{Invocation, MmuLabel, MmuOperation};
use crate::cap::{CSpace, Cap};
use crate::error::SyscallError;
use crate::mm::walk::lookup_pt_slot;
use crate::mm::{level_page_bits, mask, AddressTranslator, Pte, VSpaceRegistry, PT_LEVELS, USER_TOP};

pub(super) fn decode<A: AddressTranslator>(
    registry: &VSpaceRegistry<A>,
    cspace: &dyn CSpace,
    cap: Cap,
    label: Option<MmuLabel>,
    inv: &Invocation<'_>,
) -> Result<MmuOperation, SyscallError> {
    let Cap::PageTable { base, is_mapped, .. } = cap else {
        return Err(SyscallError::InvalidCapability { index: 0 });
    };
    // Roots are managed through ASID pools only.
    if registry.is_vtable_root(&cap) {
        return Err(SyscallError::IllegalOperation);
    }

    match label {
        Some(MmuLabel::PageTableUnmap) => {
            return Ok(MmuOperation::PageTableUnmap { cap, slot: inv.target });
        }
        Some(MmuLabel::PageTableMap) => {}
        _ => return Err(SyscallError::IllegalOperation),
    }

    let (Some(vaddr), Some(root_slot)) = (inv.arg(0), inv.extra(0)) else {
        return Err(SyscallError::TruncatedMessage);
    };
    if is_mapped {
        log_debug!(target: "mmu", "PageTableMap: table {:#x} already mapped", base);
        return Err(SyscallError::InvalidCapability { index: 0 });
    }

    let root_cap = cspace.cap(root_slot);
    if !registry.is_valid_native_root(&root_cap) {
        return Err(SyscallError::InvalidCapability { index: 1 });
    }
    let Cap::PageTable { base: root, mapped_asid: asid, .. } = root_cap else {
        return Err(SyscallError::InvalidCapability { index: 1 });
    };

    if vaddr >= USER_TOP {
        return Err(SyscallError::InvalidArgument { index: 0 });
    }
    match registry.find_vspace_for_asid(asid) {
        Err(fault) => return Err(SyscallError::lookup(fault)),
        Ok(found) if found != root => return Err(SyscallError::InvalidCapability { index: 1 }),
        Ok(_) => {}
    }

    // A complete walk means either a leaf covers `vaddr` or every level already has a table.
    let missing = match lookup_pt_slot(registry.translator(), root, vaddr, PT_LEVELS) {
        Ok(_) => return Err(SyscallError::DeleteFirst),
        Err(missing) => missing,
    };

    let mapped_addr = vaddr & !mask(level_page_bits(missing.level));
    Ok(MmuOperation::PageTableMap {
        cap: Cap::PageTable { base, is_mapped: true, mapped_asid: asid, mapped_addr },
        slot: inv.target,
        pte: Pte::table(registry.paddr_of(base)),
        pt_slot: missing.slot,
    })
}
