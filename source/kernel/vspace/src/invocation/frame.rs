// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Frame capability decode and the shared map/remap entry construction.

use super::{resolve_root, Invocation, MmuLabel, MmuOperation};
use crate::cap::{mask_vm_rights, CSpace, Cap, CapRights, FrameSize, VmAttributes, VmRights};
use crate::error::SyscallError;
use crate::mm::walk::lookup_pt_slot;
use crate::mm::{mask, AddressTranslator, Pte, PteSlot, VSpaceRegistry, USER_TOP};
use crate::types::{PAddr, PPtr};

/// Encoded leaf plus the single slot it goes into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappingEntry {
    pub pte: Pte,
    pub slot: PteSlot,
}

/// Encodes a user leaf for `paddr` and locates its slot at the level implied by `size`.
///
/// Missing intermediate tables are reported, never created. A larger leaf already covering
/// `vaddr` is a conflict.
pub fn create_safe_mapping_entries<A: AddressTranslator>(
    registry: &VSpaceRegistry<A>,
    paddr: PAddr,
    vaddr: usize,
    size: FrameSize,
    rights: VmRights,
    attr: VmAttributes,
    root: PPtr,
) -> Result<MappingEntry, SyscallError> {
    let executable = !attr.contains(VmAttributes::EXECUTE_NEVER);
    let pte = Pte::user(paddr, executable, rights);
    let found = lookup_pt_slot(registry.translator(), root, vaddr, size.level())
        .map_err(|missing| SyscallError::lookup(missing.fault))?;
    if found.level != size.level() {
        log_debug!(target: "mmu", "{:#x} already covered by a level-{} leaf", vaddr, found.level);
        return Err(SyscallError::DeleteFirst);
    }
    Ok(MappingEntry { pte, slot: found.slot })
}

/// Frame rights narrowed by the caller's mask word at argument `index`.
///
/// Write-only and no-access results have no user leaf encoding and are refused.
fn mappable_rights(rights: VmRights, mask_word: usize, index: usize) -> Result<VmRights, SyscallError> {
    match mask_vm_rights(rights, CapRights::from_word(mask_word)) {
        VmRights::NoAccess | VmRights::WriteOnly => Err(SyscallError::InvalidArgument { index }),
        usable => Ok(usable),
    }
}

pub(super) fn decode<A: AddressTranslator>(
    registry: &VSpaceRegistry<A>,
    cspace: &dyn CSpace,
    cap: Cap,
    label: Option<MmuLabel>,
    inv: &Invocation<'_>,
) -> Result<MmuOperation, SyscallError> {
    let Cap::Frame { base, .. } = cap else {
        return Err(SyscallError::InvalidCapability { index: 0 });
    };
    match label {
        Some(MmuLabel::PageMap) => decode_map(registry, cspace, cap, inv),
        Some(MmuLabel::PageRemap) => decode_remap(registry, cspace, cap, inv),
        Some(MmuLabel::PageUnmap) => Ok(MmuOperation::PageUnmap { cap, slot: inv.target }),
        Some(MmuLabel::PageGetAddress) => {
            Ok(MmuOperation::PageGetAddress { paddr: registry.paddr_of(base) })
        }
        _ => Err(SyscallError::IllegalOperation),
    }
}

fn decode_map<A: AddressTranslator>(
    registry: &VSpaceRegistry<A>,
    cspace: &dyn CSpace,
    cap: Cap,
    inv: &Invocation<'_>,
) -> Result<MmuOperation, SyscallError> {
    let Cap::Frame { base, size, rights, mapped_asid, mapped_addr } = cap else {
        return Err(SyscallError::InvalidCapability { index: 0 });
    };
    let (Some(vaddr), Some(rights_mask), Some(attr), Some(root_slot)) =
        (inv.arg(0), inv.arg(1), inv.arg(2), inv.extra(0))
    else {
        return Err(SyscallError::TruncatedMessage);
    };

    // A mapped frame may only be re-mapped in place.
    if mapped_asid.is_valid() && mapped_addr != vaddr {
        log_debug!(target: "mmu", "PageMap: frame already mapped at {:#x}", mapped_addr);
        return Err(SyscallError::InvalidCapability { index: 0 });
    }

    let (root, asid) = resolve_root(registry, &cspace.cap(root_slot))?;
    if mapped_asid.is_valid() && mapped_asid != asid {
        log_debug!(target: "mmu", "PageMap: frame mapped in asid {}", mapped_asid);
        return Err(SyscallError::InvalidCapability { index: 0 });
    }

    match vaddr.checked_add(size.bytes() - 1) {
        Some(vtop) if vtop < USER_TOP => {}
        _ => return Err(SyscallError::InvalidArgument { index: 0 }),
    }
    if vaddr & mask(size.bits()) != 0 {
        return Err(SyscallError::AlignmentError);
    }

    let paddr = registry.paddr_of(base);
    let vm_rights = mappable_rights(rights, rights_mask, 1)?;
    let entry = create_safe_mapping_entries(
        registry,
        paddr,
        vaddr,
        size,
        vm_rights,
        VmAttributes::from_word(attr),
        root,
    )?;

    let existing = entry.slot.read();
    let same_frame = mapped_asid.is_valid() && existing.is_leaf() && existing.paddr() == paddr;
    if existing.is_valid() && !same_frame {
        return Err(SyscallError::DeleteFirst);
    }

    Ok(MmuOperation::PageMap {
        cap: Cap::Frame { base, size, rights, mapped_asid: asid, mapped_addr: vaddr },
        slot: inv.target,
        entry,
    })
}

fn decode_remap<A: AddressTranslator>(
    registry: &VSpaceRegistry<A>,
    cspace: &dyn CSpace,
    cap: Cap,
    inv: &Invocation<'_>,
) -> Result<MmuOperation, SyscallError> {
    let Cap::Frame { base, size, rights, mapped_asid, mapped_addr } = cap else {
        return Err(SyscallError::InvalidCapability { index: 0 });
    };
    let (Some(rights_mask), Some(attr), Some(root_slot)) = (inv.arg(0), inv.arg(1), inv.extra(0))
    else {
        return Err(SyscallError::TruncatedMessage);
    };

    let (root, asid) = resolve_root(registry, &cspace.cap(root_slot))?;
    if !mapped_asid.is_valid() {
        log_debug!(target: "mmu", "PageRemap: frame {:#x} is not mapped", base);
        return Err(SyscallError::InvalidCapability { index: 0 });
    }
    if mapped_asid != asid {
        return Err(SyscallError::InvalidCapability { index: 1 });
    }

    let vm_rights = mappable_rights(rights, rights_mask, 0)?;
    let entry = create_safe_mapping_entries(
        registry,
        registry.paddr_of(base),
        mapped_addr,
        size,
        vm_rights,
        VmAttributes::from_word(attr),
        root,
    )?;
    Ok(MmuOperation::PageRemap { entry })
}
