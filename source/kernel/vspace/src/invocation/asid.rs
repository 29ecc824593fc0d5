// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! ASID control and ASID pool decode.

use super::{Invocation, MmuLabel, MmuOperation};
use crate::cap::{CSpace, Cap};
use crate::error::{LookupFault, SyscallError};
use crate::mm::{AddressTranslator, VSpaceRegistry, ASID_POOL_BITS};
use crate::types::Asid;

pub(super) fn decode_control<A: AddressTranslator>(
    registry: &VSpaceRegistry<A>,
    cspace: &dyn CSpace,
    label: Option<MmuLabel>,
    inv: &Invocation<'_>,
) -> Result<MmuOperation, SyscallError> {
    if label != Some(MmuLabel::AsidControlMakePool) {
        return Err(SyscallError::IllegalOperation);
    }
    let (Some(index), Some(depth), Some(parent), Some(root_slot)) =
        (inv.arg(0), inv.arg(1), inv.extra(0), inv.extra(1))
    else {
        return Err(SyscallError::TruncatedMessage);
    };

    let Some(pool_index) = registry.first_free_pool() else {
        log_debug!(target: "asid", "MakePool: ASID table full");
        return Err(SyscallError::DeleteFirst);
    };
    let asid_base = Asid::from_parts(pool_index, 0);

    let frame = match cspace.cap(parent) {
        Cap::Untyped { base, size_bits, is_device: false, .. } if size_bits == ASID_POOL_BITS => base,
        _ => return Err(SyscallError::InvalidCapability { index: 1 }),
    };
    cspace.ensure_no_children(parent)?;

    let dest = cspace.lookup_target_slot(cspace.cap(root_slot), index, depth)?;
    cspace.ensure_empty_slot(dest)?;

    Ok(MmuOperation::AsidControlMakePool { frame, dest, parent, asid_base })
}

pub(super) fn decode_pool<A: AddressTranslator>(
    registry: &VSpaceRegistry<A>,
    cspace: &dyn CSpace,
    cap: Cap,
    label: Option<MmuLabel>,
    inv: &Invocation<'_>,
) -> Result<MmuOperation, SyscallError> {
    let Cap::AsidPool { asid_base, pool: cap_pool } = cap else {
        return Err(SyscallError::InvalidCapability { index: 0 });
    };
    if label != Some(MmuLabel::AsidPoolAssign) {
        return Err(SyscallError::IllegalOperation);
    }
    let Some(vspace_slot) = inv.extra(0) else {
        return Err(SyscallError::TruncatedMessage);
    };

    match cspace.cap(vspace_slot) {
        Cap::PageTable { is_mapped: false, mapped_asid, .. } if !mapped_asid.is_valid() => {}
        _ => {
            log_debug!(target: "asid", "PoolAssign: slot {} is not an unbound root", vspace_slot.index());
            return Err(SyscallError::InvalidCapability { index: 1 });
        }
    }

    let Some(pool) = registry.pool(asid_base.pool_index()) else {
        return Err(SyscallError::lookup(LookupFault::InvalidRoot));
    };
    if pool != cap_pool {
        return Err(SyscallError::InvalidCapability { index: 0 });
    }

    let Some(asid) = registry.first_free_asid(asid_base, pool) else {
        log_debug!(target: "asid", "PoolAssign: pool {} full", asid_base.pool_index());
        return Err(SyscallError::DeleteFirst);
    };

    Ok(MmuOperation::AsidPoolAssign { asid, pool, vspace_slot })
}
