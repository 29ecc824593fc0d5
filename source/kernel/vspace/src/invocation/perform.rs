// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Execution of decoded MMU operations.

use super::{MmuContext, MmuOperation};
use crate::cap::Cap;
use crate::mm::{AddressTranslator, VSpaceRegistry, ASID_POOL_BITS};
use crate::thread::{message_info, Register};
use crate::types::{Asid, PPtr, SlotId};

/// Applies `op`. Cannot fail: anything unexpected here is a kernel bug and panics.
pub fn perform_mmu_invocation<A: AddressTranslator>(ctx: &mut MmuContext<'_, A>, op: MmuOperation) {
    log_trace!(target: "mmu", "perform {:?}", op);
    match op {
        MmuOperation::PageTableMap { cap, slot, pte, pt_slot } => {
            ctx.cspace.set_cap(slot, cap);
            pt_slot.write(pte);
            ctx.machine.flush_all();
            if let Cap::PageTable { mapped_asid, .. } = cap {
                verify_asid(ctx.registry, mapped_asid);
            }
        }
        MmuOperation::PageTableUnmap { cap, slot } => unmap_page_table(ctx, cap, slot),
        MmuOperation::PageMap { cap, slot, entry } => {
            ctx.cspace.set_cap(slot, cap);
            entry.slot.write(entry.pte);
            ctx.machine.flush_all();
            if let Cap::Frame { mapped_asid, .. } = cap {
                verify_asid(ctx.registry, mapped_asid);
            }
        }
        MmuOperation::PageRemap { entry } => {
            entry.slot.write(entry.pte);
            ctx.machine.flush_all();
        }
        MmuOperation::PageUnmap { cap, slot } => unmap_page(ctx, cap, slot),
        MmuOperation::PageGetAddress { paddr } => {
            ctx.thread.set_register(Register::Msg(0), paddr.raw());
            ctx.thread.set_register(Register::MsgInfo, message_info(0, 0, 0, 1));
        }
        MmuOperation::AsidControlMakePool { frame, dest, parent, asid_base } => {
            make_pool(ctx, frame, dest, parent, asid_base)
        }
        MmuOperation::AsidPoolAssign { asid, pool, vspace_slot } => {
            let Cap::PageTable { base, .. } = ctx.cspace.cap(vspace_slot) else {
                panic!("ASID assign: slot {} lost its root", vspace_slot.index());
            };
            ctx.cspace.set_cap(
                vspace_slot,
                Cap::PageTable { base, is_mapped: true, mapped_asid: asid, mapped_addr: 0 },
            );
            ctx.registry.copy_global_mappings(base);
            ctx.registry.bind_asid(pool, asid, base);
            log_debug!(target: "asid", "asid {} -> root {:#x}", asid, base);
        }
    }
}

fn unmap_page_table<A: AddressTranslator>(ctx: &mut MmuContext<'_, A>, cap: Cap, slot: SlotId) {
    let Cap::PageTable { base, is_mapped, mapped_asid, mapped_addr } = cap else {
        panic!("PageTableUnmap on non page-table cap");
    };
    if is_mapped {
        ctx.registry.unmap_page_table(mapped_asid, mapped_addr, base, ctx.machine);
        ctx.registry.clear_table(base);
    }
    ctx.cspace.set_cap(slot, Cap::page_table(base));
}

fn unmap_page<A: AddressTranslator>(ctx: &mut MmuContext<'_, A>, cap: Cap, slot: SlotId) {
    let Cap::Frame { base, size, rights, mapped_asid, mapped_addr } = cap else {
        panic!("PageUnmap on non frame cap");
    };
    if mapped_asid.is_valid() {
        ctx.registry.unmap_page(size, mapped_asid, mapped_addr, base, ctx.machine);
    }
    ctx.cspace.set_cap(slot, Cap::frame(base, size, rights));
}

fn make_pool<A: AddressTranslator>(
    ctx: &mut MmuContext<'_, A>,
    frame: PPtr,
    dest: SlotId,
    parent: SlotId,
    asid_base: Asid,
) {
    let Cap::Untyped { base, size_bits, is_device, .. } = ctx.cspace.cap(parent) else {
        panic!("MakePool: parent slot {} lost its untyped", parent.index());
    };
    ctx.cspace.set_cap(
        parent,
        Cap::Untyped { base, size_bits, is_device, free_index: 1 << size_bits },
    );
    // SAFETY: `frame` is the whole of a non-device untyped object of ASID_POOL_BITS with no
    // children, so nothing else refers to this memory.
    unsafe { core::ptr::write_bytes(frame.as_mut_ptr::<u8>(), 0, 1 << ASID_POOL_BITS) };
    ctx.cspace.insert(Cap::AsidPool { asid_base, pool: frame }, parent, dest);
    ctx.registry.install_pool(asid_base, frame);
}

#[cfg(feature = "debug_pt_verify")]
fn verify_asid<A: AddressTranslator>(registry: &VSpaceRegistry<A>, asid: Asid) {
    let Ok(root) = registry.find_vspace_for_asid(asid) else {
        return;
    };
    if let Err(violation) = crate::mm::verify::verify_vspace(registry.translator(), root) {
        log_error!(target: "mmu", "vspace {} inconsistent after update: {:?}", asid, violation);
    }
}

#[cfg(not(feature = "debug_pt_verify"))]
#[inline(always)]
fn verify_asid<A: AddressTranslator>(_registry: &VSpaceRegistry<A>, _asid: Asid) {}
