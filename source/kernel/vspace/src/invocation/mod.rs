// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: MMU capability invocations (page tables, frames, ASID control and pools)
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Invocation, MmuLabel, MmuOperation, decode_mmu_invocation, perform_mmu_invocation,
//!             invoke_mmu, MmuContext
//! DEPENDS_ON: mm::{walk, VSpaceRegistry}, cap::CSpace, hal::Machine, thread::Thread
//! INVARIANTS: Decode→Perform; decode reads state only; perform is infallible and flushes the
//!             local TLB after every structural PTE write

mod asid;
mod frame;
mod page_table;
mod perform;

pub use frame::{create_safe_mapping_entries, MappingEntry};
pub use perform::perform_mmu_invocation;

use crate::cap::{CSpace, Cap};
use crate::error::SyscallError;
use crate::hal::Machine;
use crate::mm::{AddressTranslator, Pte, PteSlot, VSpaceRegistry};
use crate::thread::Thread;
use crate::types::{Asid, PAddr, PPtr, SlotId};

/// Message labels understood by the MMU invocations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum MmuLabel {
    PageTableMap = 1,
    PageTableUnmap = 2,
    PageMap = 3,
    PageRemap = 4,
    PageUnmap = 5,
    PageGetAddress = 6,
    AsidControlMakePool = 7,
    AsidPoolAssign = 8,
}

impl TryFrom<usize> for MmuLabel {
    type Error = SyscallError;

    fn try_from(raw: usize) -> Result<Self, Self::Error> {
        Ok(match raw {
            1 => MmuLabel::PageTableMap,
            2 => MmuLabel::PageTableUnmap,
            3 => MmuLabel::PageMap,
            4 => MmuLabel::PageRemap,
            5 => MmuLabel::PageUnmap,
            6 => MmuLabel::PageGetAddress,
            7 => MmuLabel::AsidControlMakePool,
            8 => MmuLabel::AsidPoolAssign,
            _ => return Err(SyscallError::IllegalOperation),
        })
    }
}

/// One capability invocation as delivered by the syscall layer.
#[derive(Clone, Copy, Debug)]
pub struct Invocation<'a> {
    pub label: usize,
    /// Slot of the invoked capability.
    pub target: SlotId,
    /// Untyped message words.
    pub args: &'a [usize],
    /// Slots of the extra capabilities, in message order.
    pub extra_caps: &'a [SlotId],
}

impl Invocation<'_> {
    #[inline]
    fn arg(&self, index: usize) -> Option<usize> {
        self.args.get(index).copied()
    }

    #[inline]
    fn extra(&self, index: usize) -> Option<SlotId> {
        self.extra_caps.get(index).copied()
    }
}

/// Fully validated operation, ready for [`perform_mmu_invocation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MmuOperation {
    /// Link a page table: write `pte` to `pt_slot`, store `cap` (now mapped) at `slot`.
    PageTableMap { cap: Cap, slot: SlotId, pte: Pte, pt_slot: PteSlot },
    PageTableUnmap { cap: Cap, slot: SlotId },
    /// Map a frame: store `cap` (now mapped) at `slot` and install `entry`.
    PageMap { cap: Cap, slot: SlotId, entry: MappingEntry },
    /// Rewrite the rights of an existing mapping.
    PageRemap { entry: MappingEntry },
    PageUnmap { cap: Cap, slot: SlotId },
    PageGetAddress { paddr: PAddr },
    /// Turn the untyped at `parent` into a pool at `frame` for ASIDs from `asid_base`.
    AsidControlMakePool { frame: PPtr, dest: SlotId, parent: SlotId, asid_base: Asid },
    /// Bind the root at `vspace_slot` to `asid` in `pool`.
    AsidPoolAssign { asid: Asid, pool: PPtr, vspace_slot: SlotId },
}

/// Validates `inv` against the current state and resolves it into an [`MmuOperation`].
pub fn decode_mmu_invocation<A: AddressTranslator>(
    registry: &VSpaceRegistry<A>,
    cspace: &dyn CSpace,
    inv: &Invocation<'_>,
) -> Result<MmuOperation, SyscallError> {
    let label = MmuLabel::try_from(inv.label).ok();
    let cap = cspace.cap(inv.target);
    let decoded = match cap {
        Cap::PageTable { .. } => page_table::decode(registry, cspace, cap, label, inv),
        Cap::Frame { .. } => frame::decode(registry, cspace, cap, label, inv),
        Cap::AsidControl => asid::decode_control(registry, cspace, label, inv),
        Cap::AsidPool { .. } => asid::decode_pool(registry, cspace, cap, label, inv),
        _ => Err(SyscallError::InvalidCapability { index: 0 }),
    };
    if let Err(err) = decoded {
        log_debug!(
            target: "mmu",
            "label {} on slot {} rejected: {}",
            inv.label,
            inv.target.index(),
            err
        );
    }
    decoded
}

/// State the executor mutates.
pub struct MmuContext<'a, A> {
    pub registry: &'a mut VSpaceRegistry<A>,
    pub cspace: &'a mut dyn CSpace,
    pub machine: &'a dyn Machine,
    /// The invoking thread, which receives any reply.
    pub thread: &'a mut dyn Thread,
}

/// Decodes and, on success, performs `inv`.
pub fn invoke_mmu<A: AddressTranslator>(
    ctx: &mut MmuContext<'_, A>,
    inv: &Invocation<'_>,
) -> Result<(), SyscallError> {
    let op = decode_mmu_invocation(&*ctx.registry, &*ctx.cspace, inv)?;
    perform_mmu_invocation(ctx, op);
    Ok(())
}

/// Root base and ASID of `cap` if it is a bound VSpace root; otherwise the extra cap is bad.
fn resolve_root<A: AddressTranslator>(
    registry: &VSpaceRegistry<A>,
    cap: &Cap,
) -> Result<(PPtr, Asid), SyscallError> {
    match *cap {
        Cap::PageTable { base, mapped_asid, .. } if registry.is_vtable_root(cap) => {
            Ok((base, mapped_asid))
        }
        _ => Err(SyscallError::InvalidCapability { index: 1 }),
    }
}
