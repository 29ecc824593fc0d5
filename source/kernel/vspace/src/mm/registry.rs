// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: ASID table / ASID pools and VSpace-root resolution
//! OWNERS: @kernel-mm-team
//! PUBLIC API: VSpaceRegistry{find_vspace_for_asid, is_vtable_root, set_vm_root, delete_asid*, unmap_*}
//! DEPENDS_ON: mm::walk, hal::Machine, thread::Thread
//! INVARIANTS: Table entries change only if they still hold the pointer being removed;
//!             removing a binding re-resolves the running thread's root

use super::page_table::{clear_table, level_page_bits, slot, table_paddr};
use super::translate::AddressTranslator;
use super::walk::{lookup_by_target, lookup_pt_slot};
use super::{Pte, ASID_POOLS, ASID_POOL_SLOTS, KERNEL_BASE, PAGE_SIZE, PT_ENTRIES};
use crate::cap::{Cap, FrameSize};
use crate::error::LookupFault;
use crate::hal::Machine;
use crate::mm::pt_index;
use crate::thread::Thread;
use crate::types::{Asid, PAddr, PPtr};

/// In-memory layout of an ASID pool: kernel pointers to VSpace roots, 0 when unbound.
#[repr(C, align(4096))]
pub struct AsidPool {
    pub entries: [usize; ASID_POOL_SLOTS],
}

static_assertions::const_assert_eq!(core::mem::size_of::<AsidPool>(), PAGE_SIZE);

#[inline]
fn pool_entry(pool: PPtr, index: usize) -> usize {
    debug_assert!(index < ASID_POOL_SLOTS);
    let pool = pool.as_mut_ptr::<AsidPool>();
    // SAFETY: pool pointers come from the ASID table or an ASID pool capability, both of
    // which refer to live pool objects; `index` is masked to the pool size.
    unsafe { core::ptr::read_volatile(&(*pool).entries[index & (ASID_POOL_SLOTS - 1)]) }
}

#[inline]
fn set_pool_entry(pool: PPtr, index: usize, value: usize) {
    let pool = pool.as_mut_ptr::<AsidPool>();
    // SAFETY: see `pool_entry`.
    unsafe { core::ptr::write_volatile(&mut (*pool).entries[index & (ASID_POOL_SLOTS - 1)], value) }
}

/// Two-level ASID -> pool -> root map plus the global kernel root.
pub struct VSpaceRegistry<A> {
    tr: A,
    asid_table: [Option<PPtr>; ASID_POOLS],
    kernel_root: PPtr,
}

impl<A: AddressTranslator> VSpaceRegistry<A> {
    /// Registry over an empty ASID table. `kernel_root` holds the global kernel mappings.
    pub fn new(tr: A, kernel_root: PPtr) -> Self {
        Self { tr, asid_table: [None; ASID_POOLS], kernel_root }
    }

    pub fn translator(&self) -> &A {
        &self.tr
    }

    pub fn kernel_root(&self) -> PPtr {
        self.kernel_root
    }

    /// Pool installed at `index` of the ASID table.
    pub fn pool(&self, index: usize) -> Option<PPtr> {
        self.asid_table.get(index).copied().flatten()
    }

    /// Index of the first unused ASID-table entry.
    pub fn first_free_pool(&self) -> Option<usize> {
        self.asid_table.iter().position(Option::is_none)
    }

    /// First free ASID in `pool`, whose ASIDs start at `asid_base`. Slot 0 is never handed out.
    pub fn first_free_asid(&self, asid_base: Asid, pool: PPtr) -> Option<Asid> {
        (1..ASID_POOL_SLOTS)
            .find(|&index| pool_entry(pool, index) == 0)
            .map(|index| Asid::from_parts(asid_base.pool_index(), index))
    }

    /// Resolves `asid` to its VSpace root.
    pub fn find_vspace_for_asid(&self, asid: Asid) -> Result<PPtr, LookupFault> {
        let pool = self.pool(asid.pool_index()).ok_or(LookupFault::InvalidRoot)?;
        match pool_entry(pool, asid.slot_index()) {
            0 => Err(LookupFault::MissingCapability { bits_left: level_page_bits(1) }),
            root => Ok(PPtr::new(root)),
        }
    }

    /// `cap` is a page table currently bound as the root of its ASID.
    pub fn is_vtable_root(&self, cap: &Cap) -> bool {
        match *cap {
            Cap::PageTable { base, mapped_asid, .. } => {
                self.find_vspace_for_asid(mapped_asid) == Ok(base)
            }
            _ => false,
        }
    }

    /// Like [`is_vtable_root`](Self::is_vtable_root), additionally requiring the mapped flag.
    pub fn is_valid_native_root(&self, cap: &Cap) -> bool {
        matches!(cap, Cap::PageTable { is_mapped: true, .. }) && self.is_vtable_root(cap)
    }

    /// Replicates the kernel window of the global root into `root`.
    pub fn copy_global_mappings(&self, root: PPtr) {
        for index in pt_index(KERNEL_BASE, 1)..PT_ENTRIES {
            slot(root, index).write(slot(self.kernel_root, index).read());
        }
    }

    /// Slot of the parent entry pointing at `target` on the path of `vaddr` in `asid`'s VSpace.
    pub fn lookup_pt_slot_by_target(
        &self,
        asid: Asid,
        vaddr: usize,
        target: PPtr,
    ) -> Result<super::PteSlot, LookupFault> {
        let root = self.find_vspace_for_asid(asid)?;
        lookup_by_target(&self.tr, root, vaddr, table_paddr(&self.tr, target))
    }

    /// Installs a freshly created pool for ASIDs starting at `asid_base`.
    pub fn install_pool(&mut self, asid_base: Asid, pool: PPtr) {
        assert_eq!(asid_base.slot_index(), 0, "ASID pool base must be aligned");
        self.asid_table[asid_base.pool_index()] = Some(pool);
        log_debug!(target: "asid", "pool {} installed at {:#x}", asid_base.pool_index(), pool);
    }

    /// Binds `root` to `asid` in `pool`.
    pub fn bind_asid(&mut self, pool: PPtr, asid: Asid, root: PPtr) {
        set_pool_entry(pool, asid.slot_index(), root.raw());
    }

    /// Installs the translation root the running thread should use.
    ///
    /// Falls back to the global kernel root when the thread has no root capability or its
    /// ASID no longer resolves to that root.
    pub fn set_vm_root(&self, thread: &dyn Thread, machine: &dyn Machine) {
        let kernel = table_paddr(&self.tr, self.kernel_root);
        let Cap::PageTable { base, mapped_asid, .. } = thread.vtable_cap() else {
            machine.set_vspace_root(kernel, Asid::INVALID);
            return;
        };
        match self.find_vspace_for_asid(mapped_asid) {
            Ok(root) if root == base => {
                machine.set_vspace_root(table_paddr(&self.tr, base), mapped_asid);
            }
            _ => machine.set_vspace_root(kernel, mapped_asid),
        }
    }

    /// Removes `pool` from the ASID table if it is still installed for `asid_base`.
    pub fn delete_asid_pool(
        &mut self,
        asid_base: Asid,
        pool: PPtr,
        thread: &dyn Thread,
        machine: &dyn Machine,
    ) {
        assert_eq!(asid_base.slot_index(), 0, "ASID pool base must be aligned");
        let index = asid_base.pool_index();
        if self.asid_table[index] != Some(pool) {
            return;
        }
        for slot_index in 0..ASID_POOL_SLOTS {
            if pool_entry(pool, slot_index) != 0 {
                machine.flush_asid(Asid::from_parts(index, slot_index));
            }
        }
        self.asid_table[index] = None;
        log_debug!(target: "asid", "pool {} deleted", index);
        self.set_vm_root(thread, machine);
    }

    /// Unbinds `asid` if it is still bound to `root`.
    pub fn delete_asid(&mut self, asid: Asid, root: PPtr, thread: &dyn Thread, machine: &dyn Machine) {
        let Some(pool) = self.pool(asid.pool_index()) else {
            return;
        };
        if pool_entry(pool, asid.slot_index()) != root.raw() {
            return;
        }
        machine.flush_asid(asid);
        set_pool_entry(pool, asid.slot_index(), 0);
        log_debug!(target: "asid", "asid {} unbound", asid);
        self.set_vm_root(thread, machine);
    }

    /// Clears the entry that links the table at `table` into `asid`'s VSpace.
    ///
    /// Silently does nothing if the VSpace or the link no longer exists.
    pub fn unmap_page_table(&self, asid: Asid, vaddr: usize, table: PPtr, machine: &dyn Machine) {
        match self.lookup_pt_slot_by_target(asid, vaddr, table) {
            Ok(parent) => {
                parent.write(Pte::INVALID);
                machine.flush_all();
            }
            Err(fault) => {
                log_debug!(target: "mm", "unmap_page_table: no link for {:#x} ({})", table, fault);
            }
        }
    }

    /// Clears the leaf mapping frame `base` of `size` at `vaddr` in `asid`'s VSpace.
    ///
    /// Only an entry that still maps `base` at the frame's level is cleared.
    pub fn unmap_page(
        &self,
        size: FrameSize,
        asid: Asid,
        vaddr: usize,
        base: PPtr,
        machine: &dyn Machine,
    ) {
        let Ok(root) = self.find_vspace_for_asid(asid) else {
            return;
        };
        let Ok(found) = lookup_pt_slot(&self.tr, root, vaddr, size.level()) else {
            return;
        };
        let pte = found.slot.read();
        if found.level != size.level() || !pte.is_leaf() || pte.paddr() != self.paddr_of(base) {
            return;
        }
        found.slot.write(Pte::INVALID);
        machine.flush_all();
    }

    /// Zeroes a table that has just been unlinked.
    pub fn clear_table(&self, table: PPtr) {
        clear_table(table);
    }

    pub fn paddr_of(&self, pptr: PPtr) -> PAddr {
        self.tr.paddr_from_pptr(pptr)
    }

    pub fn pptr_of(&self, paddr: PAddr) -> PPtr {
        self.tr.pptr_from_paddr(paddr)
    }
}
