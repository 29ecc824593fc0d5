// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot-time construction of the global kernel VSpace and the initial ASID binding.

use super::page_table::{level_page_bits, pt_index, slot, table_paddr};
use super::registry::VSpaceRegistry;
use super::translate::AddressTranslator;
use super::{Pte, IT_ASID, KERNEL_BASE, PAGE_BITS, PT_ENTRIES, PT_LEVELS};
use crate::cap::Cap;
use crate::hal::Machine;
use crate::types::{Asid, PAddr, PPtr};

/// Invariant broken while building the boot address space.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BootError {
    /// Physical base not aligned to the root-level page size.
    UnalignedPhysBase,
    /// Window larger than the kernel half of the root table.
    WindowTooLarge,
    /// A capability of the wrong type was supplied.
    WrongCapType,
}

impl core::fmt::Display for BootError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BootError::UnalignedPhysBase => f.write_str("kernel physical base misaligned"),
            BootError::WindowTooLarge => f.write_str("kernel window exceeds upper half"),
            BootError::WrongCapType => f.write_str("unexpected capability type"),
        }
    }
}

impl<A: AddressTranslator> VSpaceRegistry<A> {
    /// Maps `2^window_bits` bytes of physical memory from `phys_base` at `KERNEL_BASE`, global
    /// and supervisor-only.
    ///
    /// Root-level superpages are used when `phys_base` is aligned to the root granule. Otherwise
    /// the window is built from next-level superpages in `window_table`, a zeroed table hung off
    /// the first kernel root entry, and must fit in it. Returns the number of leaves written.
    pub fn map_kernel_window(
        &self,
        phys_base: PAddr,
        window_bits: usize,
        window_table: Option<PPtr>,
    ) -> Result<usize, BootError> {
        let first = pt_index(KERNEL_BASE, 1);
        let root_bits = level_page_bits(1);
        if phys_base.is_aligned(root_bits) {
            let count = window_pages(window_bits, root_bits)?;
            if first + count > PT_ENTRIES {
                return Err(BootError::WindowTooLarge);
            }
            fill_window(self.kernel_root(), first, phys_base, root_bits, count);
            self.log_window(count, root_bits, phys_base);
            return Ok(count);
        }

        let table = window_table.ok_or(BootError::UnalignedPhysBase)?;
        let page_bits = level_page_bits(2);
        if !phys_base.is_aligned(page_bits) {
            return Err(BootError::UnalignedPhysBase);
        }
        let count = window_pages(window_bits, page_bits)?;
        let base = pt_index(KERNEL_BASE, 2);
        if base + count > PT_ENTRIES {
            return Err(BootError::WindowTooLarge);
        }
        fill_window(table, base, phys_base, page_bits, count);
        slot(self.kernel_root(), first).write(Pte::table(table_paddr(self.translator(), table)));
        self.log_window(count, page_bits, phys_base);
        Ok(count)
    }

    fn log_window(&self, count: usize, page_bits: usize, phys_base: PAddr) {
        log_info!(
            target: "mm",
            "kernel window: {} x {} KiB from pa {:#x}",
            count,
            (1usize << page_bits) >> 10,
            phys_base
        );
    }

    /// Installs a 4 KiB global kernel mapping of `paddr` at `vaddr` in the last-level kernel
    /// table `kernel_pt`.
    pub fn map_kernel_frame(&self, kernel_pt: PPtr, paddr: PAddr, vaddr: usize) {
        assert!(vaddr >= KERNEL_BASE, "kernel frame below the kernel window");
        debug_assert!(paddr.is_aligned(PAGE_BITS));
        slot(kernel_pt, pt_index(vaddr, PT_LEVELS)).write(Pte::kernel(paddr));
    }

    /// Switches the hart onto the global kernel VSpace.
    pub fn activate_kernel_vspace(&self, machine: &dyn Machine) {
        machine.set_vspace_root(table_paddr(self.translator(), self.kernel_root()), Asid::INVALID);
    }

    /// Binds the initial thread's root to [`IT_ASID`] in the initial pool and installs the pool.
    pub fn write_it_asid_pool(&mut self, pool_cap: &Cap, root_cap: &Cap) -> Result<(), BootError> {
        let (Cap::AsidPool { pool, .. }, Cap::PageTable { base, .. }) = (*pool_cap, *root_cap) else {
            return Err(BootError::WrongCapType);
        };
        self.bind_asid(pool, IT_ASID, base);
        self.install_pool(Asid::from_parts(IT_ASID.pool_index(), 0), pool);
        Ok(())
    }
}

/// Number of `2^page_bits` leaves covering `2^window_bits` bytes, at least one.
fn window_pages(window_bits: usize, page_bits: usize) -> Result<usize, BootError> {
    u32::try_from(window_bits.saturating_sub(page_bits))
        .ok()
        .and_then(|shift| 1usize.checked_shl(shift))
        .ok_or(BootError::WindowTooLarge)
}

fn fill_window(table: PPtr, first: usize, phys_base: PAddr, page_bits: usize, count: usize) {
    for i in 0..count {
        slot(table, first + i).write(Pte::kernel(phys_base.offset(i << page_bits)));
    }
}
