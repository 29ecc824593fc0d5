// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Packed RISC-V page-table entry.
//!
//! Layout: `V R W X U G A D RSW[9:8] PPN[..:10]`. A valid entry with `R`, `W` and `X`
//! all clear points at the next-level table; any of them set marks a leaf.

use bitflags::bitflags;
use core::fmt;

use super::PAGE_BITS;
use crate::cap::VmRights;
use crate::types::PAddr;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Flag bits stored in the low byte of a PTE.
    pub struct PteFlags: usize {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
        const RSW0 = 1 << 8;
        const RSW1 = 1 << 9;
    }
}

const LEAF_PERMS: PteFlags = PteFlags::READ.union(PteFlags::WRITE).union(PteFlags::EXECUTE);
const PPN_SHIFT: usize = 10;
const FLAGS_MASK: usize = (1 << PPN_SHIFT) - 1;

/// One translation entry. Only constructed through the builders below.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Pte(usize);

static_assertions::assert_eq_size!(Pte, usize);

impl Pte {
    /// The all-zero invalid entry.
    pub const INVALID: Pte = Pte(0);

    #[inline]
    const fn with(paddr: PAddr, flags: PteFlags) -> Self {
        Pte((paddr.ppn() << PPN_SHIFT) | flags.bits())
    }

    /// Pointer to a next-level user page table.
    #[inline]
    pub const fn table(paddr: PAddr) -> Self {
        Self::with(paddr, PteFlags::VALID)
    }

    /// Leaf visible to user mode.
    ///
    /// Rights that would grant neither read, write nor execute yield [`Pte::INVALID`], and
    /// write access is only granted together with read since `W` without `R` is reserved.
    pub fn user(paddr: PAddr, executable: bool, rights: VmRights) -> Self {
        let mut flags = PteFlags::empty();
        flags.set(PteFlags::READ, rights.allows_user_read());
        flags.set(PteFlags::WRITE, rights.allows_user_write());
        flags.set(PteFlags::EXECUTE, executable);
        if !flags.intersects(LEAF_PERMS) {
            return Pte::INVALID;
        }
        flags.set(PteFlags::USER, rights != VmRights::KernelOnly);
        Self::with(paddr, flags | PteFlags::VALID | PteFlags::ACCESSED | PteFlags::DIRTY)
    }

    /// Global supervisor leaf with full permissions, used for the kernel window.
    #[inline]
    pub const fn kernel(paddr: PAddr) -> Self {
        Self::with(
            paddr,
            PteFlags::VALID
                .union(LEAF_PERMS)
                .union(PteFlags::GLOBAL)
                .union(PteFlags::ACCESSED)
                .union(PteFlags::DIRTY),
        )
    }

    #[inline]
    pub const fn from_bits(raw: usize) -> Self {
        Pte(raw)
    }

    #[inline]
    pub const fn bits(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & FLAGS_MASK)
    }

    #[inline]
    pub const fn ppn(self) -> usize {
        self.0 >> PPN_SHIFT
    }

    /// Returns a copy targeting physical page `ppn` with the same flags.
    #[inline]
    pub const fn with_ppn(self, ppn: usize) -> Self {
        Pte((ppn << PPN_SHIFT) | (self.0 & FLAGS_MASK))
    }

    #[inline]
    pub const fn paddr(self) -> PAddr {
        PAddr::new(self.ppn() << PAGE_BITS)
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 & PteFlags::VALID.bits() != 0
    }

    /// Valid entry mapping memory (any of R/W/X set).
    #[inline]
    pub const fn is_leaf(self) -> bool {
        self.is_valid() && self.0 & LEAF_PERMS.bits() != 0
    }

    /// Valid entry pointing at a next-level table.
    #[inline]
    pub const fn is_table(self) -> bool {
        self.is_valid() && self.0 & LEAF_PERMS.bits() == 0
    }

    #[inline]
    pub const fn is_global(self) -> bool {
        self.0 & PteFlags::GLOBAL.bits() != 0
    }

    #[inline]
    pub const fn is_executable(self) -> bool {
        self.0 & PteFlags::EXECUTE.bits() != 0
    }
}

impl fmt::Debug for Pte {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pte")
            .field("ppn", &format_args!("{:#x}", self.ppn()))
            .field("flags", &self.flags())
            .finish()
    }
}
