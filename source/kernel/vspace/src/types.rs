// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Address and identifier newtypes shared by the VM subsystem
//! OWNERS: @kernel-mm-team
//! PUBLIC API: PAddr, PPtr, Asid, SlotId
//! DEPENDS_ON: mm::{PAGE_BITS, ASID_LOW_BITS}
//! INVARIANTS: Physical addresses and kernel pointers never mix without an AddressTranslator

use core::fmt;

use crate::mm::{ASID_HIGH_BITS, ASID_LOW_BITS, PAGE_BITS};

/// Physical address as seen by the MMU.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PAddr(usize);

impl PAddr {
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    /// Physical page number.
    #[inline]
    pub const fn ppn(self) -> usize {
        self.0 >> PAGE_BITS
    }

    #[inline]
    pub const fn from_ppn(ppn: usize) -> Self {
        Self(ppn << PAGE_BITS)
    }

    #[inline]
    pub const fn is_aligned(self, bits: usize) -> bool {
        self.0 & ((1 << bits) - 1) == 0
    }

    #[inline]
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::LowerHex for PAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Kernel-virtual pointer to a kernel object (page table, ASID pool, frame).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PPtr(usize);

impl PPtr {
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }

    #[inline]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl fmt::LowerHex for PPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Address-space identifier: a pool index in the high bits and a pool slot in the low bits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Asid(u16);

impl Asid {
    /// Reserved "not bound" ASID; also the ASID of the global kernel VSpace.
    pub const INVALID: Asid = Asid(0);
    /// Number of distinct ASIDs.
    pub const COUNT: usize = 1 << (ASID_HIGH_BITS + ASID_LOW_BITS);

    #[inline]
    pub const fn new(raw: u16) -> Self {
        Self(raw)
    }

    /// Builds an ASID from its pool and slot coordinates.
    #[inline]
    pub const fn from_parts(pool: usize, slot: usize) -> Self {
        Self(((pool << ASID_LOW_BITS) | (slot & ((1 << ASID_LOW_BITS) - 1))) as u16)
    }

    #[inline]
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Index into the ASID table.
    #[inline]
    pub const fn pool_index(self) -> usize {
        self.0 as usize >> ASID_LOW_BITS
    }

    /// Index into the pool's array.
    #[inline]
    pub const fn slot_index(self) -> usize {
        self.0 as usize & ((1 << ASID_LOW_BITS) - 1)
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Asid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pool_index(), self.slot_index())
    }
}

/// Index of a capability slot in the caller's capability space.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SlotId(pub usize);

impl SlotId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}
