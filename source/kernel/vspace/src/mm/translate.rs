// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Physical <-> kernel-virtual address translation.

use crate::types::{PAddr, PPtr};

/// Bijective translation between physical addresses and the kernel's view of them.
///
/// Injected into every walker instead of casting addresses ambiently.
pub trait AddressTranslator {
    fn pptr_from_paddr(&self, paddr: PAddr) -> PPtr;
    fn paddr_from_pptr(&self, pptr: PPtr) -> PAddr;
}

/// Constant-offset physical window (`pptr = paddr + offset`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearMap {
    offset: usize,
}

impl LinearMap {
    /// Window where physical address `phys_base` appears at kernel pointer `virt_base`.
    pub const fn new(phys_base: usize, virt_base: usize) -> Self {
        Self { offset: virt_base.wrapping_sub(phys_base) }
    }
}

impl AddressTranslator for LinearMap {
    #[inline]
    fn pptr_from_paddr(&self, paddr: PAddr) -> PPtr {
        PPtr::new(paddr.raw().wrapping_add(self.offset))
    }

    #[inline]
    fn paddr_from_pptr(&self, pptr: PPtr) -> PAddr {
        PAddr::new(pptr.raw().wrapping_sub(self.offset))
    }
}
