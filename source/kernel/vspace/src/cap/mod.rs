// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Architecture capabilities for the VM subsystem and VM-rights masking
//! OWNERS: @kernel-cap-team
//! PUBLIC API: Cap, FrameSize, VmRights, CapRights, VmAttributes, mask_vm_rights, CSpace, CapTable
//! DEPENDS_ON: types::{PPtr, Asid, SlotId}, mm::PT_LEVELS
//! INVARIANTS: Rights only ever narrow; mapped ASID/address fields mirror the hardware PTE

use bitflags::bitflags;

use crate::mm::{PAGE_BITS, PT_INDEX_BITS, PT_LEVELS};
use crate::types::{Asid, PPtr};

mod table;

pub use table::{CSpace, CapError, CapTable};

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    /// Generic capability rights word supplied by callers as a mask.
    pub struct CapRights: usize {
        const WRITE = 1 << 0;
        const READ = 1 << 1;
        const GRANT = 1 << 2;
        const GRANT_REPLY = 1 << 3;
    }
}

impl CapRights {
    /// Decodes a message word, ignoring unknown bits.
    pub const fn from_word(word: usize) -> Self {
        Self::from_bits_truncate(word)
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    /// Mapping attributes supplied with frame map/remap.
    pub struct VmAttributes: usize {
        const EXECUTE_NEVER = 1 << 0;
    }
}

impl VmAttributes {
    pub const fn from_word(word: usize) -> Self {
        Self::from_bits_truncate(word)
    }
}

/// Access rights recorded in a frame capability.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmRights {
    NoAccess,
    KernelOnly,
    ReadOnly,
    ReadWrite,
    WriteOnly,
}

impl VmRights {
    pub(crate) const fn allows_user_read(self) -> bool {
        matches!(self, VmRights::ReadOnly | VmRights::ReadWrite)
    }

    pub(crate) const fn allows_user_write(self) -> bool {
        matches!(self, VmRights::ReadWrite)
    }
}

/// Narrows `rights` by `mask`. Never grants anything `rights` did not already include.
pub fn mask_vm_rights(rights: VmRights, mask: CapRights) -> VmRights {
    let read = mask.contains(CapRights::READ);
    let write = mask.contains(CapRights::WRITE);
    match rights {
        VmRights::NoAccess => VmRights::NoAccess,
        VmRights::KernelOnly => VmRights::KernelOnly,
        VmRights::ReadOnly if read => VmRights::ReadOnly,
        VmRights::ReadWrite if read && write => VmRights::ReadWrite,
        VmRights::ReadWrite if read => VmRights::ReadOnly,
        VmRights::ReadWrite if write => VmRights::WriteOnly,
        VmRights::WriteOnly if write => VmRights::WriteOnly,
        _ => VmRights::NoAccess,
    }
}

/// Frame size classes, one per level that may hold a leaf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameSize {
    /// 4 KiB.
    Small,
    /// 2 MiB.
    Mega,
    /// 1 GiB.
    Giga,
    /// 512 GiB.
    #[cfg(feature = "sv48")]
    Tera,
}

impl FrameSize {
    /// log2 of the frame size in bytes.
    pub const fn bits(self) -> usize {
        match self {
            FrameSize::Small => PAGE_BITS,
            FrameSize::Mega => PAGE_BITS + PT_INDEX_BITS,
            FrameSize::Giga => PAGE_BITS + 2 * PT_INDEX_BITS,
            #[cfg(feature = "sv48")]
            FrameSize::Tera => PAGE_BITS + 3 * PT_INDEX_BITS,
        }
    }

    pub const fn bytes(self) -> usize {
        1 << self.bits()
    }

    /// Level of the table a leaf of this size lives in.
    pub const fn level(self) -> usize {
        PT_LEVELS - (self.bits() - PAGE_BITS) / PT_INDEX_BITS
    }
}

/// Capabilities the VM subsystem inspects or produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Cap {
    #[default]
    Null,
    /// Untyped memory at `base`, `2^size_bits` bytes, `free_index` bytes already retyped.
    Untyped { base: PPtr, size_bits: usize, is_device: bool, free_index: usize },
    /// Capability-space node with `2^radix_bits` slots.
    CNode { radix_bits: usize },
    /// Page table (root or intermediate).
    PageTable { base: PPtr, is_mapped: bool, mapped_asid: Asid, mapped_addr: usize },
    Frame { base: PPtr, size: FrameSize, rights: VmRights, mapped_asid: Asid, mapped_addr: usize },
    AsidControl,
    AsidPool { asid_base: Asid, pool: PPtr },
}

impl Cap {
    /// Fresh, unmapped page-table capability.
    pub const fn page_table(base: PPtr) -> Self {
        Cap::PageTable { base, is_mapped: false, mapped_asid: Asid::INVALID, mapped_addr: 0 }
    }

    /// Fresh, unmapped frame capability.
    pub const fn frame(base: PPtr, size: FrameSize, rights: VmRights) -> Self {
        Cap::Frame { base, size, rights, mapped_asid: Asid::INVALID, mapped_addr: 0 }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Cap::Null)
    }
}

#[cfg(test)]
mod tests_prop;
