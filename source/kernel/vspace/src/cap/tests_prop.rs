// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for VM-rights masking
//! OWNERS: @kernel-cap-team
//! NOTE: Tests only; no kernel logic. Ensures masking can only narrow access.
//!
//! TEST_SCOPE:
//!   - mask_vm_rights never grants read/write the input rights lacked
//!   - full masks are the identity
//!   - PTE encoding of masked rights never sets write without read
//!
//! TEST_SCENARIOS:
//!   - masking_never_escalates(): user read/write after masking imply both rights and mask allowed it
//!   - full_mask_is_identity(): READ|WRITE leaves rights untouched
//!   - user_pte_never_write_only(): encoded leaf has W only alongside R

use super::{mask_vm_rights, CapRights, VmRights};
use crate::mm::{Pte, PteFlags};
use crate::types::PAddr;
use proptest::prelude::*;

fn arb_vm_rights() -> impl Strategy<Value = VmRights> {
    prop_oneof![
        Just(VmRights::NoAccess),
        Just(VmRights::KernelOnly),
        Just(VmRights::ReadOnly),
        Just(VmRights::ReadWrite),
        Just(VmRights::WriteOnly),
    ]
}

fn arb_mask() -> impl Strategy<Value = CapRights> {
    (0usize..16).prop_map(CapRights::from_word)
}

fn grants_read(rights: VmRights) -> bool {
    matches!(rights, VmRights::ReadOnly | VmRights::ReadWrite)
}

fn grants_write(rights: VmRights) -> bool {
    matches!(rights, VmRights::WriteOnly | VmRights::ReadWrite)
}

proptest! {
    #[test]
    fn masking_never_escalates(rights in arb_vm_rights(), mask in arb_mask()) {
        let masked = mask_vm_rights(rights, mask);
        if grants_read(masked) {
            prop_assert!(grants_read(rights));
            prop_assert!(mask.contains(CapRights::READ));
        }
        if grants_write(masked) {
            prop_assert!(grants_write(rights));
            prop_assert!(mask.contains(CapRights::WRITE));
        }
        prop_assert_eq!(masked == VmRights::KernelOnly, rights == VmRights::KernelOnly);
    }

    #[test]
    fn full_mask_is_identity(rights in arb_vm_rights(), extra in 0usize..4) {
        let mask = CapRights::READ | CapRights::WRITE | CapRights::from_word(extra << 2);
        prop_assert_eq!(mask_vm_rights(rights, mask), rights);
    }

    #[test]
    fn user_pte_never_write_only(
        rights in arb_vm_rights(),
        mask in arb_mask(),
        executable in any::<bool>(),
        ppn in 0x8_0000usize..0x10_0000,
    ) {
        let pte = Pte::user(PAddr::from_ppn(ppn), executable, mask_vm_rights(rights, mask));
        let flags = pte.flags();
        if flags.contains(PteFlags::WRITE) {
            prop_assert!(flags.contains(PteFlags::READ));
        }
        if pte.is_valid() {
            prop_assert!(pte.is_leaf());
            prop_assert_eq!(pte.ppn(), ppn);
        }
    }
}
