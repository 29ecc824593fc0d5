// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the page-table walker
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - holes are reported at the level they occur, sized to that level
//!   - a leaf written where the walk ends is found again by a full lookup
//!
//! TEST_SCENARIOS:
//!   - empty_root_is_a_root_sized_hole(): any user address, any target level >= 2
//!   - installed_leaf_translates(): random address, size and offset resolve through the leaf

use super::page_table::slot;
use super::walk::{lookup_leaf, lookup_pt_slot};
use super::*;
use crate::cap::{FrameSize, VmRights};
use crate::error::LookupFault;
use crate::testutil::PhysArena;
use crate::types::PAddr;
use proptest::prelude::*;

fn arb_user_vaddr() -> impl Strategy<Value = usize> {
    0usize..USER_TOP
}

fn arb_size() -> impl Strategy<Value = FrameSize> {
    prop_oneof![Just(FrameSize::Small), Just(FrameSize::Mega), Just(FrameSize::Giga)]
}

proptest! {
    #[test]
    fn empty_root_is_a_root_sized_hole(vaddr in arb_user_vaddr(), max_level in 2usize..=PT_LEVELS) {
        let mut arena = PhysArena::new(1);
        let tr = arena.translator();
        let root = arena.alloc(1);
        let missing = lookup_pt_slot(&tr, root, vaddr, max_level).expect_err("empty root");
        prop_assert_eq!(missing.level, 1);
        prop_assert_eq!(missing.fault, LookupFault::MissingCapability { bits_left: level_page_bits(1) });
    }

    #[test]
    fn installed_leaf_translates(
        vaddr in arb_user_vaddr(),
        size in arb_size(),
        ppn in 0x8_0000usize..0x10_0000,
        offset in any::<usize>(),
    ) {
        let mut arena = PhysArena::new(PT_LEVELS);
        let tr = arena.translator();
        let root = arena.alloc(1);
        let base = vaddr & !mask(size.bits());
        let mut table = root;
        for level in 1..size.level() {
            let next = arena.alloc(1);
            slot(table, pt_index(base, level)).write(Pte::table(arena.paddr(next)));
            table = next;
        }

        let frame = PAddr::from_ppn(ppn & !mask(size.bits() - PAGE_BITS));
        let found = lookup_pt_slot(&tr, root, base, size.level()).expect("path built");
        prop_assert_eq!(found.level, size.level());
        found.slot.write(Pte::user(frame, true, VmRights::ReadOnly));

        let probe = base + (offset & mask(size.bits()));
        let leaf = lookup_leaf(&tr, root, probe).expect("leaf");
        prop_assert_eq!(leaf.level, size.level());
        prop_assert_eq!(leaf.translate(probe), frame.offset(probe - base));
    }
}
