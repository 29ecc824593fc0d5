// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Unit tests for the page-table walker, ASID registry and boot helpers
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; tables live in a host arena behind a LinearMap

use super::boot::BootError;
use super::ipc_buffer::{check_valid_ipc_buffer, lookup_ipc_buffer};
use super::page_table::slot;
use super::verify::{verify_vspace, PtViolation};
use super::walk::{lookup_by_depth, lookup_by_target, lookup_leaf, lookup_pt_slot};
use super::*;
use crate::cap::{Cap, FrameSize, VmRights};
use crate::error::{LookupFault, SyscallError};
use crate::testutil::{Event, PhysArena, World, KERNEL_WINDOW_BITS, PHYS_BASE};
use crate::types::{Asid, PAddr, PPtr};

const VADDR: usize = 0x4020_3000;

/// Links fresh tables for `levels` levels along `vaddr`; returns the deepest table.
fn build_path(arena: &mut PhysArena, root: PPtr, vaddr: usize, levels: usize) -> PPtr {
    let mut table = root;
    for level in 1..=levels {
        let next = arena.alloc(1);
        slot(table, pt_index(vaddr, level)).write(Pte::table(arena.paddr(next)));
        table = next;
    }
    table
}

fn rw_leaf(paddr: PAddr) -> Pte {
    Pte::user(paddr, false, VmRights::ReadWrite)
}

#[test]
fn empty_root_reports_root_sized_hole() {
    let mut arena = PhysArena::new(4);
    let tr = arena.translator();
    let root = arena.alloc(1);

    let missing = lookup_pt_slot(&tr, root, VADDR, PT_LEVELS).expect_err("hole");
    assert_eq!(missing.level, 1);
    assert_eq!(missing.slot, slot(root, pt_index(VADDR, 1)));
    assert_eq!(missing.fault, LookupFault::MissingCapability { bits_left: level_page_bits(1) });
    assert_eq!(
        lookup_leaf(&tr, root, VADDR),
        Err(LookupFault::MissingCapability { bits_left: level_page_bits(1) })
    );

    let top = lookup_pt_slot(&tr, root, VADDR, 1).expect("root slot");
    assert_eq!((top.slot, top.level), (slot(root, pt_index(VADDR, 1)), 1));
}

#[test]
fn walk_reaches_last_level_and_translates() {
    let mut arena = PhysArena::new(8);
    let tr = arena.translator();
    let root = arena.alloc(1);
    let last = build_path(&mut arena, root, VADDR, PT_LEVELS - 1);

    let found = lookup_pt_slot(&tr, root, VADDR, PT_LEVELS).expect("full walk");
    assert_eq!(found.level, PT_LEVELS);
    assert_eq!(found.slot, slot(last, pt_index(VADDR, PT_LEVELS)));
    assert_eq!(
        lookup_leaf(&tr, root, VADDR),
        Err(LookupFault::MissingCapability { bits_left: PAGE_BITS })
    );

    let frame = PAddr::new(0x8123_4000);
    found.slot.write(rw_leaf(frame));
    let leaf = lookup_leaf(&tr, root, VADDR).expect("leaf");
    assert_eq!(leaf.level, PT_LEVELS);
    assert_eq!(leaf.translate(VADDR + 0x123), frame.offset(0x123));
}

#[test]
fn walk_stops_at_superpage() {
    let mut arena = PhysArena::new(8);
    let tr = arena.translator();
    let root = arena.alloc(1);
    let table = build_path(&mut arena, root, VADDR, PT_LEVELS - 2);
    let level = PT_LEVELS - 1;
    let superpage = PAddr::new(0x8040_0000);
    slot(table, pt_index(VADDR, level)).write(rw_leaf(superpage));

    let found = lookup_pt_slot(&tr, root, VADDR, PT_LEVELS).expect("walk");
    assert_eq!(found.level, level);
    let leaf = lookup_leaf(&tr, root, VADDR).expect("leaf");
    assert_eq!(leaf.translate(VADDR), superpage.offset(VADDR & mask(level_page_bits(level))));

    let depth = lookup_by_depth(&tr, root, VADDR, PT_LEVELS);
    assert_eq!(depth.bits_left, level_page_bits(level));
    assert_eq!(depth.slot, found.slot);
}

#[test]
fn lookup_by_target_finds_parent_entry() {
    let mut arena = PhysArena::new(8);
    let tr = arena.translator();
    let root = arena.alloc(1);
    build_path(&mut arena, root, VADDR, PT_LEVELS - 1);

    let first = slot(root, pt_index(VADDR, 1)).read();
    assert_eq!(lookup_by_target(&tr, root, VADDR, first.paddr()), Ok(slot(root, pt_index(VADDR, 1))));
    assert_eq!(
        lookup_by_target(&tr, root, VADDR, PAddr::new(0x9999_0000)),
        Err(LookupFault::MissingCapability { bits_left: level_page_bits(PT_LEVELS) })
    );
    // Other paths are not searched.
    let elsewhere = VADDR ^ (1 << level_page_bits(1));
    assert!(lookup_by_target(&tr, root, elsewhere, first.paddr()).is_err());
}

#[test]
fn depth_walk_reports_untranslated_bits() {
    let mut arena = PhysArena::new(8);
    let tr = arena.translator();
    let root = arena.alloc(1);
    assert_eq!(lookup_by_depth(&tr, root, VADDR, PT_LEVELS).bits_left, level_page_bits(1));

    build_path(&mut arena, root, VADDR, PT_LEVELS - 1);
    for depth in 1..=PT_LEVELS {
        assert_eq!(lookup_by_depth(&tr, root, VADDR, depth).bits_left, level_page_bits(depth));
    }
}

#[test]
fn asid_resolution_distinguishes_missing_pool_and_slot() {
    let mut world = World::new();
    assert_eq!(world.registry.find_vspace_for_asid(Asid::new(1)), Err(LookupFault::InvalidRoot));

    let pool = world.make_pool();
    assert_eq!(
        world.registry.find_vspace_for_asid(Asid::new(1)),
        Err(LookupFault::MissingCapability { bits_left: level_page_bits(1) })
    );

    let root = world.new_root(pool);
    let asid = world.asid_of(root);
    assert_eq!(asid, Asid::from_parts(0, 1));
    assert_eq!(world.registry.find_vspace_for_asid(asid), Ok(world.base_of(root)));
    assert!(world.registry.is_vtable_root(&world.cap(root)));
    assert!(world.registry.is_valid_native_root(&world.cap(root)));
}

#[test]
fn pools_never_hand_out_slot_zero() {
    let mut world = World::new();
    let pool_slot = world.make_pool();
    let Cap::AsidPool { asid_base, pool } = world.cap(pool_slot) else {
        panic!("pool cap expected");
    };
    assert_eq!(world.registry.first_free_asid(asid_base, pool), Some(Asid::from_parts(0, 1)));
    world.new_root(pool_slot);
    assert_eq!(world.registry.first_free_asid(asid_base, pool), Some(Asid::from_parts(0, 2)));
}

#[test]
fn assigned_roots_carry_the_kernel_window() {
    let mut world = World::new();
    let pool = world.make_pool();
    let root_slot = world.new_root(pool);
    let root = world.base_of(root_slot);
    let kernel = world.registry.kernel_root();

    for index in 0..PT_ENTRIES {
        let mine = slot(root, index).read();
        if index >= pt_index(KERNEL_BASE, 1) {
            assert_eq!(mine, slot(kernel, index).read());
        } else {
            assert_eq!(mine, Pte::INVALID);
        }
    }
    assert!(slot(root, pt_index(KERNEL_BASE, 1)).read().is_valid());
}

#[test]
fn set_vm_root_falls_back_to_kernel_root() {
    let mut world = World::new();
    let pool = world.make_pool();
    let root_slot = world.new_root(pool);
    let root = world.base_of(root_slot);
    let asid = world.asid_of(root_slot);
    let kernel = world.arena.paddr(world.registry.kernel_root());
    world.machine.take_events();

    world.registry.set_vm_root(&world.thread, &world.machine);
    world.thread.vtable = world.cap(root_slot);
    world.registry.set_vm_root(&world.thread, &world.machine);
    assert_eq!(
        world.machine.take_events(),
        vec![
            Event::SetRoot { paddr: kernel, asid: Asid::INVALID },
            Event::SetRoot { paddr: world.arena.paddr(root), asid },
        ]
    );

    world.registry.delete_asid(asid, root, &world.thread, &world.machine);
    assert_eq!(
        world.machine.take_events(),
        vec![Event::FlushAsid(asid), Event::SetRoot { paddr: kernel, asid }]
    );
    assert!(world.registry.find_vspace_for_asid(asid).is_err());
}

#[test]
fn delete_asid_ignores_stale_binding() {
    let mut world = World::new();
    let pool = world.make_pool();
    let root_slot = world.new_root(pool);
    let asid = world.asid_of(root_slot);
    world.machine.take_events();

    let stranger = world.arena.alloc(1);
    world.registry.delete_asid(asid, stranger, &world.thread, &world.machine);
    assert!(world.machine.events().is_empty());
    assert_eq!(world.registry.find_vspace_for_asid(asid), Ok(world.base_of(root_slot)));
}

#[test]
fn delete_pool_flushes_bound_asids() {
    let mut world = World::new();
    let pool_slot = world.make_pool();
    let first = world.new_root(pool_slot);
    let second = world.new_root(pool_slot);
    let Cap::AsidPool { asid_base, pool } = world.cap(pool_slot) else {
        panic!("pool cap expected");
    };
    world.machine.take_events();

    world.registry.delete_asid_pool(asid_base, pool, &world.thread, &world.machine);
    let events = world.machine.take_events();
    assert_eq!(events[..2], [Event::FlushAsid(world.asid_of(first)), Event::FlushAsid(world.asid_of(second))]);
    assert!(matches!(events[2], Event::SetRoot { asid, .. } if asid == Asid::INVALID));
    assert_eq!(world.registry.pool(0), None);
    assert_eq!(world.registry.first_free_pool(), Some(0));
    assert_eq!(world.registry.find_vspace_for_asid(world.asid_of(first)), Err(LookupFault::InvalidRoot));

    // Deleting again is a no-op.
    world.registry.delete_asid_pool(asid_base, pool, &world.thread, &world.machine);
    assert!(world.machine.events().is_empty());
}

#[test]
fn unmap_page_table_clears_only_the_live_link() {
    let mut world = World::new();
    let pool = world.make_pool();
    let root_slot = world.new_root(pool);
    let root = world.base_of(root_slot);
    let asid = world.asid_of(root_slot);
    let table = world.arena.alloc(1);
    let link = slot(root, pt_index(VADDR, 1));
    link.write(Pte::table(world.arena.paddr(table)));
    world.machine.take_events();

    let stranger = world.arena.alloc(1);
    world.registry.unmap_page_table(asid, VADDR, stranger, &world.machine);
    assert!(link.read().is_valid());
    assert!(world.machine.events().is_empty());

    world.registry.unmap_page_table(asid, VADDR, table, &world.machine);
    assert_eq!(link.read(), Pte::INVALID);
    assert_eq!(world.machine.take_events(), vec![Event::FlushAll]);
}

#[test]
fn unmap_page_checks_size_and_frame() {
    let mut world = World::new();
    let pool = world.make_pool();
    let root_slot = world.new_root(pool);
    let root = world.base_of(root_slot);
    let asid = world.asid_of(root_slot);
    let last = build_path(&mut world.arena, root, VADDR, PT_LEVELS - 1);
    let frame = world.arena.alloc(1);
    let leaf = slot(last, pt_index(VADDR, PT_LEVELS));
    leaf.write(rw_leaf(world.arena.paddr(frame)));
    world.machine.take_events();

    let other = world.arena.alloc(1);
    world.registry.unmap_page(FrameSize::Small, asid, VADDR, other, &world.machine);
    world.registry.unmap_page(FrameSize::Mega, asid, VADDR, frame, &world.machine);
    assert!(leaf.read().is_valid());
    assert!(world.machine.events().is_empty());

    world.registry.unmap_page(FrameSize::Small, asid, VADDR, frame, &world.machine);
    assert_eq!(leaf.read(), Pte::INVALID);
    assert_eq!(world.machine.take_events(), vec![Event::FlushAll]);
}

#[test]
fn kernel_window_maps_physical_memory_at_kernel_base() {
    let world = World::new();
    let tr = world.arena.translator();
    let root = world.registry.kernel_root();
    for offset in [0, PAGE_SIZE + 0x18, (1 << KERNEL_WINDOW_BITS) - 1] {
        let leaf = lookup_leaf(&tr, root, KERNEL_BASE + offset).expect("window leaf");
        assert!(leaf.pte.is_global());
        assert!(!leaf.pte.flags().contains(PteFlags::USER));
        assert_eq!(leaf.translate(KERNEL_BASE + offset), PAddr::new(PHYS_BASE + offset));
    }
    assert!(lookup_leaf(&tr, root, KERNEL_BASE + (1 << KERNEL_WINDOW_BITS)).is_err());
}

#[cfg(not(feature = "sv48"))]
#[test]
fn aligned_kernel_window_uses_root_superpages() {
    let world = World::new();
    let page_bits = level_page_bits(1);
    let count = 1usize << (KERNEL_WINDOW_BITS - page_bits);
    let first = pt_index(KERNEL_BASE, 1);
    for i in 0..count {
        let pte = slot(world.registry.kernel_root(), first + i).read();
        assert_eq!(pte, Pte::kernel(PAddr::new(PHYS_BASE + (i << page_bits))));
    }
    assert_eq!(slot(world.registry.kernel_root(), first + count).read(), Pte::INVALID);
}

#[test]
fn unaligned_kernel_window_goes_through_a_table() {
    let mut arena = PhysArena::new(2);
    let root = arena.alloc(1);
    let table = arena.alloc(1);
    let registry = VSpaceRegistry::new(arena.translator(), root);
    let page_bits = level_page_bits(2);
    let phys = PAddr::new(1 << page_bits);

    assert_eq!(registry.map_kernel_window(phys, page_bits + 2, None), Err(BootError::UnalignedPhysBase));
    assert_eq!(registry.map_kernel_window(phys, page_bits + 2, Some(table)), Ok(4));
    assert_eq!(slot(root, pt_index(KERNEL_BASE, 1)).read(), Pte::table(arena.paddr(table)));
    for i in 0..4 {
        assert_eq!(slot(table, i).read(), Pte::kernel(phys.offset(i << page_bits)));
    }
    assert_eq!(slot(table, 4).read(), Pte::INVALID);
}

#[test]
fn kernel_window_rejects_bad_geometry() {
    let mut world = World::new();
    let table = world.arena.alloc(1);
    let registry = &world.registry;
    assert_eq!(
        registry.map_kernel_window(PAddr::new(PHYS_BASE + PAGE_SIZE), 32, Some(table)),
        Err(BootError::UnalignedPhysBase)
    );
    assert_eq!(
        registry.map_kernel_window(PAddr::new(PHYS_BASE), VA_BITS, Some(table)),
        Err(BootError::WindowTooLarge)
    );
    for window_bits in [level_page_bits(1) + 64, usize::MAX] {
        assert_eq!(registry.map_kernel_window(PAddr::new(0), window_bits, None), Err(BootError::WindowTooLarge));
    }
}

#[test]
fn boot_helpers_install_initial_state() {
    let mut world = World::new();
    let kernel_pt = world.arena.alloc(1);
    let frame = PAddr::new(PHYS_BASE + 0x7000);
    let vaddr = KERNEL_BASE + 0x20_5000;
    world.registry.map_kernel_frame(kernel_pt, frame, vaddr);
    assert_eq!(slot(kernel_pt, pt_index(vaddr, PT_LEVELS)).read(), Pte::kernel(frame));

    world.registry.activate_kernel_vspace(&world.machine);
    assert_eq!(
        world.machine.take_events(),
        vec![Event::SetRoot {
            paddr: world.arena.paddr(world.registry.kernel_root()),
            asid: Asid::INVALID,
        }]
    );

    let pool = world.arena.alloc(1);
    let root = world.arena.alloc(1);
    let pool_cap = Cap::AsidPool { asid_base: Asid::from_parts(0, 0), pool };
    assert_eq!(
        world.registry.write_it_asid_pool(&Cap::page_table(root), &pool_cap),
        Err(BootError::WrongCapType)
    );
    world.registry.write_it_asid_pool(&pool_cap, &Cap::page_table(root)).expect("it pool");
    assert_eq!(world.registry.find_vspace_for_asid(IT_ASID), Ok(root));
    assert_eq!(world.registry.first_free_pool(), Some(1));
}

#[test]
fn ipc_buffer_must_be_an_aligned_frame() {
    let frame = Cap::frame(PPtr::new(0x1000), FrameSize::Small, VmRights::ReadWrite);
    assert_eq!(check_valid_ipc_buffer(0x4000_0200, &frame), Ok(()));
    assert_eq!(check_valid_ipc_buffer(0x4000_0100, &frame), Err(SyscallError::AlignmentError));
    assert_eq!(
        check_valid_ipc_buffer(0x4000_0200, &Cap::page_table(PPtr::new(0x1000))),
        Err(SyscallError::IllegalOperation)
    );
}

#[test]
fn ipc_buffer_lookup_honours_direction() {
    let mut world = World::new();
    let base = world.arena.alloc(1);
    world.thread.ipc_buffer = 0x4000_0600;
    world.thread.ipc_buffer_frame = Cap::frame(base, FrameSize::Small, VmRights::ReadOnly);
    assert_eq!(lookup_ipc_buffer(false, &world.thread), Some(base.offset(0x600)));
    assert_eq!(lookup_ipc_buffer(true, &world.thread), None);

    world.thread.ipc_buffer_frame = Cap::frame(base, FrameSize::Small, VmRights::ReadWrite);
    assert_eq!(lookup_ipc_buffer(true, &world.thread), Some(base.offset(0x600)));

    world.thread.ipc_buffer_frame = Cap::Null;
    assert_eq!(lookup_ipc_buffer(false, &world.thread), None);
}

#[test]
fn verifier_flags_malformed_entries() {
    let mut arena = PhysArena::new(8);
    let tr = arena.translator();
    let root = arena.alloc(1);
    let last = build_path(&mut arena, root, VADDR, PT_LEVELS - 1);
    let leaf = slot(last, pt_index(VADDR, PT_LEVELS));
    leaf.write(rw_leaf(PAddr::new(0x8000_5000)));
    assert_eq!(verify_vspace(&tr, root), Ok(()));

    let page = VADDR & !mask(PAGE_BITS);
    leaf.write(Pte::table(PAddr::new(0x8000_5000)));
    assert_eq!(verify_vspace(&tr, root), Err(PtViolation::PointerAtLastLevel { vaddr: page }));

    let write_only = PteFlags::VALID | PteFlags::WRITE | PteFlags::USER;
    leaf.write(Pte::from_bits((0x8_0005 << 10) | write_only.bits()));
    assert_eq!(
        verify_vspace(&tr, root),
        Err(PtViolation::WriteWithoutRead { vaddr: page, level: PT_LEVELS })
    );

    leaf.write(Pte::INVALID);
    let mid_level = PT_LEVELS - 1;
    let odd = VADDR ^ (1 << level_page_bits(1));
    let mid = build_path(&mut arena, root, odd, mid_level - 1);
    slot(mid, pt_index(odd, mid_level)).write(rw_leaf(PAddr::new(0x8000_5000)));
    assert_eq!(
        verify_vspace(&tr, root),
        Err(PtViolation::MisalignedSuperpage {
            vaddr: odd & !mask(level_page_bits(mid_level)),
            level: mid_level,
        })
    );
}
