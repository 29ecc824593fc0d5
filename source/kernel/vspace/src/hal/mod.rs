// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction layer traits.

pub mod riscv;

use crate::types::{Asid, PAddr};

/// TLB management operations.
pub trait Tlb {
    /// Flushes the entire local translation cache.
    fn flush_all(&self);
    /// Flushes local translations tagged with `asid`.
    fn flush_asid(&self, asid: Asid);
}

/// Translation-root register (`satp`).
pub trait TranslationRoot {
    /// Installs `root` with `asid` and flushes the local translation cache.
    fn set_vspace_root(&self, root: PAddr, asid: Asid);
}

/// Memory ordering barrier.
pub trait Barrier {
    /// Full read/write fence.
    fn fence(&self);
}

/// Local interrupt masking.
pub trait InterruptMask {
    /// Disables interrupts and returns whether they were enabled.
    fn disable_interrupts(&self) -> bool;
    /// Re-enables interrupts if `was_enabled`.
    fn restore_interrupts(&self, was_enabled: bool);
}

/// Copies the live part of the executing stack to another alias.
pub trait StackRelocator {
    /// Copies the words between the current stack pointer and `src_top` so that they end at
    /// `dst_top`, highest word first.
    ///
    /// # Safety
    /// Interrupts must be disabled, `[dst_top - (src_top - sp), dst_top)` must be writable
    /// kernel memory, and `src_top` must be the top of the stack currently in use.
    unsafe fn relocate_stack(&self, src_top: usize, dst_top: usize);
}

/// Everything the VM subsystem needs from the local hart.
pub trait Machine: Tlb + TranslationRoot + Barrier + InterruptMask + StackRelocator {}

impl<T> Machine for T where T: Tlb + TranslationRoot + Barrier + InterruptMask + StackRelocator {}
