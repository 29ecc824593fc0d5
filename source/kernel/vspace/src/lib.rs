// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: NEURON RISC-V virtual-memory subsystem (page tables, ASIDs, MMU invocations, kernel images)
//! OWNERS: @kernel-mm-team
//! PUBLIC API: mm::{walk, VSpaceRegistry}, invocation::{decode_mmu_invocation, perform_mmu_invocation},
//!             fault::handle_vm_fault, kimage::KernelImageManager
//! DEPENDS_ON: hal::Machine (TLB, satp, barriers), cap::CSpace (slot service), thread::Thread
//! INVARIANTS: Decode never mutates state; perform never fails; every structural PTE write is
//!             followed by a full local TLB flush; kernel window replicated into every root

#![cfg_attr(not(test), no_std)]
#![forbid(clippy::unwrap_used)]

extern crate alloc;

#[macro_use]
mod diag;

pub use diag::log;

pub mod cap;
pub mod error;
pub mod fault;
pub mod hal;
pub mod invocation;
pub mod kimage;
pub mod mm;
pub mod thread;
pub mod types;

#[cfg(test)]
mod testutil;

pub use error::{LookupFault, SyscallError};
pub use types::{Asid, PAddr, PPtr, SlotId};
