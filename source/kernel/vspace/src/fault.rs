// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Translation of RISC-V page/access fault traps into VM faults
//! OWNERS: @kernel-mm-team
//! PUBLIC API: VmFault, VmFaultKind, handle_vm_fault
//! DEPENDS_ON: thread::Thread
//! INVARIANTS: Stateless; only instruction faults touch registers; unknown causes are fatal

use crate::thread::{Register, Thread};

/// `scause` exception codes handled here.
pub mod cause {
    pub const INSTRUCTION_ACCESS: usize = 1;
    pub const LOAD_ACCESS: usize = 5;
    pub const STORE_ACCESS: usize = 7;
    pub const INSTRUCTION_PAGE: usize = 12;
    pub const LOAD_PAGE: usize = 13;
    pub const STORE_PAGE: usize = 15;
}

/// Fault classes delivered to user fault handlers. Page faults fold into access faults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VmFaultKind {
    LoadAccess,
    StoreAccess,
    InstructionAccess,
}

impl VmFaultKind {
    /// Classifies an `scause` exception code.
    pub const fn from_cause(code: usize) -> Option<Self> {
        match code {
            cause::LOAD_ACCESS | cause::LOAD_PAGE => Some(VmFaultKind::LoadAccess),
            cause::STORE_ACCESS | cause::STORE_PAGE => Some(VmFaultKind::StoreAccess),
            cause::INSTRUCTION_ACCESS | cause::INSTRUCTION_PAGE => {
                Some(VmFaultKind::InstructionAccess)
            }
            _ => None,
        }
    }

    /// Fault status word reported to the handler.
    pub const fn fsr(self) -> usize {
        match self {
            VmFaultKind::LoadAccess => cause::LOAD_ACCESS,
            VmFaultKind::StoreAccess => cause::STORE_ACCESS,
            VmFaultKind::InstructionAccess => cause::INSTRUCTION_ACCESS,
        }
    }
}

/// A user VM fault awaiting delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VmFault {
    pub kind: VmFaultKind,
    /// Faulting virtual address (`stval`).
    pub address: usize,
}

impl VmFault {
    /// Words of the fault message: IP, address, prefetch flag, FSR.
    pub fn message(&self, fault_ip: usize) -> [usize; 4] {
        let prefetch = matches!(self.kind, VmFaultKind::InstructionAccess);
        [fault_ip, self.address, prefetch as usize, self.kind.fsr()]
    }
}

/// Converts a fault trap of `thread` into a [`VmFault`].
///
/// For instruction faults the resume address is set to the faulting PC first.
///
/// # Panics
/// If `scause` is not one of the page/access fault codes.
pub fn handle_vm_fault(thread: &mut dyn Thread, scause: usize, stval: usize) -> VmFault {
    let Some(kind) = VmFaultKind::from_cause(scause) else {
        panic!("invalid VM fault cause {scause}");
    };
    if kind == VmFaultKind::InstructionAccess {
        let pc = thread.register(Register::FaultIp);
        thread.set_register(Register::NextIp, pc);
    }
    log_trace!(target: "fault", "{:?} at {:#x}", kind, stval);
    VmFault { kind, address: stval }
}
