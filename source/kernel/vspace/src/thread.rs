// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Current-thread view used by the VM subsystem.

use crate::cap::Cap;

/// Architectural registers the VM subsystem reads or writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Register {
    /// Message-info word of the reply.
    MsgInfo,
    /// Message register `n`.
    Msg(usize),
    /// Program counter at the time of the trap (`sepc`).
    FaultIp,
    /// Program counter the thread resumes at.
    NextIp,
}

/// Thread state consumed by `set_vm_root`, `PageGetAddress` and the fault path.
pub trait Thread {
    fn register(&self, reg: Register) -> usize;
    fn set_register(&mut self, reg: Register, value: usize);
    /// Capability installed as the thread's VSpace root.
    fn vtable_cap(&self) -> Cap;
    /// User virtual address of the IPC buffer.
    fn ipc_buffer_addr(&self) -> usize;
    /// Frame capability backing the IPC buffer.
    fn ipc_buffer_cap(&self) -> Cap;
}

/// Packs a message-info word: `label[..12] caps_unwrapped[11:9] extra_caps[8:7] length[6:0]`.
pub const fn message_info(label: usize, caps_unwrapped: usize, extra_caps: usize, length: usize) -> usize {
    (label << 12) | ((caps_unwrapped & 0x7) << 9) | ((extra_caps & 0x3) << 7) | (length & 0x7f)
}
