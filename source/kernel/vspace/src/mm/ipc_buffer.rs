// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! IPC-buffer validation and kernel-side lookup.

use super::{mask, IPC_BUFFER_ALIGN_BITS};
use crate::cap::{Cap, VmRights};
use crate::error::SyscallError;
use crate::thread::Thread;
use crate::types::PPtr;

/// Checks that `vaddr` backed by `cap` may serve as an IPC buffer.
pub fn check_valid_ipc_buffer(vaddr: usize, cap: &Cap) -> Result<(), SyscallError> {
    if !matches!(cap, Cap::Frame { .. }) {
        log_debug!(target: "mm", "IPC buffer is not a frame cap");
        return Err(SyscallError::IllegalOperation);
    }
    if vaddr & mask(IPC_BUFFER_ALIGN_BITS) != 0 {
        log_debug!(target: "mm", "IPC buffer {:#x} misaligned", vaddr);
        return Err(SyscallError::AlignmentError);
    }
    Ok(())
}

/// Kernel pointer to `thread`'s IPC buffer, if its frame grants the needed access.
///
/// Receivers need a read-write frame; senders accept read-only too.
pub fn lookup_ipc_buffer(is_receiver: bool, thread: &dyn Thread) -> Option<PPtr> {
    let Cap::Frame { base, size, rights, .. } = thread.ipc_buffer_cap() else {
        return None;
    };
    let usable = rights == VmRights::ReadWrite || (!is_receiver && rights == VmRights::ReadOnly);
    usable.then(|| base.offset(thread.ipc_buffer_addr() & mask(size.bits())))
}
