// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Typed lookup faults and syscall errors reported by MMU invocations
//! OWNERS: @kernel-mm-team
//! PUBLIC API: LookupFault, SyscallError{code(), argument_index()}
//! DEPENDS_ON: none
//! INVARIANTS: Numeric error codes are ABI; decode errors never imply partial state changes

use core::fmt;

/// Reason a translation (VSpace or capability space) could not be completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupFault {
    /// No table backs the requested root (e.g. an ASID pool that was never created).
    InvalidRoot,
    /// Translation stopped with `bits_left` bits of the address still unresolved.
    MissingCapability { bits_left: usize },
    /// A capability-space walk consumed a different number of bits than requested.
    DepthMismatch { bits_left: usize, bits_found: usize },
}

impl fmt::Display for LookupFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupFault::InvalidRoot => f.write_str("invalid root"),
            LookupFault::MissingCapability { bits_left } => {
                write!(f, "missing capability ({bits_left} bits left)")
            }
            LookupFault::DepthMismatch { bits_left, bits_found } => {
                write!(f, "depth mismatch ({bits_left} bits left, {bits_found} found)")
            }
        }
    }
}

/// Error returned to the invoking thread when decoding an invocation fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyscallError {
    IllegalOperation,
    /// The capability at `index` (0 = invoked cap, 1.. = extra caps) is unsuitable.
    InvalidCapability { index: usize },
    /// The message argument at `index` is out of range.
    InvalidArgument { index: usize },
    AlignmentError,
    TruncatedMessage,
    /// The destination is already occupied or the namespace is exhausted.
    DeleteFirst,
    /// The source object still has derived children.
    RevokeFirst,
    /// A lookup failed; `source` tells whether it was the source or destination operand.
    FailedLookup { source: bool, fault: LookupFault },
}

impl SyscallError {
    /// Stable error number delivered in the reply message.
    pub const fn code(self) -> usize {
        match self {
            SyscallError::InvalidArgument { .. } => 1,
            SyscallError::InvalidCapability { .. } => 2,
            SyscallError::IllegalOperation => 3,
            SyscallError::AlignmentError => 5,
            SyscallError::FailedLookup { .. } => 6,
            SyscallError::TruncatedMessage => 7,
            SyscallError::DeleteFirst => 8,
            SyscallError::RevokeFirst => 9,
        }
    }

    /// Offending argument or capability index, where the error carries one.
    pub const fn argument_index(self) -> Option<usize> {
        match self {
            SyscallError::InvalidCapability { index } | SyscallError::InvalidArgument { index } => {
                Some(index)
            }
            _ => None,
        }
    }

    pub(crate) const fn lookup(fault: LookupFault) -> Self {
        SyscallError::FailedLookup { source: false, fault }
    }
}

impl fmt::Display for SyscallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyscallError::IllegalOperation => f.write_str("illegal operation"),
            SyscallError::InvalidCapability { index } => write!(f, "invalid capability {index}"),
            SyscallError::InvalidArgument { index } => write!(f, "invalid argument {index}"),
            SyscallError::AlignmentError => f.write_str("alignment error"),
            SyscallError::TruncatedMessage => f.write_str("truncated message"),
            SyscallError::DeleteFirst => f.write_str("delete first"),
            SyscallError::RevokeFirst => f.write_str("revoke first"),
            SyscallError::FailedLookup { source, fault } => {
                let which = if *source { "source" } else { "destination" };
                write!(f, "failed lookup of {which}: {fault}")
            }
        }
    }
}
