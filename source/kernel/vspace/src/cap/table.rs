// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Capability-slot service consumed by the MMU invocations, plus a flat in-memory table.

extern crate alloc;

use alloc::vec::Vec;

use super::Cap;
use crate::error::{LookupFault, SyscallError};
use crate::types::SlotId;

/// Slot-level operations the VM subsystem needs from the capability space.
pub trait CSpace {
    /// Capability in `slot`; [`Cap::Null`] for empty or out-of-range slots.
    fn cap(&self, slot: SlotId) -> Cap;
    /// Overwrites the capability in `slot` in place, keeping its derivation links.
    fn set_cap(&mut self, slot: SlotId, cap: Cap);
    /// Resolves `index` (of `depth` bits) under the CNode `root` to a slot.
    fn lookup_target_slot(&self, root: Cap, index: usize, depth: usize)
        -> Result<SlotId, SyscallError>;
    fn ensure_empty_slot(&self, slot: SlotId) -> Result<(), SyscallError>;
    fn ensure_no_children(&self, slot: SlotId) -> Result<(), SyscallError>;
    /// Stores `cap` in the empty slot `dest` as a child of `parent`.
    fn insert(&mut self, cap: Cap, parent: SlotId, dest: SlotId);
}

/// Errors produced when manipulating the table directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapError {
    /// Provided slot is out of range or empty.
    InvalidSlot,
    /// No free capability slots are available in the table.
    NoSpace,
}

#[derive(Clone, Copy, Debug, Default)]
struct Entry {
    cap: Cap,
    parent: Option<SlotId>,
}

/// Single-level capability table addressed by a `CNode` root cap.
#[derive(Default, Clone)]
pub struct CapTable {
    slots: Vec<Entry>,
}

impl CapTable {
    /// Creates an empty table sized for `slots` entries.
    pub fn with_capacity(slots: usize) -> Self {
        let mut table = Vec::with_capacity(slots);
        table.resize(slots, Entry::default());
        Self { slots: table }
    }

    /// Table with 64 slots.
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Inserts or overwrites a slot without a parent link.
    pub fn set(&mut self, slot: SlotId, cap: Cap) -> Result<(), CapError> {
        let entry = self.slots.get_mut(slot.index()).ok_or(CapError::InvalidSlot)?;
        *entry = Entry { cap, parent: None };
        Ok(())
    }

    /// Returns a capability without consuming it.
    pub fn get(&self, slot: SlotId) -> Result<Cap, CapError> {
        self.slots
            .get(slot.index())
            .map(|entry| entry.cap)
            .filter(|cap| !cap.is_null())
            .ok_or(CapError::InvalidSlot)
    }

    /// Allocates the first free slot and inserts `cap`, returning the slot.
    pub fn allocate(&mut self, cap: Cap) -> Result<SlotId, CapError> {
        let index = self
            .slots
            .iter()
            .position(|entry| entry.cap.is_null())
            .ok_or(CapError::NoSpace)?;
        self.slots[index] = Entry { cap, parent: None };
        Ok(SlotId(index))
    }

    /// Removes and returns the capability stored in `slot`, orphaning its children.
    pub fn take(&mut self, slot: SlotId) -> Result<Cap, CapError> {
        let cap = self.get(slot)?;
        self.slots[slot.index()] = Entry::default();
        for entry in self.slots.iter_mut().filter(|entry| entry.parent == Some(slot)) {
            entry.parent = None;
        }
        Ok(cap)
    }

    /// Parent recorded when `slot` was filled through [`CSpace::insert`].
    pub fn parent(&self, slot: SlotId) -> Option<SlotId> {
        self.slots.get(slot.index()).and_then(|entry| entry.parent)
    }
}

impl CSpace for CapTable {
    fn cap(&self, slot: SlotId) -> Cap {
        self.slots.get(slot.index()).map(|entry| entry.cap).unwrap_or_default()
    }

    fn set_cap(&mut self, slot: SlotId, cap: Cap) {
        if let Some(entry) = self.slots.get_mut(slot.index()) {
            entry.cap = cap;
        } else {
            log_error!(target: "cap", "set_cap on out-of-range slot {}", slot.index());
        }
    }

    fn lookup_target_slot(
        &self,
        root: Cap,
        index: usize,
        depth: usize,
    ) -> Result<SlotId, SyscallError> {
        let Cap::CNode { radix_bits } = root else {
            return Err(SyscallError::lookup(LookupFault::InvalidRoot));
        };
        if depth != radix_bits {
            return Err(SyscallError::lookup(LookupFault::DepthMismatch {
                bits_left: depth,
                bits_found: radix_bits,
            }));
        }
        if index >= self.slots.len() || index >> radix_bits != 0 {
            return Err(SyscallError::lookup(LookupFault::MissingCapability { bits_left: depth }));
        }
        Ok(SlotId(index))
    }

    fn ensure_empty_slot(&self, slot: SlotId) -> Result<(), SyscallError> {
        if self.cap(slot).is_null() {
            Ok(())
        } else {
            Err(SyscallError::DeleteFirst)
        }
    }

    fn ensure_no_children(&self, slot: SlotId) -> Result<(), SyscallError> {
        if self.slots.iter().any(|entry| entry.parent == Some(slot)) {
            Err(SyscallError::RevokeFirst)
        } else {
            Ok(())
        }
    }

    fn insert(&mut self, cap: Cap, parent: SlotId, dest: SlotId) {
        match self.slots.get_mut(dest.index()) {
            Some(entry) => {
                debug_assert!(entry.cap.is_null(), "insert into occupied slot");
                *entry = Entry { cap, parent: Some(parent) };
            }
            None => log_error!(target: "cap", "insert into out-of-range slot {}", dest.index()),
        }
    }
}
