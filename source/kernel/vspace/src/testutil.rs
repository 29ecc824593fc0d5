// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Host-side fixtures: fake physical memory, a recording hart and a scripted thread.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::{Cell, RefCell};

use crate::cap::{CSpace, Cap, CapTable, FrameSize, VmRights};
use crate::error::SyscallError;
use crate::hal::{Barrier, InterruptMask, StackRelocator, Tlb, TranslationRoot};
use crate::invocation::{invoke_mmu, Invocation, MmuContext, MmuLabel};
use crate::mm::{LinearMap, VSpaceRegistry, PAGE_BITS, PAGE_SIZE};
use crate::thread::{Register, Thread};
use crate::types::{Asid, PAddr, PPtr, SlotId};

/// Physical address the arena pretends to start at.
pub const PHYS_BASE: usize = 0x8000_0000;

/// Zeroed, page-aligned host memory standing in for physical RAM.
pub struct PhysArena {
    base: *mut u8,
    layout: Layout,
    pages: usize,
    next: usize,
}

impl PhysArena {
    pub fn new(pages: usize) -> Self {
        let layout = Layout::from_size_align(pages * PAGE_SIZE, PAGE_SIZE).expect("arena layout");
        // SAFETY: non-zero size.
        let base = unsafe { alloc_zeroed(layout) };
        assert!(!base.is_null(), "arena allocation failed");
        Self { base, layout, pages, next: 0 }
    }

    pub fn translator(&self) -> LinearMap {
        LinearMap::new(PHYS_BASE, self.base as usize)
    }

    /// Next `pages` zeroed pages.
    pub fn alloc(&mut self, pages: usize) -> PPtr {
        self.alloc_aligned(pages, 1)
    }

    /// Next `pages` pages whose physical address is aligned to `align_pages` pages.
    pub fn alloc_aligned(&mut self, pages: usize, align_pages: usize) -> PPtr {
        let start = self.next.next_multiple_of(align_pages);
        assert!(start + pages <= self.pages, "arena exhausted");
        self.next = start + pages;
        PPtr::new(self.base as usize + (start << PAGE_BITS))
    }

    pub fn paddr(&self, pptr: PPtr) -> PAddr {
        PAddr::new(pptr.raw() - self.base as usize + PHYS_BASE)
    }
}

impl Drop for PhysArena {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout.
        unsafe { dealloc(self.base, self.layout) };
    }
}

/// Hardware side effect observed by [`TestMachine`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    FlushAll,
    FlushAsid(Asid),
    SetRoot { paddr: PAddr, asid: Asid },
    Fence,
    IrqOff,
    IrqOn,
    Relocate { src_top: usize, dst_top: usize },
}

/// Hart double that records every HAL call.
///
/// Stack relocation copies from `backing`, the host memory behind the stack being moved.
#[derive(Default)]
pub struct TestMachine {
    events: RefCell<Vec<Event>>,
    irq_enabled: Cell<bool>,
    /// Host top and live stack pointer of the running stack.
    backing: Cell<Option<(usize, usize)>>,
}

impl TestMachine {
    pub fn with_irqs_enabled() -> Self {
        let machine = Self::default();
        machine.irq_enabled.set(true);
        machine
    }

    pub fn set_backing_stack(&self, host_top: usize, host_sp: usize) {
        self.backing.set(Some((host_top, host_sp)));
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn take_events(&self) -> Vec<Event> {
        self.events.take()
    }

    pub fn irq_enabled(&self) -> bool {
        self.irq_enabled.get()
    }

    fn record(&self, event: Event) {
        self.events.borrow_mut().push(event);
    }
}

impl Tlb for TestMachine {
    fn flush_all(&self) {
        self.record(Event::FlushAll);
    }

    fn flush_asid(&self, asid: Asid) {
        self.record(Event::FlushAsid(asid));
    }
}

impl TranslationRoot for TestMachine {
    fn set_vspace_root(&self, paddr: PAddr, asid: Asid) {
        self.record(Event::SetRoot { paddr, asid });
    }
}

impl Barrier for TestMachine {
    fn fence(&self) {
        self.record(Event::Fence);
    }
}

impl InterruptMask for TestMachine {
    fn disable_interrupts(&self) -> bool {
        self.record(Event::IrqOff);
        self.irq_enabled.replace(false)
    }

    fn restore_interrupts(&self, was_enabled: bool) {
        self.record(Event::IrqOn);
        self.irq_enabled.set(was_enabled);
    }
}

impl StackRelocator for TestMachine {
    unsafe fn relocate_stack(&self, src_top: usize, dst_top: usize) {
        assert!(!self.irq_enabled.get(), "stack relocated with interrupts enabled");
        self.record(Event::Relocate { src_top, dst_top });
        if let Some((host_top, host_sp)) = self.backing.get() {
            // SAFETY: the test registered live host memory for both stacks.
            unsafe { copy_stack_descending(host_top, dst_top, host_sp) };
        }
    }
}

/// Copies the words in `[sp, src_top)` so they end at `dst_top`, highest word first.
/// Returns the number of bytes copied.
///
/// # Safety
/// Both ranges must be valid, word-aligned and may only overlap if `dst_top >= src_top`.
pub unsafe fn copy_stack_descending(src_top: usize, dst_top: usize, sp: usize) -> usize {
    debug_assert!(sp <= src_top);
    let word = core::mem::size_of::<usize>();
    let mut src = src_top;
    let mut dst = dst_top;
    while src != sp {
        src -= word;
        dst -= word;
        // SAFETY: guaranteed by the caller.
        unsafe { core::ptr::write_volatile(dst as *mut usize, core::ptr::read_volatile(src as *const usize)) };
    }
    src_top - sp
}

/// Thread whose registers are plain fields.
#[derive(Clone, Debug, Default)]
pub struct TestThread {
    pub msg_info: usize,
    pub msgs: [usize; 4],
    pub fault_ip: usize,
    pub next_ip: usize,
    pub vtable: Cap,
    pub ipc_buffer: usize,
    pub ipc_buffer_frame: Cap,
}

impl Thread for TestThread {
    fn register(&self, reg: Register) -> usize {
        match reg {
            Register::MsgInfo => self.msg_info,
            Register::Msg(n) => self.msgs[n],
            Register::FaultIp => self.fault_ip,
            Register::NextIp => self.next_ip,
        }
    }

    fn set_register(&mut self, reg: Register, value: usize) {
        match reg {
            Register::MsgInfo => self.msg_info = value,
            Register::Msg(n) => self.msgs[n] = value,
            Register::FaultIp => self.fault_ip = value,
            Register::NextIp => self.next_ip = value,
        }
    }

    fn vtable_cap(&self) -> Cap {
        self.vtable
    }

    fn ipc_buffer_addr(&self) -> usize {
        self.ipc_buffer
    }

    fn ipc_buffer_cap(&self) -> Cap {
        self.ipc_buffer_frame
    }
}

/// Size of the kernel window every world maps at `KERNEL_BASE`.
pub const KERNEL_WINDOW_BITS: usize = 32;

/// Slot of the CNode capability addressing the world's own table.
pub const CNODE_SLOT: SlotId = SlotId(0);
/// Slot of the ASID control capability.
pub const ASID_CONTROL_SLOT: SlotId = SlotId(1);
/// Radix of the world's CNode.
pub const CNODE_RADIX: usize = 10;

/// A booted kernel: global root with its window, a CSpace and an invoking thread.
pub struct World {
    pub arena: PhysArena,
    pub registry: VSpaceRegistry<LinearMap>,
    pub cspace: CapTable,
    pub machine: TestMachine,
    pub thread: TestThread,
    next_slot: usize,
}

impl World {
    pub fn new() -> Self {
        Self::with_pages(1024)
    }

    pub fn with_pages(pages: usize) -> Self {
        let mut arena = PhysArena::new(pages);
        let kernel_root = arena.alloc(1);
        let window_table = arena.alloc(1);
        let registry = VSpaceRegistry::new(arena.translator(), kernel_root);
        registry
            .map_kernel_window(PAddr::new(PHYS_BASE), KERNEL_WINDOW_BITS, Some(window_table))
            .expect("kernel window");

        let mut cspace = CapTable::with_capacity(1 << CNODE_RADIX);
        cspace.set(CNODE_SLOT, Cap::CNode { radix_bits: CNODE_RADIX }).expect("cnode slot");
        cspace.set(ASID_CONTROL_SLOT, Cap::AsidControl).expect("control slot");

        Self {
            arena,
            registry,
            cspace,
            machine: TestMachine::default(),
            thread: TestThread::default(),
            next_slot: 2,
        }
    }

    pub fn fresh_slot(&mut self) -> SlotId {
        let slot = SlotId(self.next_slot);
        self.next_slot += 1;
        slot
    }

    pub fn cap(&self, slot: SlotId) -> Cap {
        self.cspace.cap(slot)
    }

    pub fn place(&mut self, cap: Cap) -> SlotId {
        let slot = self.fresh_slot();
        self.cspace.set(slot, cap).expect("slot in range");
        slot
    }

    pub fn invoke(
        &mut self,
        label: MmuLabel,
        target: SlotId,
        args: &[usize],
        extra_caps: &[SlotId],
    ) -> Result<(), SyscallError> {
        let inv = Invocation { label: label as usize, target, args, extra_caps };
        let mut ctx = MmuContext {
            registry: &mut self.registry,
            cspace: &mut self.cspace,
            machine: &self.machine,
            thread: &mut self.thread,
        };
        invoke_mmu(&mut ctx, &inv)
    }

    /// Untyped object of one page, suitable for an ASID pool.
    pub fn new_untyped(&mut self) -> SlotId {
        let base = self.arena.alloc(1);
        self.place(Cap::Untyped { base, size_bits: PAGE_BITS, is_device: false, free_index: 0 })
    }

    pub fn try_make_pool(&mut self) -> Result<SlotId, SyscallError> {
        let untyped = self.new_untyped();
        let dest = self.fresh_slot();
        self.invoke(
            MmuLabel::AsidControlMakePool,
            ASID_CONTROL_SLOT,
            &[dest.index(), CNODE_RADIX],
            &[untyped, CNODE_SLOT],
        )?;
        Ok(dest)
    }

    pub fn make_pool(&mut self) -> SlotId {
        self.try_make_pool().expect("make pool")
    }

    pub fn new_page_table(&mut self) -> SlotId {
        let base = self.arena.alloc(1);
        self.place(Cap::page_table(base))
    }

    pub fn try_new_root(&mut self, pool: SlotId) -> Result<SlotId, SyscallError> {
        let root = self.new_page_table();
        self.invoke(MmuLabel::AsidPoolAssign, pool, &[], &[root])?;
        Ok(root)
    }

    /// Fresh VSpace root bound to an ASID from `pool`.
    pub fn new_root(&mut self, pool: SlotId) -> SlotId {
        self.try_new_root(pool).expect("assign root")
    }

    pub fn new_frame(&mut self, size: FrameSize, rights: VmRights) -> SlotId {
        let pages = size.bytes() >> PAGE_BITS;
        let base = self.arena.alloc_aligned(pages, pages);
        self.place(Cap::frame(base, size, rights))
    }

    /// Kernel pointer of the object behind a page-table or frame capability.
    pub fn base_of(&self, slot: SlotId) -> PPtr {
        match self.cap(slot) {
            Cap::PageTable { base, .. } | Cap::Frame { base, .. } => base,
            other => panic!("slot {} holds {:?}", slot.index(), other),
        }
    }

    pub fn asid_of(&self, slot: SlotId) -> Asid {
        match self.cap(slot) {
            Cap::PageTable { mapped_asid, .. } | Cap::Frame { mapped_asid, .. } => mapped_asid,
            other => panic!("slot {} holds {:?}", slot.index(), other),
        }
    }
}
