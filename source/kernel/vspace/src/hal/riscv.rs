// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! RISC-V supervisor-mode implementation of the HAL traits.
//!
//! Host builds compile the same type with no-op bodies so higher layers stay testable.

use super::{Barrier, InterruptMask, StackRelocator, Tlb, TranslationRoot};
use crate::types::{Asid, PAddr};

#[cfg(not(feature = "sv48"))]
const SATP_MODE: usize = 8;
#[cfg(feature = "sv48")]
const SATP_MODE: usize = 9;

/// Composes a `satp` value for `root` tagged with `asid`.
pub const fn satp_value(root: PAddr, asid: Asid) -> usize {
    (SATP_MODE << 60) | ((asid.raw() as usize) << 44) | root.ppn()
}

/// Local-hart MMU, fence and interrupt control.
#[derive(Clone, Copy, Debug, Default)]
pub struct RiscvMmu;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
mod imp {
    use super::*;
    use riscv::register::{satp, sstatus};

    impl Tlb for RiscvMmu {
        #[inline]
        fn flush_all(&self) {
            // SAFETY: sfence.vma only invalidates cached translations.
            unsafe { riscv::asm::sfence_vma_all() };
        }

        #[inline]
        fn flush_asid(&self, asid: Asid) {
            // SAFETY: as above; rs1 = x0 selects every address of `asid`.
            unsafe {
                core::arch::asm!(
                    "sfence.vma x0, {0}",
                    in(reg) asid.raw() as usize,
                    options(nostack, preserves_flags)
                );
            }
        }
    }

    impl TranslationRoot for RiscvMmu {
        fn set_vspace_root(&self, root: PAddr, asid: Asid) {
            // SAFETY: callers install either the kernel root or a root carrying the kernel
            // window, so the executing code stays mapped across the switch.
            unsafe {
                satp::write(satp_value(root, asid));
                riscv::asm::sfence_vma_all();
            }
        }
    }

    impl Barrier for RiscvMmu {
        #[inline]
        fn fence(&self) {
            // SAFETY: plain fence, no side effects beyond ordering.
            unsafe { core::arch::asm!("fence rw, rw", options(nostack, preserves_flags)) };
        }
    }

    impl InterruptMask for RiscvMmu {
        fn disable_interrupts(&self) -> bool {
            let was_enabled = sstatus::read().sie();
            // SAFETY: masking supervisor interrupts on the local hart.
            unsafe { sstatus::clear_sie() };
            was_enabled
        }

        fn restore_interrupts(&self, was_enabled: bool) {
            if was_enabled {
                // SAFETY: restores the state observed by `disable_interrupts`.
                unsafe { sstatus::set_sie() };
            }
        }
    }

    impl StackRelocator for RiscvMmu {
        unsafe fn relocate_stack(&self, src_top: usize, dst_top: usize) {
            // Runs on the stack being copied: no calls and no spills between reading sp and
            // the last store.
            unsafe {
                core::arch::asm!(
                    "1:",
                    "beq {src}, sp, 2f",
                    "addi {src}, {src}, -8",
                    "addi {dst}, {dst}, -8",
                    "ld {tmp}, 0({src})",
                    "sd {tmp}, 0({dst})",
                    "j 1b",
                    "2:",
                    "fence",
                    src = inout(reg) src_top => _,
                    dst = inout(reg) dst_top => _,
                    tmp = out(reg) _,
                    options(nostack)
                );
            }
        }
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
mod imp {
    use super::*;

    impl Tlb for RiscvMmu {
        fn flush_all(&self) {}
        fn flush_asid(&self, _asid: Asid) {}
    }

    impl TranslationRoot for RiscvMmu {
        fn set_vspace_root(&self, root: PAddr, asid: Asid) {
            log_trace!(target: "hal", "satp <- {:#x}", satp_value(root, asid));
        }
    }

    impl Barrier for RiscvMmu {
        fn fence(&self) {
            core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
        }
    }

    impl InterruptMask for RiscvMmu {
        fn disable_interrupts(&self) -> bool {
            false
        }
        fn restore_interrupts(&self, _was_enabled: bool) {}
    }

    impl StackRelocator for RiscvMmu {
        unsafe fn relocate_stack(&self, _src_top: usize, _dst_top: usize) {}
    }
}
