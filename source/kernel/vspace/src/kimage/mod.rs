// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Per-image kernel address spaces: region mapping, entry cloning and live switching
//! OWNERS: @kernel-mm-team
//! PUBLIC API: KernelImageManager{create_image, map_region, clone_entry, translate, switch_image},
//!             KernelImage, KiRegion, MapStrategy, ImageError
//! DEPENDS_ON: mm::walk::lookup_by_depth, hal::Machine
//! INVARIANTS: stack_initialized never reverts; the stack copy runs with interrupts masked on
//!             the old root, strictly high to low; the new root is installed after a fence

extern crate alloc;

use alloc::vec::Vec;
use core::fmt;

use crate::hal::Machine;
use crate::mm::walk::{lookup_by_depth, DepthSlot};
use crate::mm::{mask, AddressTranslator, Pte, PteFlags, PAGE_BITS, PT_INDEX_BITS, PT_LEVELS};
use crate::types::{Asid, PAddr, PPtr};

/// Hierarchy depths an image region can be installed at; depth 0 is the root itself.
pub const KI_NUM_LEVELS: usize = PT_LEVELS + 1;

/// Address bits below a slot reached at `level` (level 0 covers the whole address space).
#[inline]
pub const fn untranslated_bits(level: usize) -> usize {
    PAGE_BITS + PT_INDEX_BITS * (PT_LEVELS - level)
}

/// Whether a region is private to each image or backed by common memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionKind {
    Private,
    Shared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct RegionId(pub usize);

/// One entry of an image's region table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KiRegion {
    pub id: RegionId,
    pub kind: RegionKind,
    /// Hierarchy depth the backing memory is installed at.
    pub level: usize,
    /// Virtual base the region translates.
    pub map_addr: usize,
}

/// How [`KernelImageManager::clone_entry`] fills the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapStrategy {
    /// Byte copy into the destination's existing placeholder page.
    Copied,
    /// Install the source's entry so both images use the same memory.
    Shared,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ImageId(pub usize);

/// An independently switchable kernel address space.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelImage {
    root: Option<PPtr>,
    asid: Asid,
    stack_initialized: bool,
    regions: Vec<KiRegion>,
}

impl KernelImage {
    pub fn root(&self) -> Option<PPtr> {
        self.root
    }

    pub fn asid(&self) -> Asid {
        self.asid
    }

    pub fn stack_initialized(&self) -> bool {
        self.stack_initialized
    }

    pub fn regions(&self) -> &[KiRegion] {
        &self.regions
    }

    fn region(&self, id: RegionId) -> Option<&KiRegion> {
        self.regions.iter().find(|region| region.id == id)
    }
}

/// Construction-order violation detected while building or switching images.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageError {
    UnknownImage,
    UnknownRegion,
    /// Level outside `0..KI_NUM_LEVELS`, or a clone depth of 0.
    InvalidDepth,
    RootAlreadySet,
    RootMissing,
    /// Destination slot already holds a valid entry.
    SlotOccupied,
    /// The walk stopped at a granularity other than the one the level requires.
    UntranslatedMismatch { expected: usize, found: usize },
    /// `Copied` clone onto a slot without a valid global page.
    PlaceholderMissing,
    /// The placeholder is the source page itself, so there is nothing private to copy into.
    PlaceholderAliased,
    /// Nothing is mapped at the source address.
    SourceUnmapped,
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::UnknownImage => f.write_str("unknown kernel image"),
            ImageError::UnknownRegion => f.write_str("unknown region"),
            ImageError::InvalidDepth => f.write_str("invalid depth"),
            ImageError::RootAlreadySet => f.write_str("root already set"),
            ImageError::RootMissing => f.write_str("root missing"),
            ImageError::SlotOccupied => f.write_str("slot occupied"),
            ImageError::UntranslatedMismatch { expected, found } => {
                write!(f, "expected {expected} untranslated bits, found {found}")
            }
            ImageError::PlaceholderMissing => f.write_str("no placeholder page to copy into"),
            ImageError::PlaceholderAliased => f.write_str("placeholder aliases the source page"),
            ImageError::SourceUnmapped => f.write_str("source address unmapped"),
        }
    }
}

/// Owns every kernel image and the shared kernel stack location.
pub struct KernelImageManager<A> {
    tr: A,
    /// Top (highest address, exclusive) of the kernel stack in the shared region.
    stack_top: usize,
    images: Vec<KernelImage>,
}

impl<A: AddressTranslator> KernelImageManager<A> {
    pub fn new(tr: A, stack_top: usize) -> Self {
        Self { tr, stack_top, images: Vec::new() }
    }

    /// Registers an empty image bound to `asid` with the given region table.
    pub fn create_image(&mut self, asid: Asid, regions: Vec<KiRegion>) -> ImageId {
        self.images.push(KernelImage { root: None, asid, stack_initialized: false, regions });
        ImageId(self.images.len() - 1)
    }

    pub fn image(&self, id: ImageId) -> Option<&KernelImage> {
        self.images.get(id.0)
    }

    fn image_mut(&mut self, id: ImageId) -> Result<&mut KernelImage, ImageError> {
        self.images.get_mut(id.0).ok_or(ImageError::UnknownImage)
    }

    fn root_of(&self, id: ImageId) -> Result<PPtr, ImageError> {
        self.image(id).ok_or(ImageError::UnknownImage)?.root.ok_or(ImageError::RootMissing)
    }

    /// Installs the memory at `paddr` for `region` of `image`.
    ///
    /// Depth 0 makes it the image's root. Deeper levels need the path down to the region's
    /// slot to exist already; the last level maps global RWX kernel pages, shallower levels
    /// install table pointers.
    pub fn map_region(&mut self, image: ImageId, region: RegionId, paddr: PAddr) -> Result<(), ImageError> {
        let pptr = self.tr.pptr_from_paddr(paddr);
        let tr = &self.tr;
        let img = self.images.get_mut(image.0).ok_or(ImageError::UnknownImage)?;
        let KiRegion { level, map_addr, .. } = *img.region(region).ok_or(ImageError::UnknownRegion)?;
        if level >= KI_NUM_LEVELS {
            return Err(ImageError::InvalidDepth);
        }

        if level == 0 {
            if img.root.is_some() {
                return Err(ImageError::RootAlreadySet);
            }
            img.root = Some(pptr);
            return Ok(());
        }

        let root = img.root.ok_or(ImageError::RootMissing)?;
        let DepthSlot { slot, bits_left } = lookup_by_depth(tr, root, map_addr, level);
        if slot.read().is_valid() {
            return Err(ImageError::SlotOccupied);
        }
        let expected = untranslated_bits(level);
        if bits_left != expected {
            return Err(ImageError::UntranslatedMismatch { expected, found: bits_left });
        }

        // Global so the entry survives ASID changes; a switch flushes everything anyway.
        let pte = if level == KI_NUM_LEVELS - 1 { Pte::kernel(paddr) } else { Pte::table(paddr) };
        slot.write(pte);
        log_trace!(
            target: "kimage",
            "image {} region {} level {} {:#x} -> {:#x}",
            image.0,
            region.0,
            level,
            map_addr,
            paddr
        );
        Ok(())
    }

    /// Entry translating `vaddr` at `depth` in the image rooted at `root`, narrowed to the
    /// matching sub-page when the walk ended at a larger leaf.
    fn entry_at(&self, root: PPtr, vaddr: usize, depth: usize) -> Result<Pte, ImageError> {
        let DepthSlot { slot, bits_left } = lookup_by_depth(&self.tr, root, vaddr, depth);
        let entry = slot.read();
        if !entry.is_valid() {
            return Err(ImageError::SourceUnmapped);
        }
        let wanted = untranslated_bits(depth);
        if bits_left > wanted {
            let offset = (vaddr & mask(bits_left)) & !mask(wanted);
            return Ok(entry.with_ppn(entry.ppn() + (offset >> PAGE_BITS)));
        }
        Ok(entry)
    }

    /// Fills `dest`'s entry for `vaddr` at `depth` from `src` according to `strategy`.
    pub fn clone_entry(
        &mut self,
        dest: ImageId,
        src: ImageId,
        vaddr: usize,
        depth: usize,
        strategy: MapStrategy,
    ) -> Result<(), ImageError> {
        if depth == 0 || depth >= KI_NUM_LEVELS {
            return Err(ImageError::InvalidDepth);
        }
        let dest_root = self.root_of(dest)?;
        let src_root = self.root_of(src)?;

        let DepthSlot { slot, bits_left } = lookup_by_depth(&self.tr, dest_root, vaddr, depth);
        let expected = untranslated_bits(depth);
        if bits_left != expected {
            return Err(ImageError::UntranslatedMismatch { expected, found: bits_left });
        }
        let current = slot.read();

        match strategy {
            MapStrategy::Copied => {
                if !current.is_valid() || !current.flags().contains(PteFlags::GLOBAL) {
                    return Err(ImageError::PlaceholderMissing);
                }
                let source = self.entry_at(src_root, vaddr, depth)?;
                if source.paddr() == current.paddr() {
                    return Err(ImageError::PlaceholderAliased);
                }
                let from = self.tr.pptr_from_paddr(source.paddr());
                let to = self.tr.pptr_from_paddr(current.paddr());
                // SAFETY: both entries map `1 << expected` bytes of kernel memory reachable
                // through the physical window. Both are aligned to that size and differ, so
                // the ranges are disjoint.
                unsafe {
                    core::ptr::copy_nonoverlapping(
                        from.as_mut_ptr::<u8>() as *const u8,
                        to.as_mut_ptr::<u8>(),
                        1 << expected,
                    );
                }
            }
            MapStrategy::Shared => {
                if current.is_valid() || current.ppn() != 0 {
                    return Err(ImageError::SlotOccupied);
                }
                slot.write(self.entry_at(src_root, vaddr, depth)?);
            }
        }
        log_trace!(
            target: "kimage",
            "clone {:?} {:#x} depth {} image {} -> {}",
            strategy,
            vaddr,
            depth,
            src.0,
            dest.0
        );
        Ok(())
    }

    /// Kernel pointer `vaddr` resolves to inside `image`.
    pub fn translate(&self, image: ImageId, vaddr: usize) -> Result<PPtr, ImageError> {
        let root = self.root_of(image)?;
        let DepthSlot { slot, bits_left } = lookup_by_depth(&self.tr, root, vaddr, PT_LEVELS);
        let pte = slot.read();
        if !pte.is_leaf() {
            return Err(ImageError::SourceUnmapped);
        }
        Ok(self.tr.pptr_from_paddr(pte.paddr()).offset(vaddr & mask(bits_left)))
    }

    /// Makes `image` the active kernel address space.
    ///
    /// On an image's first activation the live stack is first relocated into the image's
    /// private stack alias. Not re-entrant.
    pub fn switch_image(&mut self, image: ImageId, machine: &dyn Machine) -> Result<(), ImageError> {
        let root = self.root_of(image)?;
        let root_paddr = self.tr.paddr_from_pptr(root);
        let (asid, initialized) = {
            let img = self.image_mut(image)?;
            (img.asid, img.stack_initialized)
        };
        if initialized {
            machine.set_vspace_root(root_paddr, asid);
            return Ok(());
        }

        // The stack top sits at the start of the shared region; the byte just below it is
        // still in the private stack region, whose image-local alias is the copy target.
        let src_top = self.stack_top;
        let dst_top = self.translate(image, src_top - 1)?.raw() + 1;
        let img = self.image_mut(image)?;

        // Nothing below may fail or keep stack state across the copy: stores to the old frame
        // after relocation are lost once the new root is live.
        let irq = machine.disable_interrupts();
        // SAFETY: interrupts are masked, `dst_top` ends the image's private stack alias which is
        // mapped by the physical window, and `src_top` is the top of the running stack.
        unsafe { machine.relocate_stack(src_top, dst_top) };
        img.stack_initialized = true;
        machine.fence();
        machine.set_vspace_root(root_paddr, asid);
        machine.restore_interrupts(irq);

        log_debug!(
            target: "kimage",
            "image {} live: stack {:#x} -> {:#x}, root {:#x}",
            image.0,
            src_top,
            dst_top,
            root_paddr
        );
        Ok(())
    }
}
