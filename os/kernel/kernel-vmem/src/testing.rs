//! # Host Stand-ins
//!
//! RAM, MMU and a frame allocator that let the paging and allocator code run
//! in ordinary `#[test]`s. Enabled by the `testing` feature.

use crate::{FrameAlloc, Mmu, PhysMapper};
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};

/// A 4 KiB-aligned raw frame.
#[repr(C, align(4096))]
struct Frame([u8; 4096]);

/// Physical memory `[0, frames * 4096)`, zero-initialised.
///
/// Physical addresses are byte offsets into the buffer. Accesses outside it
/// panic, which in a test is the closest thing to a machine check.
pub struct SimulatedMemory {
    frames: Box<[UnsafeCell<Frame>]>,
}

impl SimulatedMemory {
    #[must_use]
    pub fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames).map(|_| UnsafeCell::new(Frame([0; 4096]))).collect(),
        }
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len() * 4096
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Copy `bytes` into physical memory at `at`.
    pub fn write(&self, at: PhysicalAddress, bytes: &[u8]) {
        assert!(at.as_u32() as usize + bytes.len() <= self.len());
        // SAFETY: bounds checked above; tests are single-threaded per instance.
        unsafe {
            core::ptr::copy_nonoverlapping(bytes.as_ptr(), self.phys_to_ptr(at), bytes.len());
        }
    }

    /// Read `len` bytes starting at `at`.
    #[must_use]
    pub fn read(&self, at: PhysicalAddress, len: usize) -> Vec<u8> {
        assert!(at.as_u32() as usize + len <= self.len());
        let mut out = alloc::vec![0; len];
        // SAFETY: bounds checked above.
        unsafe {
            core::ptr::copy_nonoverlapping(self.phys_to_ptr(at), out.as_mut_ptr(), len);
        }
        out
    }
}

impl PhysMapper for SimulatedMemory {
    fn phys_to_ptr(&self, at: PhysicalAddress) -> *mut u8 {
        let offset = at.as_u32() as usize;
        assert!(
            offset < self.len(),
            "physical address {at} outside simulated memory of {:#x} bytes",
            self.len()
        );
        // SAFETY: in bounds of the boxed slice, which is one allocation.
        unsafe {
            UnsafeCell::raw_get(self.frames.as_ptr())
                .cast::<u8>()
                .add(offset)
        }
    }
}

/// A privileged operation observed by [`RecordingMmu`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MmuOp {
    LoadPageDirectory(PhysicalAddress),
    EnablePaging,
    InvalidatePage(VirtualAddress),
}

/// An [`Mmu`] that records every operation in order.
#[derive(Debug, Default)]
pub struct RecordingMmu {
    ops: Vec<MmuOp>,
    directory: PhysicalAddress,
    paging: bool,
}

impl RecordingMmu {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn ops(&self) -> &[MmuOp] {
        &self.ops
    }

    #[must_use]
    pub const fn paging_enabled(&self) -> bool {
        self.paging
    }

    /// Pages passed to `invalidate_page`, in order.
    pub fn invalidated_pages(&self) -> impl Iterator<Item = VirtualAddress> + '_ {
        self.ops.iter().filter_map(|op| match op {
            MmuOp::InvalidatePage(va) => Some(*va),
            _ => None,
        })
    }
}

impl Mmu for RecordingMmu {
    unsafe fn load_page_directory(&mut self, directory: PhysicalPage<Size4K>) {
        self.directory = directory.base();
        self.ops.push(MmuOp::LoadPageDirectory(directory.base()));
    }

    fn page_directory(&self) -> PhysicalPage<Size4K> {
        PhysicalPage::containing_address(self.directory)
    }

    unsafe fn enable_paging(&mut self) {
        self.paging = true;
        self.ops.push(MmuOp::EnablePaging);
    }

    unsafe fn invalidate_page(&mut self, va: VirtualAddress) {
        self.ops.push(MmuOp::InvalidatePage(va));
    }
}

/// A trivial **bump** allocator over `[next, end)`: always hands out the next
/// 4 KiB frame.
#[derive(Debug)]
pub struct BumpFrames {
    next: u32,
    end: u32,
}

impl BumpFrames {
    /// `start` is rounded up to a page boundary.
    #[must_use]
    pub const fn new(start: PhysicalAddress, end: PhysicalAddress) -> Self {
        Self {
            next: crate::align_up(start.as_u32(), 4096),
            end: end.as_u32(),
        }
    }

    /// Next frame that would be handed out.
    #[must_use]
    pub const fn next(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.next)
    }
}

impl FrameAlloc for BumpFrames {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        if self.end.saturating_sub(self.next) < 4096 {
            return None;
        }
        let page = PhysicalPage::containing_address(PhysicalAddress::new(self.next));
        self.next += 4096;
        Some(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulated_memory_is_contiguous() {
        let phys = SimulatedMemory::new(2);
        phys.write(PhysicalAddress::new(0xFFE), &[1, 2, 3, 4]);
        assert_eq!(phys.read(PhysicalAddress::new(0xFFE), 4), [1, 2, 3, 4]);
        assert_eq!(phys.read(PhysicalAddress::new(0x1000), 1), [3]);
    }

    #[test]
    #[should_panic(expected = "outside simulated memory")]
    fn out_of_range_access_panics() {
        let phys = SimulatedMemory::new(1);
        let _ = phys.phys_to_ptr(PhysicalAddress::new(0x1000));
    }

    #[test]
    fn bump_frames_run_out() {
        let mut frames = BumpFrames::new(PhysicalAddress::new(0x800), PhysicalAddress::new(0x3000));
        assert_eq!(frames.alloc_4k().map(|p| p.base().as_u32()), Some(0x1000));
        assert_eq!(frames.alloc_4k().map(|p| p.base().as_u32()), Some(0x2000));
        assert!(frames.alloc_4k().is_none());
    }
}
