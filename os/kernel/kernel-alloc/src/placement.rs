//! # Placement Allocator
//!
//! A never-freeing bump pointer over the physical memory right after the
//! kernel image. It serves the handful of fixed-size structures that must
//! exist before any real allocator does: the bootmem bitmap, the page
//! directory and tables, and the frame table.
//!
//! The cursor is a physical address; callers get the kernel-virtual alias
//! (`pa + PAGE_OFFSET`) and, on request, the physical address as well.

use kernel_info::memory::{LOWMEM_END, PAGE_OFFSET, PAGE_SIZE};
use kernel_memory_addresses::{PageSize, PhysicalAddress, PhysicalPage, Size4K, VirtualAddress};
use kernel_vmem::FrameAlloc;
use log::{trace, warn};

/// Bump allocator seeded at the end of the kernel image.
#[derive(Debug)]
pub struct PlacementAlloc {
    start: u32,
    cursor: u32,
}

impl PlacementAlloc {
    /// Start handing out memory at `start` (usually the kernel's physical end).
    #[must_use]
    pub const fn new(start: PhysicalAddress) -> Self {
        Self {
            start: start.as_u32(),
            cursor: start.as_u32(),
        }
    }

    /// Physical address of the next byte to be handed out.
    #[must_use]
    pub const fn cursor(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.cursor)
    }

    /// Everything handed out so far, `[start, cursor)`.
    #[must_use]
    pub const fn used(&self) -> (PhysicalAddress, PhysicalAddress) {
        (PhysicalAddress::new(self.start), PhysicalAddress::new(self.cursor))
    }

    /// `kmalloc`: `size` bytes at the cursor.
    pub fn alloc(&mut self, size: u32) -> VirtualAddress {
        self.alloc_with_phys(size).0
    }

    /// `kvmalloc`: `size` bytes starting on a page boundary.
    pub fn alloc_aligned(&mut self, size: u32) -> VirtualAddress {
        self.alloc_aligned_with_phys(size).0
    }

    /// `kmalloc_p`: like [`alloc`](Self::alloc), also returning the physical address.
    pub fn alloc_with_phys(&mut self, size: u32) -> (VirtualAddress, PhysicalAddress) {
        self.bump(size, false)
    }

    /// `kvmalloc_p`: like [`alloc_aligned`](Self::alloc_aligned), also returning
    /// the physical address.
    pub fn alloc_aligned_with_phys(&mut self, size: u32) -> (VirtualAddress, PhysicalAddress) {
        self.bump(size, true)
    }

    fn bump(&mut self, size: u32, page_aligned: bool) -> (VirtualAddress, PhysicalAddress) {
        let before = self.cursor;
        if page_aligned {
            self.cursor = self.cursor.wrapping_add(PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
        }
        let pa = self.cursor;
        self.cursor = self.cursor.wrapping_add(size);
        if self.cursor > LOWMEM_END || pa < before || self.cursor < pa {
            warn!(
                "placement: cursor {:#010x} has left the linear mapping",
                self.cursor
            );
        }
        trace!("placement: {size:#x} bytes at {pa:#010x}");
        (
            VirtualAddress::new(pa.wrapping_add(PAGE_OFFSET)),
            PhysicalAddress::new(pa),
        )
    }
}

impl FrameAlloc for PlacementAlloc {
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>> {
        let (_, pa) = self.alloc_aligned_with_phys(Size4K::SIZE);
        Some(PhysicalPage::containing_address(pa))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unaligned_allocations_are_contiguous() {
        let mut p = PlacementAlloc::new(PhysicalAddress::new(0x0015_8123));
        let (va, pa) = p.alloc_with_phys(10);
        assert_eq!(pa, PhysicalAddress::new(0x0015_8123));
        assert_eq!(va, VirtualAddress::new(0xC015_8123));
        assert_eq!(p.alloc(6), VirtualAddress::new(0xC015_812D));
        assert_eq!(p.cursor(), PhysicalAddress::new(0x0015_8133));
    }

    #[test]
    fn aligned_allocations_skip_to_the_next_page() {
        let mut p = PlacementAlloc::new(PhysicalAddress::new(0x0015_8123));
        let (va, pa) = p.alloc_aligned_with_phys(0x2000);
        assert_eq!(pa, PhysicalAddress::new(0x0015_9000));
        assert_eq!(va.as_u32(), 0xC015_9000);
        // Already aligned: no gap.
        assert_eq!(p.alloc_aligned(1), VirtualAddress::new(0xC015_B000));
        assert_eq!(
            p.used(),
            (PhysicalAddress::new(0x0015_8123), PhysicalAddress::new(0x0015_B001))
        );
    }

    #[test]
    fn cursor_wraps_past_the_top_of_memory() {
        let mut p = PlacementAlloc::new(PhysicalAddress::new(0xFFFF_F800));
        let (_, pa) = p.alloc_aligned_with_phys(0x100);
        assert_eq!(pa, PhysicalAddress::new(0));
        assert_eq!(p.cursor(), PhysicalAddress::new(0x100));

        let mut p = PlacementAlloc::new(PhysicalAddress::new(0xFFFF_FFF0));
        assert_eq!(p.alloc_with_phys(0x20).1, PhysicalAddress::new(0xFFFF_FFF0));
        assert_eq!(p.cursor(), PhysicalAddress::new(0x10));
    }

    #[test]
    fn frames_come_from_the_cursor() {
        let mut p = PlacementAlloc::new(PhysicalAddress::new(0x0020_0001));
        let a = p.alloc_4k().unwrap();
        let b = p.alloc_4k().unwrap();
        assert_eq!(a.base(), PhysicalAddress::new(0x0020_1000));
        assert_eq!(b.base(), PhysicalAddress::new(0x0020_2000));
    }
}
