//! # Virtual and Physical Memory Address Types (i386)
//!
//! Strongly typed wrappers for raw 32-bit memory addresses, page bases and
//! page-frame numbers used by the paging and early memory management code.
//!
//! ## Overview
//!
//! Without PAE, both address spaces of the i386 are 32 bits wide. Raw `u32`
//! values are easy to mix up, so every address crossing a module boundary is
//! tagged with the space it lives in:
//!
//! | Concept | Generic | Description |
//! |----------|----------|-------------|
//! | [`MemoryAddress`] | – | A raw 32-bit address, either physical or virtual. |
//! | [`MemoryPage<S>`] | [`S: PageSize`](PageSize) | A page-aligned base address of a page of size `S`. |
//! | [`MemoryAddressOffset<S>`] | [`S: PageSize`](PageSize) | An offset within a page of size `S`. |
//!
//! These are then wrapped to distinguish between virtual and physical spaces:
//!
//! | Wrapper | Meaning |
//! |----------|----------|
//! | [`VirtualAddress`] / [`VirtualPage<S>`] | Refer to virtual (page-table translated) memory. |
//! | [`PhysicalAddress`] / [`PhysicalPage<S>`] | Refer to physical memory or MMIO regions. |
//! | [`FrameNumber`] | A physical page-frame number (PFN), i.e. `address / 4096`. |
//!
//! There is deliberately no `From<PhysicalAddress> for VirtualAddress`. The
//! only sanctioned conversion is the kernel's linear mapping, which is checked
//! against the mapped range in `kernel_info::memory`.
//!
//! ## Page Sizes
//!
//! - [`Size4K`] — 4 KiB pages (mapped by a page-table entry)
//! - [`Size4M`] — 4 MiB pages (a page-directory entry with the page-size bit set)
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xC010_1234);
//! let (page, off) = va.split::<Size4K>();
//! assert_eq!(page.base().as_u32(), 0xC010_1000);
//! assert_eq!(page.join(off), va);
//!
//! let pa = PhysicalAddress::new(0x0010_1234);
//! assert_eq!(pa.frame_number_down().as_u32(), 0x101);
//! assert_eq!(pa.frame_number_up().as_u32(), 0x102);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod frame_number;
mod memory_address;
mod memory_address_offset;
mod memory_page;
mod page_size;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use crate::frame_number::FrameNumber;
pub use crate::memory_address::MemoryAddress;
pub use crate::memory_address_offset::MemoryAddressOffset;
pub use crate::memory_page::MemoryPage;
pub use crate::page_size::{PageSize, Size4K, Size4M};
pub use crate::physical_address::PhysicalAddress;
pub use crate::physical_page::PhysicalPage;
pub use crate::virtual_address::VirtualAddress;
pub use crate::virtual_page::VirtualPage;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_join_4k() {
        let a = MemoryAddress::new(0x1234_5678);
        let (p, o) = a.split::<Size4K>();
        assert_eq!(p.base().as_u32() & 0xFFF, 0);
        assert_eq!(o.as_u32(), 0x678);
        assert_eq!(p.join(o), a);
    }

    #[test]
    fn split_and_join_4m() {
        let a = MemoryAddress::new(0xC0C1_2345);
        let (p, o) = a.split::<Size4M>();
        assert_eq!(p.base().as_u32(), 0xC0C0_0000);
        assert_eq!(o.as_u32(), 0x1_2345);
        assert_eq!(p.join(o), a);
    }

    #[test]
    fn virtual_vs_physical_wrappers() {
        let va = VirtualAddress::new(0xC000_1234);
        let (vp, vo) = va.split::<Size4K>();
        assert_eq!(vp.base().as_u32(), 0xC000_1000);
        assert_eq!(vo.as_u32(), 0x234);
        assert_eq!(vp.join(vo), va);

        let pa = PhysicalAddress::new(0x0020_0042);
        let (pp, po) = pa.split::<Size4K>();
        assert_eq!(pp.base().as_u32(), 0x0020_0000);
        assert_eq!(po.as_u32(), 0x42);
        assert_eq!(pp.join(po), pa);
    }

    #[test]
    fn alignment_helpers() {
        let a = MemoryAddress::new(0x12345);
        assert_eq!(a.align_down::<Size4K>().as_u32(), 0x12000);
        assert_eq!(a.align_up::<Size4K>().map(MemoryAddress::as_u32), Some(0x13000));
        assert_eq!(
            MemoryAddress::new(0x13000).align_up::<Size4K>(),
            Some(MemoryAddress::new(0x13000))
        );
        assert_eq!(MemoryAddress::new(0xFFFF_F001).align_up::<Size4K>(), None);
        assert!(MemoryAddress::new(0x40_0000).is_aligned::<Size4M>());
        assert!(!MemoryAddress::new(0x40_1000).is_aligned::<Size4M>());
    }

    #[test]
    fn frame_numbers_round_in_both_directions() {
        let pa = PhysicalAddress::new(0x3FFF);
        assert_eq!(pa.frame_number_down(), FrameNumber::new(3));
        assert_eq!(pa.frame_number_up(), FrameNumber::new(4));

        let aligned = PhysicalAddress::new(0x4000);
        assert_eq!(aligned.frame_number_down(), FrameNumber::new(4));
        assert_eq!(aligned.frame_number_up(), FrameNumber::new(4));

        // The last frame of the 32-bit space rounds up past u32 addresses.
        let top = PhysicalAddress::new(0xFFFF_FFFF);
        assert_eq!(top.frame_number_up(), FrameNumber::new(0x10_0000));
    }
}
