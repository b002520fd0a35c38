//! # Virtual Memory Support (i386)
//!
//! Two-level, non-PAE paging for the kernel's early bring-up.
//!
//! ## What you get
//! - Hardware [`PtEntry`] / [`PdEntry`] records and the 4 KiB-aligned
//!   [`PageTable`] / [`PageDirectory`] wrappers around them.
//! - An [`AddressSpace`] that resolves virtual addresses by walking the tables.
//! - The [`bootstrap`] state machine that builds the kernel tables and turns
//!   paging on without losing the instruction stream.
//! - The seams the algorithms are written against: [`FrameAlloc`] (where table
//!   frames come from), [`PhysMapper`] (how physical memory is reached) and
//!   [`Mmu`] (privileged register and TLB operations).
//!
//! ## Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |  PD   |  PT   | Offset |
//!
//!  CR3 → PD ─┬─ PDE (PS=0) → PT → PTE → 4 KiB frame
//!            └─ PDE (PS=1) ─────────────→ 4 MiB page
//! ```
//!
//! Each level holds 1024 four-byte entries; one directory covers the whole
//! 4 GiB space.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

#[cfg(any(test, feature = "testing"))]
extern crate alloc;

pub mod address_space;
pub mod bootstrap;
pub mod mmu;
pub mod page_table;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use crate::address_space::{AddressSpace, PageFault};
pub use crate::bootstrap::{PagingBootstrap, PagingError, PagingState};
pub use crate::mmu::Mmu;
#[cfg(target_arch = "x86")]
pub use crate::mmu::X86Mmu;
pub use crate::page_table::pd::{L2Index, PageDirectory, PdEntry, PdEntryKind, Pde, Pde4M};
pub use crate::page_table::pt::{L1Index, PageTable, PtEntry};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K};

/// Minimal frame allocator used to obtain **physical** 4 KiB frames
/// for page tables.
///
/// Returns `None` on out-of-memory.
pub trait FrameAlloc {
    /// Allocate one 4 KiB *physical* frame. Must return page-aligned frames.
    fn alloc_4k(&mut self) -> Option<PhysicalPage<Size4K>>;
}

/// Makes physical memory reachable from the current address space.
///
/// Typical patterns:
/// - **Kernel**: the linear map, `pa + PAGE_OFFSET`.
/// - **Host tests**: an offset into a buffer standing in for RAM.
pub trait PhysMapper {
    /// Pointer through which the byte at physical address `at` is reachable.
    ///
    /// Computing the pointer is harmless; dereferencing it is not.
    fn phys_to_ptr(&self, at: PhysicalAddress) -> *mut u8;

    /// Borrow the `T` stored at `at`.
    ///
    /// # Safety
    /// - `at` must be mapped writable for all of `'a` and aligned for `T`.
    /// - The bytes at `at` must be a valid `T`.
    /// - No other reference to these bytes may be live for `'a`.
    #[allow(clippy::cast_ptr_alignment)]
    unsafe fn phys_to_mut<'a, T>(&self, at: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_ptr(at).cast::<T>() }
    }

    /// Borrow `len` consecutive `T`s starting at `at`.
    ///
    /// # Safety
    /// As [`phys_to_mut`](Self::phys_to_mut), for the whole range.
    #[allow(clippy::cast_ptr_alignment)]
    unsafe fn phys_slice_mut<'a, T>(&self, at: PhysicalAddress, len: usize) -> &'a mut [T] {
        unsafe { core::slice::from_raw_parts_mut(self.phys_to_ptr(at).cast::<T>(), len) }
    }

    /// Borrow the [`PageDirectory`] in `page`.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn pd_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageDirectory {
        // SAFETY: page-table frames are only ever handed out to the paging code.
        unsafe { self.phys_to_mut::<PageDirectory>(page.base()) }
    }

    /// Borrow the [`PageTable`] in `page`.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    fn pt_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageTable {
        // SAFETY: page-table frames are only ever handed out to the paging code.
        unsafe { self.phys_to_mut::<PageTable>(page.base()) }
    }
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + a - 1` must not overflow.
///
/// ```rust
/// # use kernel_vmem::align_up;
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> u32 {
    (x + a - 1) & !(a - 1)
}
