//! # Early Physical Memory Allocation
//!
//! The allocators that exist before the kernel has a heap, in the order the
//! boot path brings them up:
//!
//! ```text
//! kernel image end
//!       │
//!       ▼
//! ┌──────────────────┐   bitmap, page tables, frame table
//! │ PlacementAlloc   │──────────────────────────────────────┐
//! └──────────────────┘                                      │
//! ┌──────────────────┐   early kernel allocations           │
//! │ BootMem          │   (DMA / NORMAL, first fit)          │
//! └────────┬─────────┘                                      │
//!          │ free_all                                       ▼
//! ┌────────▼─────────┐
//! │ FrameTable       │   permanent per-frame accounting
//! └──────────────────┘
//! ```
//!
//! - [`placement`]: bump allocator right after the kernel image; never frees.
//! - [`bootmem`]: bitmap allocator over low memory, zone aware.
//! - [`memmap`]: the whole-machine frame table that takes over from `bootmem`.
//! - [`phys_mapper`]: the [`PhysMapper`](kernel_vmem::PhysMapper) for the
//!   kernel's linear mapping.
//!
//! Everything here reaches memory through a `PhysMapper`, so the allocators
//! run unchanged over `kernel_vmem::testing::SimulatedMemory` in host tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod bootmem;
pub mod memmap;
pub mod phys_mapper;
pub mod placement;

pub use crate::bootmem::{BootMem, BootMemError};
pub use crate::memmap::{FrameDescriptor, FrameFlags, FrameTable};
pub use crate::phys_mapper::LinearPhysMapper;
pub use crate::placement::PlacementAlloc;

#[cfg(test)]
mod test_support {
    pub const AVAILABLE: u32 = 1;
    pub const RESERVED: u32 = 2;

    /// Encode `(base, length, type)` triples as boot-loader memory map entries.
    pub fn map_bytes(regions: &[(u64, u64, u32)]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for &(base, length, kind) in regions {
            bytes.extend_from_slice(&20u32.to_le_bytes());
            bytes.extend_from_slice(&base.to_le_bytes());
            bytes.extend_from_slice(&length.to_le_bytes());
            bytes.extend_from_slice(&kind.to_le_bytes());
        }
        bytes
    }
}
