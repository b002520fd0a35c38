//! # Kernel Configuration and Boot Interface (i386)
//!
//! Layout constants, the physical zone policy and the boot-loader handoff
//! structures shared by all memory-management crates.
//!
//! ## Modules
//!
//! * [`memory`]: `PAGE_OFFSET`, the load address, zone boundaries
//!   ([`ZoneLayout`](memory::ZoneLayout)) and the checked linear mapping
//!   between physical and kernel-virtual addresses.
//! * [`boot`]: the Multiboot information block, its memory map, and the
//!   translation of its physical pointers into kernel space.
//! * [`image`]: physical bounds of the loaded kernel and its read-only part.
//!
//! ## Address Space Layout
//!
//! ```text
//! Virtual                                      Physical
//! 0x0000_0000 ┌────────────────────────┐
//!             │ identity map (boot     │ ───► 0x0000_0000 .. 0x0080_0000
//!             │ only, first 8 MiB)     │
//!             ├────────────────────────┤
//!             │ user space (unused)    │
//! PAGE_OFFSET ├────────────────────────┤ 0xC000_0000
//!             │ linear map of lowmem   │ ───► 0x0000_0000 .. LOWMEM_END
//! KERNEL_BASE │  (kernel at +1 MiB)    │      0xC010_0000 ─► PHYS_LOAD
//!             ├────────────────────────┤ 0xF800_0000
//!             │ unmapped               │
//! 0xFFFF_FFFF └────────────────────────┘
//! ```
//!
//! ## Physical Zones
//!
//! | Zone | Range |
//! |---|---|
//! | DMA | `[0, 16 MiB)` |
//! | NORMAL | `[16 MiB, 896 MiB)` |
//! | HIGHMEM | `[896 MiB, 4 GiB)` |
//!
//! ```rust
//! # use kernel_info::memory::{Zone, phys_to_virt};
//! # use kernel_memory_addresses::PhysicalAddress;
//! let pa = PhysicalAddress::new(0x0200_0000);
//! assert_eq!(Zone::of(pa), Zone::Normal);
//! assert_eq!(phys_to_virt(pa).unwrap().as_u32(), 0xC200_0000);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod image;
pub mod memory;
