//! # Kernel Early Memory
//!
//! The kernel side of memory bring-up: [`mm::init`] takes the boot loader's
//! descriptor and the kernel's own layout and returns the running memory
//! subsystem, paging enabled and the identity mapping retired.
//!
//! ```text
//! MultibootInfo ──translate──► MemoryMap
//!                                 │
//!   PlacementAlloc ──► BootMem ◄──┤ holes
//!         │                       │
//!         ├──► PagingBootstrap ──► AddressSpace
//!         └──► FrameTable ◄───────┘
//!                  ▲
//!   BootMem ──free_all (EarlyMemory::handoff)
//! ```
//!
//! On bare-metal i386 builds, [`boot::start`] wires this to the real CPU,
//! the linker's section symbols and the QEMU debug console.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod boot;
pub mod mm;

pub use crate::mm::{EarlyMemory, InitError, KernelMemory};
