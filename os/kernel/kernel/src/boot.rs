//! Bare-metal entry into memory bring-up.
//!
//! The boot stub runs the kernel at its link address before paging is on,
//! so `pa + PAGE_OFFSET` reaches `pa` both before and after the switch and
//! one [`LinearPhysMapper`] serves the whole sequence.

use crate::mm::{self, KernelMemory};
use kernel_alloc::LinearPhysMapper;
use kernel_info::boot::{MultibootInfo, translate_block};
use kernel_info::image::KernelImage;
use kernel_info::memory::{LinearMapError, ZoneLayout};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::X86Mmu;
use log::error;

unsafe extern "C" {
    static __kernel_start: u8;
    static __kernel_end: u8;
    static __ro_start: u8;
    static __ro_end: u8;
}

static MAPPER: LinearPhysMapper = LinearPhysMapper;

#[allow(clippy::cast_possible_truncation)]
fn symbol(at: *const u8) -> VirtualAddress {
    VirtualAddress::new(at.addr() as u32)
}

/// Section bounds of the running kernel, from the linker script.
///
/// # Errors
/// If a symbol lies outside the linear mapping, i.e. the kernel was linked
/// for a different `PAGE_OFFSET`.
pub fn kernel_image() -> Result<KernelImage, LinearMapError> {
    KernelImage::from_linker_symbols(
        symbol(&raw const __kernel_start),
        symbol(&raw const __kernel_end),
        symbol(&raw const __ro_start),
        symbol(&raw const __ro_end),
    )
}

/// Bring up memory management and retire `bootmem`.
///
/// # Panics
/// On any initialisation failure.
///
/// # Safety
/// Called once, from the entry stub, at CPL 0, with interrupts disabled and
/// `info` holding the boot loader's information block address (physical,
/// as passed in `ebx`, or already kernel-virtual).
pub unsafe fn start(info: *mut MultibootInfo) -> KernelMemory<'static, LinearPhysMapper> {
    #[cfg(feature = "qemu")]
    kernel_qemu::QemuLogger::new(log::LevelFilter::Debug).init().ok();

    let image = match kernel_image() {
        Ok(image) => image,
        Err(e) => {
            error!("boot: kernel image: {e}");
            panic!("boot: kernel image: {e}");
        }
    };
    // SAFETY: the caller guarantees CPL 0 and a valid information block.
    let mut mmu = unsafe { X86Mmu::new() };
    let info = match translate_block(info) {
        Ok(info) => info,
        Err(e) => {
            error!("boot: {e}");
            panic!("boot: {e}");
        }
    };
    // SAFETY: the block lies in linearly mapped low memory, reached through
    // its kernel-virtual address from here on.
    let info = unsafe { &mut *info };
    let early = unsafe { mm::init_or_panic(info, image, ZoneLayout::I386, &MAPPER, &mut mmu) };
    early.handoff()
}
