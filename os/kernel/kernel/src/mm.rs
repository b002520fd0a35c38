//! # Early Memory Bring-up
//!
//! [`init`] runs the whole early memory sequence once, on the boot CPU:
//!
//! 1. translate the boot descriptor's pointers (and those of its module
//!    list) into kernel space and read its memory map;
//! 2. start the placement allocator at the end of the kernel image;
//! 3. bring up `bootmem` and reserve the holes of the memory map;
//! 4. build the page tables from placement memory and switch paging on;
//! 5. build the frame table from placement memory.
//!
//! Everything placed in steps 4 and 5 is reserved in `bootmem` right away, so
//! no later allocation can hand it out again. The result is an
//! [`EarlyMemory`], which [`EarlyMemory::handoff`] turns into the permanent
//! [`KernelMemory`].

use kernel_alloc::{BootMem, FrameTable, PlacementAlloc};
use kernel_info::boot::{
    BootInfoError, MemoryMap, MultibootInfo, MultibootModule, translate_modules,
};
use kernel_info::image::KernelImage;
use kernel_info::memory::{LinearMapError, ZoneLayout, virt_to_phys};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::{AddressSpace, Mmu, PagingBootstrap, PagingError, PhysMapper};
use log::{debug, error, info};

/// Why [`init`] could not bring memory up.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InitError {
    #[error("boot descriptor: {0}")]
    BootInfo(#[from] BootInfoError),
    #[error("paging: {0}")]
    Paging(#[from] PagingError),
    #[error(transparent)]
    LinearMap(#[from] LinearMapError),
}

/// Memory state between bring-up and the handoff to the frame table.
pub struct EarlyMemory<'a, M: PhysMapper> {
    bootmem: BootMem<'a>,
    frames: FrameTable<'a>,
    kernel_space: AddressSpace<'a, M>,
    memory_map: MemoryMap<'a>,
}

/// Memory state after `bootmem` has been retired.
pub struct KernelMemory<'a, M: PhysMapper> {
    pub frames: FrameTable<'a>,
    pub kernel_space: AddressSpace<'a, M>,
    /// Frames `bootmem` handed to the frame table.
    pub released: usize,
}

impl<'a, M: PhysMapper> EarlyMemory<'a, M> {
    /// The boot allocator, for early kernel allocations.
    pub const fn bootmem(&mut self) -> &mut BootMem<'a> {
        &mut self.bootmem
    }

    #[must_use]
    pub const fn frame_table(&self) -> &FrameTable<'a> {
        &self.frames
    }

    /// The kernel's page directory, identity mapping retired.
    #[must_use]
    pub const fn kernel_space(&self) -> &AddressSpace<'a, M> {
        &self.kernel_space
    }

    #[must_use]
    pub const fn memory_map(&self) -> &MemoryMap<'a> {
        &self.memory_map
    }

    /// Retire `bootmem`: its free frames, and its bitmap, go to the frame table.
    #[must_use]
    pub fn handoff(self) -> KernelMemory<'a, M> {
        let Self {
            bootmem,
            mut frames,
            kernel_space,
            ..
        } = self;
        let released = bootmem.free_all(&mut frames);
        KernelMemory {
            frames,
            kernel_space,
            released,
        }
    }
}

/// Borrow the memory map the (already translated) descriptor points to.
fn memory_map<'a, M: PhysMapper>(
    info: &MultibootInfo,
    mapper: &'a M,
) -> Result<MemoryMap<'a>, InitError> {
    let (at, len) = info.memory_map_location()?;
    let pa = virt_to_phys(VirtualAddress::new(at))?;
    // SAFETY: the boot loader's structures lie in reserved low memory that
    // nothing in this sequence writes to.
    let bytes = unsafe { core::slice::from_raw_parts(mapper.phys_to_ptr(pa).cast_const(), len) };
    Ok(MemoryMap::new(bytes)?)
}

/// Translate the command-line pointers of the module list, if there is one.
fn translate_module_list<M: PhysMapper>(
    info: &MultibootInfo,
    mapper: &M,
) -> Result<(), InitError> {
    let Some((at, count)) = info.modules_location() else {
        return Ok(());
    };
    let pa = virt_to_phys(VirtualAddress::new(at))?;
    // SAFETY: the module list lies in boot-loader memory below the kernel
    // image and is not referenced elsewhere during bring-up.
    let modules = unsafe { mapper.phys_slice_mut::<MultibootModule>(pa, count) };
    translate_modules(modules)?;
    debug!("mm: {count} boot module(s) at {at:#010x}");
    Ok(())
}

fn log_boot_info(info: &MultibootInfo, map: &MemoryMap<'_>) {
    info!(
        "mm: boot flags {:#x}, {} KiB lower, {} KiB upper memory",
        info.flags.into_bits(),
        info.mem_lower,
        info.mem_upper
    );
    if info.flags.framebuffer() {
        debug!(
            "mm: framebuffer at {:#x}, {}x{}x{}",
            info.framebuffer_address(),
            info.framebuffer_width,
            info.framebuffer_height,
            info.framebuffer_bpp
        );
    }
    for region in map {
        debug!(
            "mm:   {:#011x}..{:#011x} {:?}",
            region.base,
            region.end(),
            region.kind
        );
    }
    info!(
        "mm: {} MiB available, highest address {:#x}",
        map.available_bytes() >> 20,
        map.highest_address()
    );
}

/// Bring up early memory management.
///
/// # Errors
/// [`InitError`] if the boot descriptor has no usable memory map or paging
/// cannot be set up for `layout`; nothing has been switched on in that case.
///
/// # Safety
/// - `image` describes the running kernel and `mapper` reaches the physical
///   memory after it.
/// - `mmu` controls the CPU this runs on; see
///   [`PagingBootstrap::activate_identity`] and
///   [`PagingBootstrap::retire_identity`].
/// - Called once.
pub unsafe fn init<'a, M: PhysMapper, U: Mmu>(
    info: &mut MultibootInfo,
    image: KernelImage,
    layout: ZoneLayout,
    mapper: &'a M,
    mmu: &mut U,
) -> Result<EarlyMemory<'a, M>, InitError> {
    info.translate()?;
    translate_module_list(info, mapper)?;
    let map = memory_map(info, mapper)?;
    log_boot_info(info, &map);
    let mut paging = PagingBootstrap::new(mapper, image, layout)?;

    let mut placement = PlacementAlloc::new(image.end);
    let mut bootmem = unsafe { BootMem::initialise(layout, &mut placement, mapper) };
    bootmem.reserve_holes(&map);

    let tables_from = placement.cursor();
    let kernel_space = unsafe { paging.run(&mut placement, mmu)? };
    reserve_placed(&mut bootmem, tables_from, placement.cursor());

    let frames = unsafe { FrameTable::build(&map, layout, &mut placement, mapper) };
    let (start, end) = frames.storage();
    reserve_placed(&mut bootmem, start, end);

    info!(
        "mm: placement used {}..{}, {} frames free in bootmem",
        image.end,
        placement.cursor(),
        bootmem.free_frames()
    );
    Ok(EarlyMemory {
        bootmem,
        frames,
        kernel_space,
        memory_map: map,
    })
}

fn reserve_placed(bootmem: &mut BootMem<'_>, start: PhysicalAddress, end: PhysicalAddress) {
    bootmem.reserve(start, end.as_u32() - start.as_u32());
}

/// [`init`], treating failure as fatal.
///
/// # Panics
/// If [`init`] fails; there is no way to continue without memory management.
///
/// # Safety
/// As [`init`].
pub unsafe fn init_or_panic<'a, M: PhysMapper, U: Mmu>(
    info: &mut MultibootInfo,
    image: KernelImage,
    layout: ZoneLayout,
    mapper: &'a M,
    mmu: &mut U,
) -> EarlyMemory<'a, M> {
    match unsafe { init(info, image, layout, mapper, mmu) } {
        Ok(memory) => memory,
        Err(e) => {
            error!("mm: early memory initialisation failed: {e}");
            panic!("mm: early memory initialisation failed: {e}");
        }
    }
}
