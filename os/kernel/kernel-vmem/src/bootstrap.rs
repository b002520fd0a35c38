//! # Paging Bootstrap
//!
//! Builds the kernel page tables and switches the CPU from physical to
//! paged addressing in four strictly ordered steps:
//!
//! ```text
//! Unpaged ──build_tables──► TablesBuilt ──activate_identity──► IdentityActive
//!         ──install_linear──► LinearActive ──retire_identity──► IdentityRetired
//! ```
//!
//! 1. **build_tables**: allocate a directory and one table per 4 MiB of low
//!    memory (`[0, normal_end)`), filling every PTE as present and global,
//!    writable unless the frame lies wholly inside the kernel's read-only
//!    section.
//! 2. **activate_identity**: link the first 8 MiB twice, at virtual 0
//!    (temporary) and at `PAGE_OFFSET` (permanent), load CR3, set CR0.PG/WP.
//!    The instruction after the switch is still fetched from a low address,
//!    which the identity slots keep valid.
//! 3. **install_linear**: link the remaining tables at their
//!    `PAGE_OFFSET`-relative slots only.
//! 4. **retire_identity**: clear the identity slots and invalidate their
//!    translations. The returned [`AddressSpace`] is the kernel's.
//!
//! Each step checks the current state; calling one out of order is an error
//! and leaves everything untouched.

use crate::page_table::pd::{L2Index, PdEntry, Pde};
use crate::page_table::pt::{ENTRIES, L1Index, PtEntry};
use crate::{AddressSpace, FrameAlloc, Mmu, PhysMapper};
use kernel_info::image::KernelImage;
use kernel_info::memory::{KERNEL_IDENTITY_BYTES, LOWMEM_END, PAGE_OFFSET, PAGE_SIZE, ZoneLayout};
use kernel_memory_addresses::{
    FrameNumber, PageSize, PhysicalAddress, PhysicalPage, Size4K, Size4M, VirtualAddress,
};
use log::{debug, info, trace};

/// Tables linked at virtual 0 while paging is switched on.
pub const IDENTITY_TABLES: usize = (KERNEL_IDENTITY_BYTES >> Size4M::SHIFT) as usize;

/// Upper bound of tables the linear mapping can need.
pub const MAX_LINEAR_TABLES: usize = (LOWMEM_END >> Size4M::SHIFT) as usize;

/// Directory slot of `PAGE_OFFSET`.
pub const KERNEL_DIRECTORY_SLOT: usize = (PAGE_OFFSET >> Size4M::SHIFT) as usize;

/// Where the bootstrap is in its sequence.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum PagingState {
    Unpaged,
    TablesBuilt,
    IdentityActive,
    LinearActive,
    IdentityRetired,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PagingError {
    #[error("paging step requires state {expected:?}, but the bootstrap is in {actual:?}")]
    OutOfOrder {
        expected: PagingState,
        actual: PagingState,
    },
    #[error("no frame for page table #{allocated}")]
    TableAllocation { allocated: usize },
    #[error("linear mapping end {end:#x} is not a 4 MiB multiple within [8 MiB, 896 MiB]")]
    UnmappableLayout { end: u32 },
}

/// Whether the PTE for `pfn` gets the writable bit.
///
/// Frames below the kernel (BIOS data, VGA memory) and everything past the
/// read-only section are writable; frames fully inside `.text`/`.rodata` are
/// not.
#[must_use]
pub fn frame_is_writable(image: &KernelImage, pfn: FrameNumber) -> bool {
    if pfn < image.start.frame_number_down() {
        return true;
    }
    !image.is_read_only(pfn)
}

/// Single-owner state of the paging switch.
pub struct PagingBootstrap<'m, M: PhysMapper> {
    mapper: &'m M,
    image: KernelImage,
    table_count: usize,
    directory: PhysicalPage<Size4K>,
    tables: [PhysicalPage<Size4K>; MAX_LINEAR_TABLES],
    state: PagingState,
}

impl<'m, M: PhysMapper> PagingBootstrap<'m, M> {
    /// Prepare to map `[0, layout.normal_end)` for a kernel laid out as `image`.
    ///
    /// # Errors
    /// [`PagingError::UnmappableLayout`] if the NORMAL zone does not end on a
    /// 4 MiB boundary between the identity region and `LOWMEM_END`.
    pub fn new(mapper: &'m M, image: KernelImage, layout: ZoneLayout) -> Result<Self, PagingError> {
        let end = layout.normal_end;
        if !end.is_multiple_of(Size4M::SIZE) || end < KERNEL_IDENTITY_BYTES || end > LOWMEM_END {
            return Err(PagingError::UnmappableLayout { end });
        }
        let unset = PhysicalPage::containing_address(PhysicalAddress::zero());
        Ok(Self {
            mapper,
            image,
            table_count: (end >> Size4M::SHIFT) as usize,
            directory: unset,
            tables: [unset; MAX_LINEAR_TABLES],
            state: PagingState::Unpaged,
        })
    }

    #[must_use]
    pub const fn state(&self) -> PagingState {
        self.state
    }

    /// The page directory; meaningful from [`PagingState::TablesBuilt`] on.
    #[must_use]
    pub const fn directory(&self) -> PhysicalPage<Size4K> {
        self.directory
    }

    /// The page tables, table `i` mapping physical `[i * 4 MiB, (i + 1) * 4 MiB)`.
    #[must_use]
    pub fn tables(&self) -> &[PhysicalPage<Size4K>] {
        if self.state == PagingState::Unpaged {
            return &[];
        }
        &self.tables[..self.table_count]
    }

    fn expect(&self, expected: PagingState) -> Result<(), PagingError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PagingError::OutOfOrder {
                expected,
                actual: self.state,
            })
        }
    }

    /// `Unpaged → TablesBuilt`.
    ///
    /// # Errors
    /// [`PagingError::OutOfOrder`], or [`PagingError::TableAllocation`] if
    /// `alloc` runs dry.
    pub fn build_tables<A: FrameAlloc>(&mut self, alloc: &mut A) -> Result<(), PagingError> {
        self.expect(PagingState::Unpaged)?;

        let directory = alloc
            .alloc_4k()
            .ok_or(PagingError::TableAllocation { allocated: 0 })?;
        self.mapper.pd_mut(directory).zero();

        let mut read_only = 0usize;
        for t in 0..self.table_count {
            let page = alloc
                .alloc_4k()
                .ok_or(PagingError::TableAllocation { allocated: t })?;
            let table = self.mapper.pt_mut(page);
            table.zero();
            for i in 0..ENTRIES {
                #[allow(clippy::cast_possible_truncation)]
                let pfn = FrameNumber::new((t * ENTRIES + i) as u32);
                let writable = frame_is_writable(&self.image, pfn);
                if !writable {
                    read_only += 1;
                }
                #[allow(clippy::cast_possible_truncation)]
                table.set(L1Index::new(i as u16), PtEntry::kernel(pfn, writable));
            }
            trace!("paging: table {t} at {}", page.base());
            self.tables[t] = page;
        }

        self.directory = directory;
        self.state = PagingState::TablesBuilt;
        info!(
            "paging: directory at {}, {} tables, {read_only} read-only frames",
            directory.base(),
            self.table_count
        );
        Ok(())
    }

    fn link(&self, slot: usize, table: PhysicalPage<Size4K>) {
        #[allow(clippy::cast_possible_truncation)]
        let slot = L2Index::new(slot as u16);
        self.mapper
            .pd_mut(self.directory)
            .set(slot, PdEntry::make_table(Pde::kernel_table(table)));
    }

    /// `TablesBuilt → IdentityActive`: switch paging on.
    ///
    /// # Errors
    /// [`PagingError::OutOfOrder`].
    ///
    /// # Safety
    /// On hardware the caller must be executing from, and using a stack in,
    /// the first 8 MiB of physical memory, or at their `PAGE_OFFSET` alias.
    pub unsafe fn activate_identity<U: Mmu>(&mut self, mmu: &mut U) -> Result<(), PagingError> {
        self.expect(PagingState::TablesBuilt)?;

        for i in 0..IDENTITY_TABLES {
            self.link(i, self.tables[i]);
            self.link(KERNEL_DIRECTORY_SLOT + i, self.tables[i]);
        }
        debug!("paging: identity and kernel slots linked for the first {KERNEL_IDENTITY_BYTES:#x} bytes");

        unsafe {
            mmu.load_page_directory(self.directory);
            mmu.enable_paging();
        }
        self.state = PagingState::IdentityActive;
        info!("paging: enabled with directory {}", self.directory.base());
        Ok(())
    }

    /// `IdentityActive → LinearActive`: link the rest of low memory above
    /// `PAGE_OFFSET`. Never touches the identity slots.
    ///
    /// # Errors
    /// [`PagingError::OutOfOrder`].
    pub fn install_linear(&mut self) -> Result<(), PagingError> {
        self.expect(PagingState::IdentityActive)?;

        for i in IDENTITY_TABLES..self.table_count {
            self.link(KERNEL_DIRECTORY_SLOT + i, self.tables[i]);
        }
        self.state = PagingState::LinearActive;
        info!(
            "paging: linear map {:#010x}..{:#010x}",
            PAGE_OFFSET,
            u64::from(PAGE_OFFSET) + (self.table_count as u64) * u64::from(Size4M::SIZE)
        );
        Ok(())
    }

    /// `LinearActive → IdentityRetired`: drop the low alias and hand out the
    /// kernel address space.
    ///
    /// # Errors
    /// [`PagingError::OutOfOrder`].
    ///
    /// # Safety
    /// On hardware the caller must already execute at a `PAGE_OFFSET`-relative
    /// address; no low pointer may be dereferenced afterwards.
    pub unsafe fn retire_identity<U: Mmu>(
        &mut self,
        mmu: &mut U,
    ) -> Result<AddressSpace<'m, M>, PagingError> {
        self.expect(PagingState::LinearActive)?;

        let pd = self.mapper.pd_mut(self.directory);
        for i in 0..IDENTITY_TABLES {
            #[allow(clippy::cast_possible_truncation)]
            pd.set(L2Index::new(i as u16), PdEntry::zero());
        }
        for page in (0..KERNEL_IDENTITY_BYTES).step_by(PAGE_SIZE as usize) {
            unsafe { mmu.invalidate_page(VirtualAddress::new(page)) };
        }

        self.state = PagingState::IdentityRetired;
        info!("paging: identity mapping retired");
        Ok(AddressSpace::from_root(self.mapper, self.directory))
    }

    /// Run all four steps.
    ///
    /// # Errors
    /// See the individual steps.
    ///
    /// # Safety
    /// See [`activate_identity`](Self::activate_identity) and
    /// [`retire_identity`](Self::retire_identity).
    pub unsafe fn run<A: FrameAlloc, U: Mmu>(
        &mut self,
        alloc: &mut A,
        mmu: &mut U,
    ) -> Result<AddressSpace<'m, M>, PagingError> {
        self.build_tables(alloc)?;
        unsafe {
            self.activate_identity(mmu)?;
            self.install_linear()?;
            self.retire_identity(mmu)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PageFault;
    use crate::testing::{BumpFrames, MmuOp, RecordingMmu, SimulatedMemory};

    /// 4 MiB of simulated RAM; tables are placed from 2 MiB on.
    const RAM_FRAMES: usize = 1024;

    fn image() -> KernelImage {
        KernelImage {
            start: PhysicalAddress::new(0x10_0000),
            end: PhysicalAddress::new(0x15_8000),
            ro_start: PhysicalAddress::new(0x10_0000),
            ro_end: PhysicalAddress::new(0x13_4800),
        }
    }

    fn table_frames() -> BumpFrames {
        BumpFrames::new(PhysicalAddress::new(0x20_0000), PhysicalAddress::new(0x40_0000))
    }

    fn pte(phys: &SimulatedMemory, boot: &PagingBootstrap<'_, SimulatedMemory>, pfn: u32) -> PtEntry {
        let table = boot.tables()[(pfn as usize) / ENTRIES];
        #[allow(clippy::cast_possible_truncation)]
        phys.pt_mut(table).get(L1Index::new((pfn as usize % ENTRIES) as u16))
    }

    #[test]
    fn read_only_section_is_write_protected() {
        let phys = SimulatedMemory::new(RAM_FRAMES);
        let mut boot = PagingBootstrap::new(&phys, image(), ZoneLayout::I386).unwrap();
        boot.build_tables(&mut table_frames()).unwrap();
        assert_eq!(boot.state(), PagingState::TablesBuilt);
        assert_eq!(boot.tables().len(), 224);

        for pfn in 0..0x200 {
            let e = pte(&phys, &boot, pfn);
            assert!(e.present() && e.global(), "frame {pfn:#x}");
            assert_eq!(e.frame_number(), FrameNumber::new(pfn));
            let inside_ro = (0x100..0x134).contains(&pfn);
            assert_eq!(e.writable(), !inside_ro, "frame {pfn:#x}");
        }
        // The frame shared by .rodata and .data stays writable.
        assert!(pte(&phys, &boot, 0x134).writable());
        // Far away from the kernel: writable.
        assert!(pte(&phys, &boot, 0x3_7FFF).writable());
    }

    #[test]
    fn steps_run_in_order_against_the_mmu() {
        let phys = SimulatedMemory::new(RAM_FRAMES);
        let mut boot = PagingBootstrap::new(&phys, image(), ZoneLayout::I386).unwrap();
        let mut mmu = RecordingMmu::new();
        boot.build_tables(&mut table_frames()).unwrap();
        assert!(mmu.ops().is_empty());

        unsafe { boot.activate_identity(&mut mmu) }.unwrap();
        let dir = boot.directory();
        assert_eq!(mmu.ops(), &[MmuOp::LoadPageDirectory(dir.base()), MmuOp::EnablePaging]);
        let aspace = AddressSpace::from_root(&phys, dir);
        // Low and high alias point at the same tables.
        assert_eq!(aspace.pde(L2Index::new(0)), aspace.pde(L2Index::new(768)));
        assert_eq!(aspace.pde(L2Index::new(1)), aspace.pde(L2Index::new(769)));
        assert!(!aspace.pde(L2Index::new(770)).is_present());
        assert_eq!(
            aspace.resolve(VirtualAddress::new(0x0010_0010)),
            Ok(PhysicalAddress::new(0x0010_0010))
        );

        boot.install_linear().unwrap();
        assert!(aspace.pde(L2Index::new(770)).is_present());
        assert!(aspace.pde(L2Index::new(991)).is_present());
        assert!(!aspace.pde(L2Index::new(992)).is_present());
        // Nothing new was linked at the identity side.
        assert!(!aspace.pde(L2Index::new(2)).is_present());

        let kernel = unsafe { boot.retire_identity(&mut mmu) }.unwrap();
        assert_eq!(boot.state(), PagingState::IdentityRetired);
        assert!(!kernel.pde(L2Index::new(0)).is_present());
        assert!(!kernel.pde(L2Index::new(1)).is_present());

        let invalidated: Vec<_> = mmu.invalidated_pages().collect();
        assert_eq!(invalidated.len(), 2048);
        assert_eq!(invalidated[0], VirtualAddress::new(0));
        assert_eq!(invalidated[2047], VirtualAddress::new(0x7F_F000));
        // Paging was enabled before anything was invalidated.
        assert_eq!(mmu.ops()[1], MmuOp::EnablePaging);
    }

    #[test]
    fn linear_mapping_round_trips() {
        let phys = SimulatedMemory::new(RAM_FRAMES);
        let mut boot = PagingBootstrap::new(&phys, image(), ZoneLayout::I386).unwrap();
        let mut mmu = RecordingMmu::new();
        let kernel = unsafe { boot.run(&mut table_frames(), &mut mmu) }.unwrap();

        for p in [0u32, 0xB_8000, 0x10_0123, 0x7F_FFFF, 0x80_0000, 0x0100_0FFF, LOWMEM_END - 1] {
            let va = VirtualAddress::new(p + PAGE_OFFSET);
            assert_eq!(kernel.resolve(va), Ok(PhysicalAddress::new(p)), "{va}");
        }

        let low = VirtualAddress::new(0x0010_0000);
        assert_eq!(kernel.resolve(low), Err(PageFault::DirectoryNotPresent { va: low }));
        let above = VirtualAddress::new(PAGE_OFFSET + LOWMEM_END);
        assert_eq!(kernel.resolve(above), Err(PageFault::DirectoryNotPresent { va: above }));
    }

    #[test]
    fn out_of_order_steps_are_rejected() {
        let phys = SimulatedMemory::new(RAM_FRAMES);
        let mut boot = PagingBootstrap::new(&phys, image(), ZoneLayout::I386).unwrap();
        let mut mmu = RecordingMmu::new();

        assert_eq!(
            boot.install_linear(),
            Err(PagingError::OutOfOrder {
                expected: PagingState::IdentityActive,
                actual: PagingState::Unpaged
            })
        );
        assert!(unsafe { boot.activate_identity(&mut mmu) }.is_err());
        assert!(mmu.ops().is_empty());

        boot.build_tables(&mut table_frames()).unwrap();
        assert!(boot.build_tables(&mut table_frames()).is_err());
        assert!(unsafe { boot.retire_identity(&mut mmu) }.is_err());
        assert_eq!(boot.state(), PagingState::TablesBuilt);
    }

    #[test]
    fn running_out_of_table_frames_is_reported() {
        let phys = SimulatedMemory::new(RAM_FRAMES);
        let mut boot = PagingBootstrap::new(&phys, image(), ZoneLayout::I386).unwrap();
        let mut few = BumpFrames::new(PhysicalAddress::new(0x20_0000), PhysicalAddress::new(0x20_4000));
        assert_eq!(
            boot.build_tables(&mut few),
            Err(PagingError::TableAllocation { allocated: 3 })
        );
        assert_eq!(boot.state(), PagingState::Unpaged);
    }

    #[test]
    fn smaller_layouts_need_fewer_tables() {
        let phys = SimulatedMemory::new(RAM_FRAMES);
        let layout = ZoneLayout {
            dma_end: 16 << 20,
            normal_end: 80 << 20,
        };
        let mut boot = PagingBootstrap::new(&phys, image(), layout).unwrap();
        boot.build_tables(&mut table_frames()).unwrap();
        assert_eq!(boot.tables().len(), 20);

        let odd = ZoneLayout {
            dma_end: 16 << 20,
            normal_end: (80 << 20) + 4096,
        };
        assert!(matches!(
            PagingBootstrap::new(&phys, image(), odd),
            Err(PagingError::UnmappableLayout { .. })
        ));
    }
}
