//! # Address Space (i386, directory-rooted)
//!
//! A handle on one two-level page-table tree and the walks over it.
//!
//! ## Highlights
//!
//! - [`AddressSpace::resolve`] translates a virtual address, honouring 4 MiB
//!   directory leaves.
//! - [`AddressSpace::entry_mut`] hands out the PTE behind a virtual address
//!   for inspection or modification.
//! - [`AddressSpace::pde`] / [`AddressSpace::set_pde`] operate on directory slots.
//!
//! ## Safety
//!
//! - Mutating active mappings requires TLB maintenance through the [`Mmu`].
//! - The provided `PhysMapper` must yield **writable** references to table frames.

use crate::page_table::pd::{L2Index, PageDirectory, PdEntry, PdEntryKind};
use crate::page_table::pt::{PageTable, PtEntry};
use crate::{Mmu, PhysMapper};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, Size4K, Size4M, VirtualAddress};

/// Translation failed; the CPU would raise #PF for this access.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PageFault {
    #[error("page fault at {va}: directory entry not present")]
    DirectoryNotPresent { va: VirtualAddress },
    #[error("page fault at {va}: table entry not present")]
    TableNotPresent { va: VirtualAddress },
    /// `entry_mut` on an address mapped by a 4 MiB directory leaf.
    #[error("{va} is mapped by a 4 MiB page and has no table entry")]
    LargePage { va: VirtualAddress },
}

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage<Size4K>, // page directory frame
    mapper: &'m M,
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// View the address space the MMU currently walks.
    #[inline]
    pub fn from_current<U: Mmu>(mapper: &'m M, mmu: &U) -> Self {
        Self::from_root(mapper, mmu.page_directory())
    }

    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage<Size4K>) -> Self {
        Self { root, mapper }
    }

    /// Load this space's directory into the MMU.
    ///
    /// # Safety
    /// See [`Mmu::load_page_directory`].
    #[inline]
    pub unsafe fn activate<U: Mmu>(&self, mmu: &mut U) {
        unsafe { mmu.load_page_directory(self.root) }
    }

    /// Physical page of the page directory.
    #[inline]
    pub const fn root_page(&self) -> PhysicalPage<Size4K> {
        self.root
    }

    #[inline]
    pub(crate) fn pd_mut(&self) -> &mut PageDirectory {
        self.mapper.pd_mut(self.root)
    }

    #[inline]
    pub(crate) fn pt_mut(&self, page: PhysicalPage<Size4K>) -> &mut PageTable {
        self.mapper.pt_mut(page)
    }

    #[inline]
    #[must_use]
    pub fn pde(&self, i: L2Index) -> PdEntry {
        self.pd_mut().get(i)
    }

    /// Caller must handle any required TLB invalidation.
    #[inline]
    pub fn set_pde(&self, i: L2Index, e: PdEntry) {
        self.pd_mut().set(i, e);
    }

    /// Translate `va` by walking directory and table.
    ///
    /// Returns `(pte.frame << 12) | (va & 0xFFF)`, or the offset within the
    /// 4 MiB page for large directory leaves.
    ///
    /// # Errors
    /// A [`PageFault`] naming the level at which the walk stopped.
    pub fn resolve(&self, va: VirtualAddress) -> Result<PhysicalAddress, PageFault> {
        let (i2, i1) = crate::page_table::split_indices(va);
        match self.pde(i2).kind() {
            None => Err(PageFault::DirectoryNotPresent { va }),
            Some(PdEntryKind::Leaf4MiB(page, _)) => Ok(page.join(va.offset::<Size4M>())),
            Some(PdEntryKind::NextPageTable(pt_page, _)) => {
                let page = self
                    .pt_mut(pt_page)
                    .get(i1)
                    .page_4k()
                    .ok_or(PageFault::TableNotPresent { va })?;
                Ok(page.join(va.offset::<Size4K>()))
            }
        }
    }

    /// The PTE that maps `va`, present or not.
    ///
    /// # Errors
    /// [`PageFault::DirectoryNotPresent`] if there is no table to hold the entry,
    /// [`PageFault::LargePage`] if `va` is covered by a 4 MiB leaf.
    #[allow(clippy::mut_from_ref)]
    pub fn entry_mut(&self, va: VirtualAddress) -> Result<&mut PtEntry, PageFault> {
        let (i2, i1) = crate::page_table::split_indices(va);
        match self.pde(i2).kind() {
            None => Err(PageFault::DirectoryNotPresent { va }),
            Some(PdEntryKind::Leaf4MiB(..)) => Err(PageFault::LargePage { va }),
            Some(PdEntryKind::NextPageTable(pt_page, _)) => Ok(self.pt_mut(pt_page).entry_mut(i1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_table::pd::{Pde, Pde4M};
    use crate::page_table::pt::L1Index;
    use crate::testing::{BumpFrames, MmuOp, RecordingMmu, SimulatedMemory};
    use crate::FrameAlloc;
    use kernel_memory_addresses::FrameNumber;

    fn space_with_one_table(phys: &SimulatedMemory) -> (AddressSpace<'_, SimulatedMemory>, PhysicalPage<Size4K>) {
        let mut frames = BumpFrames::new(PhysicalAddress::new(0x1000), PhysicalAddress::new(0x10_000));
        let root = frames.alloc_4k().unwrap();
        let table = frames.alloc_4k().unwrap();
        phys.pd_mut(root).zero();
        phys.pt_mut(table).zero();
        let aspace = AddressSpace::from_root(phys, root);
        aspace.set_pde(L2Index::new(768), PdEntry::make_table(Pde::kernel_table(table)));
        (aspace, table)
    }

    #[test]
    fn resolve_walks_both_levels() {
        let phys = SimulatedMemory::new(16);
        let (aspace, table) = space_with_one_table(&phys);
        phys.pt_mut(table).set(L1Index::new(5), PtEntry::kernel(FrameNumber::new(0x4321), true));

        let pa = aspace.resolve(VirtualAddress::new(0xC000_5ABC)).unwrap();
        assert_eq!(pa, PhysicalAddress::new(0x0432_1ABC));
    }

    #[test]
    fn missing_levels_fault() {
        let phys = SimulatedMemory::new(16);
        let (aspace, _) = space_with_one_table(&phys);

        let va = VirtualAddress::new(0x0000_1000);
        assert_eq!(aspace.resolve(va), Err(PageFault::DirectoryNotPresent { va }));
        let va = VirtualAddress::new(0xC000_6000);
        assert_eq!(aspace.resolve(va), Err(PageFault::TableNotPresent { va }));
    }

    #[test]
    fn resolve_honours_large_pages() {
        let phys = SimulatedMemory::new(16);
        let (aspace, _) = space_with_one_table(&phys);
        let page = PhysicalPage::containing_address(PhysicalAddress::new(0x0100_0000));
        aspace.set_pde(L2Index::new(800), PdEntry::make_4m(Pde4M::kernel_large(page, true)));

        let va = VirtualAddress::new(0xC812_3456);
        assert_eq!(aspace.resolve(va), Ok(PhysicalAddress::new(0x0112_3456)));
        assert_eq!(aspace.entry_mut(va), Err(PageFault::LargePage { va }));
    }

    #[test]
    fn entry_mut_modifies_the_mapping() {
        let phys = SimulatedMemory::new(16);
        let (aspace, _) = space_with_one_table(&phys);
        let va = VirtualAddress::new(0xC000_7000);

        let pte = aspace.entry_mut(va).unwrap();
        assert!(!pte.present());
        *pte = PtEntry::kernel(FrameNumber::new(0x77), false);

        assert_eq!(aspace.resolve(va), Ok(PhysicalAddress::new(0x7_7000)));
        assert!(!aspace.entry_mut(va).unwrap().writable());
    }

    #[test]
    fn from_current_follows_the_mmu() {
        let phys = SimulatedMemory::new(16);
        let (aspace, _) = space_with_one_table(&phys);
        let mut mmu = RecordingMmu::new();
        unsafe { aspace.activate(&mut mmu) };
        assert_eq!(mmu.ops(), &[MmuOp::LoadPageDirectory(aspace.root_page().base())]);

        let current = AddressSpace::from_current(&phys, &mmu);
        assert_eq!(current.root_page(), aspace.root_page());
    }
}
