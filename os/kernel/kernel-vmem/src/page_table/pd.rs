//! # i386 Page Directory (PD)
//!
//! The upper paging level: 1024 entries, each covering 4 MiB of virtual space.
//!
//! - [`L2Index`]: index type for virtual-address bits `[31:22]`.
//! - [`PdEntry`]: a directory entry that is either a pointer to a page table
//!   (`PS=0`, viewed as [`Pde`]) or a 4 MiB leaf (`PS=1`, viewed as [`Pde4M`]).
//! - [`PdEntryKind`]: decoded view of a present entry.
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 entries.

use crate::page_table::pt::ENTRIES;
use bitfield_struct::bitfield;
use kernel_memory_addresses::{
    FrameNumber, PhysicalAddress, PhysicalPage, Size4K, Size4M, VirtualAddress,
};

/// Index into the Page Directory (derived from VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct L2Index(u16);

impl L2Index {
    /// Extract bits `[31:22]` of `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(va.directory_index() as u16)
    }

    /// Construct from a raw value; asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < ENTRIES);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// First virtual address covered by this slot.
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new((self.0 as u32) << 22)
    }
}

/// PDE pointing to a page table (`PS = 0`).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Pde {
    /// Present (bit 0).
    pub present: bool,
    /// Writable (bit 1); ANDed with the PTE's bit.
    pub writable: bool,
    /// User (bit 2).
    pub user: bool,
    /// Write-Through (bit 3).
    pub write_through: bool,
    /// Cache Disable (bit 4).
    pub cache_disabled: bool,
    /// Accessed (bit 5).
    pub accessed: bool,
    /// Bit 6: ignored in non-leaf.
    #[bits(1)]
    __d_ignored: u8,
    /// Page size (bit 7): **0** here.
    pub page_size: bool,
    /// Bit 8: global is ignored in non-leaf.
    #[bits(1)]
    __g_ignored: u8,
    /// OS-available (bits 9..11).
    #[bits(3)]
    pub available: u8,
    /// Page table frame number (bits 12..31).
    #[bits(20)]
    table_frame: u32,
}

impl Pde {
    /// Supervisor read/write link to the table in `page`.
    #[inline]
    #[must_use]
    pub const fn kernel_table(page: PhysicalPage<Size4K>) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_table_frame(page.base().as_u32() >> 12)
    }

    /// Page table base.
    #[inline]
    #[must_use]
    pub const fn table(self) -> PhysicalPage<Size4K> {
        PhysicalPage::containing_address(PhysicalAddress::new(self.table_frame() << 12))
    }
}

/// PDE mapping a 4 MiB page directly (`PS = 1`, requires CR4.PSE).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct Pde4M {
    pub present: bool,
    pub writable: bool,
    pub user: bool,
    pub write_through: bool,
    pub cache_disabled: bool,
    pub accessed: bool,
    pub dirty: bool,
    /// Page size (bit 7): **1** here.
    pub page_size: bool,
    pub global: bool,
    #[bits(3)]
    pub available: u8,
    /// PAT index bit (bit 12).
    pub pat: bool,
    /// Bits 13..21: physical address bits above 4 GiB with PSE-36; zero here.
    #[bits(9)]
    __reserved: u16,
    /// 4 MiB frame number (bits 22..31).
    #[bits(10)]
    frame_4m: u16,
}

impl Pde4M {
    #[inline]
    #[must_use]
    pub const fn page(self) -> PhysicalPage<Size4M> {
        PhysicalPage::containing_address(PhysicalAddress::new((self.frame_4m() as u32) << 22))
    }

    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn kernel_large(page: PhysicalPage<Size4M>, writable: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(writable)
            .with_page_size(true)
            .with_global(true)
            .with_frame_4m((page.base().as_u32() >> 22) as u16)
    }
}

/// Decoded view of a present directory entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PdEntryKind {
    /// `PS=0`: the next-level page table.
    NextPageTable(PhysicalPage<Size4K>, Pde),
    /// `PS=1`: a 4 MiB leaf.
    Leaf4MiB(PhysicalPage<Size4M>, Pde4M),
}

/// Raw 32-bit directory entry; use [`PdEntry::kind`] for typed access.
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq)]
pub struct PdEntry(u32);

impl PdEntry {
    /// Bit 0.
    const PRESENT: u32 = 1 << 0;
    /// Bit 7.
    const PAGE_SIZE: u32 = 1 << 7;

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0 & Self::PRESENT != 0
    }

    #[inline]
    #[must_use]
    pub const fn is_large(self) -> bool {
        self.0 & Self::PAGE_SIZE != 0
    }

    /// Typed view, or `None` if not present.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> Option<PdEntryKind> {
        if !self.is_present() {
            return None;
        }
        if self.is_large() {
            let leaf = Pde4M::from_bits(self.0);
            Some(PdEntryKind::Leaf4MiB(leaf.page(), leaf))
        } else {
            let pde = Pde::from_bits(self.0);
            Some(PdEntryKind::NextPageTable(pde.table(), pde))
        }
    }

    /// Link to a page table.
    #[inline]
    #[must_use]
    pub const fn make_table(pde: Pde) -> Self {
        Self(pde.with_page_size(false).into_bits())
    }

    /// 4 MiB leaf.
    #[inline]
    #[must_use]
    pub const fn make_4m(leaf: Pde4M) -> Self {
        Self(leaf.with_page_size(true).into_bits())
    }

    /// Frame number held in bits 12..31 (for a 4 MiB leaf this includes the
    /// PAT and reserved bits).
    #[inline]
    #[must_use]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.0 >> 12)
    }

    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn from_raw(v: u32) -> Self {
        Self(v)
    }
}

impl core::fmt::Debug for PdEntry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PdEntry({:#010x})", self.0)
    }
}

/// The Page Directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES],
}

const _: () = assert!(size_of::<PageDirectory>() == 4096);

impl PageDirectory {
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES],
        }
    }

    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: L2Index) -> PdEntry {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: L2Index, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> L2Index {
        L2Index::from(va)
    }
}
