//! # i386 Page Table (PT)
//!
//! The lower paging level: 1024 entries, each mapping one 4 KiB frame.
//!
//! - [`L1Index`]: index type for virtual-address bits `[21:12]`.
//! - [`PtEntry`]: a page-table entry (PTE), always a leaf.
//! - [`PageTable`]: a 4 KiB-aligned array of 1024 PTEs.
//!
//! After modifying active mappings, the caller must perform any required TLB
//! maintenance.

use bitfield_struct::bitfield;
use kernel_memory_addresses::{FrameNumber, PhysicalPage, Size4K, VirtualAddress};

/// Entries per table (and per directory).
pub const ENTRIES: usize = 1024;

/// Index into a Page Table (derived from VA bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct L1Index(u16);

impl L1Index {
    /// Extract bits `[21:12]` of `va`.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from(va: VirtualAddress) -> Self {
        Self::new(va.table_index() as u16)
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
}

/// A single Page Table entry (PTE).
///
/// The layout is the hardware's; fields are listed from bit 0 upwards.
#[doc(alias = "PTE")]
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PtEntry {
    /// Bit 0 — the frame is mapped.
    pub present: bool,
    /// Bit 1 — writes allowed (ring 0 too, once CR0.WP is set).
    pub writable: bool,
    /// Bit 2 — accessible from ring 3.
    pub user: bool,
    /// Bit 3 — write-through caching.
    pub write_through: bool,
    /// Bit 4 — caching disabled.
    pub cache_disabled: bool,
    /// Bit 5 — set by the CPU on access.
    pub accessed: bool,
    /// Bit 6 — set by the CPU on write.
    pub dirty: bool,
    /// Bit 7 — PAT index bit (the page-size position of a directory entry).
    pub pat: bool,
    /// Bit 8 — survives CR3 reloads when CR4.PGE is set.
    pub global: bool,
    /// Bits 9–11 — free for the OS.
    #[bits(3)]
    pub available: u8,
    /// Bits 12–31 — frame number.
    #[bits(20)]
    frame: u32,
}

impl PtEntry {
    /// A zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new()
    }

    /// A present, global, supervisor-only kernel mapping of `pfn`.
    #[inline]
    #[must_use]
    pub const fn kernel(pfn: FrameNumber, writable: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(writable)
            .with_global(true)
            .with_frame(pfn.as_u32())
    }

    /// The mapped frame number (never a byte address).
    #[inline]
    #[must_use]
    pub const fn frame_number(self) -> FrameNumber {
        FrameNumber::new(self.frame())
    }

    #[inline]
    #[must_use]
    pub const fn with_frame_number(self, pfn: FrameNumber) -> Self {
        self.with_frame(pfn.as_u32())
    }

    /// If present, the mapped 4 KiB page.
    #[inline]
    #[must_use]
    pub const fn page_4k(self) -> Option<PhysicalPage<Size4K>> {
        if !self.present() {
            return None;
        }
        Some(PhysicalPage::containing_address(self.frame_number().base()))
    }
}

/// The Page Table: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PtEntry; ENTRIES],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTable {
    /// Create a fully zeroed Page Table (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PtEntry::zero(); ENTRIES],
        }
    }

    /// Clear every entry in place.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PtEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: L1Index) -> PtEntry {
        self.entries[i.as_usize()]
    }

    /// Write the entry at `i`.
    ///
    /// Caller must handle any required TLB invalidation when changing active mappings.
    #[inline]
    pub const fn set(&mut self, i: L1Index, e: PtEntry) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    pub const fn entry_mut(&mut self, i: L1Index) -> &mut PtEntry {
        &mut self.entries[i.as_usize()]
    }

    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> L1Index {
        L1Index::from(va)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_positions_are_hardware_exact() {
        let e = PtEntry::kernel(FrameNumber::new(0x12345), true);
        assert_eq!(e.into_bits(), 0x1234_5103);
        let ro = PtEntry::kernel(FrameNumber::new(1), false);
        assert_eq!(ro.into_bits(), 0x0000_1101);
        assert!(PtEntry::from_bits(1 << 6).dirty());
        assert!(PtEntry::from_bits(1 << 2).user());
    }

    #[test]
    fn frame_is_a_number_not_an_address() {
        let e = PtEntry::zero().with_frame_number(FrameNumber::new(0xC0));
        assert_eq!(e.frame_number(), FrameNumber::new(0xC0));
        assert_eq!(e.into_bits() >> 12, 0xC0);
        assert!(e.page_4k().is_none());
        let page = e.with_present(true).page_4k().unwrap();
        assert_eq!(page.base().as_u32(), 0xC_0000);
    }

    #[test]
    fn index_uses_bits_21_to_12() {
        let va = VirtualAddress::new(0xC03F_F123);
        assert_eq!(L1Index::from(va).as_usize(), 0x3FF);
    }
}
