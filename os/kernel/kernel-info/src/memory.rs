//! # Memory Layout
//!
//! Compile-time layout of the i386 kernel: where it is loaded, where it runs,
//! how physical memory is split into zones, and the linear mapping between the
//! two address spaces.

use core::ops::Range;
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};

/// Size of a small page / physical frame.
pub const PAGE_SIZE: u32 = 4096;

/// Start of kernel-virtual space. Physical address `p` below [`LOWMEM_END`]
/// is permanently reachable at `p + PAGE_OFFSET`.
pub const PAGE_OFFSET: u32 = 0xC000_0000;

/// Where the kernel image is placed in *physical* memory (LMA).
///
/// # Kernel Build
/// The linker script places `.text` here.
pub const PHYS_LOAD: u32 = 0x0010_0000; // 1 MiB

/// Where the kernel executes (VMA).
pub const KERNEL_BASE: u32 = PAGE_OFFSET + PHYS_LOAD;

/// Low physical memory covered by the temporary identity mapping while paging
/// is switched on. Two page tables.
pub const KERNEL_IDENTITY_BYTES: u32 = 8 * 1024 * 1024;

/// End of the DMA zone.
pub const DMA_ZONE_END: u32 = 16 * 1024 * 1024;

/// End of the NORMAL zone and of the permanently mapped low memory.
pub const LOWMEM_END: u32 = 896 * 1024 * 1024;

const _: () = {
    assert!(PAGE_OFFSET.is_multiple_of(4 * 1024 * 1024));
    assert!(KERNEL_IDENTITY_BYTES.is_multiple_of(4 * 1024 * 1024));
    assert!(PHYS_LOAD < KERNEL_IDENTITY_BYTES);
    assert!(KERNEL_IDENTITY_BYTES <= DMA_ZONE_END);
    assert!(DMA_ZONE_END < LOWMEM_END);
    // The linear map of low memory must fit above PAGE_OFFSET.
    assert!(LOWMEM_END <= u32::MAX - PAGE_OFFSET + 1);
};

/// Physical memory zones.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Zone {
    /// `[0, 16 MiB)`: low, permanently mapped, scarce.
    Dma,
    /// `[16 MiB, 896 MiB)`: default target of kernel allocations.
    Normal,
    /// `[896 MiB, 4 GiB)`: not permanently mapped.
    HighMem,
}

impl Zone {
    /// Zone of `pa` in the production layout.
    #[must_use]
    pub const fn of(pa: PhysicalAddress) -> Self {
        ZoneLayout::I386.zone_of(pa)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dma => "DMA",
            Self::Normal => "NORMAL",
            Self::HighMem => "HIGHMEM",
        }
    }
}

impl core::fmt::Display for Zone {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Zone boundaries, in bytes.
///
/// Production code always uses [`ZoneLayout::I386`]; the allocators accept a
/// layout so they can be exercised over a small synthetic machine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ZoneLayout {
    /// Exclusive end of [`Zone::Dma`], start of [`Zone::Normal`].
    pub dma_end: u32,
    /// Exclusive end of [`Zone::Normal`], start of [`Zone::HighMem`].
    pub normal_end: u32,
}

impl ZoneLayout {
    pub const I386: Self = Self {
        dma_end: DMA_ZONE_END,
        normal_end: LOWMEM_END,
    };

    /// Zone containing `pa`. Total: every address has exactly one zone.
    #[must_use]
    pub const fn zone_of(self, pa: PhysicalAddress) -> Zone {
        let a = pa.as_u32();
        if a < self.dma_end {
            Zone::Dma
        } else if a < self.normal_end {
            Zone::Normal
        } else {
            Zone::HighMem
        }
    }

    /// Frames `[first, end)` that belong to `zone`.
    #[must_use]
    pub const fn frames(self, zone: Zone) -> Range<FrameNumber> {
        let (start, end) = match zone {
            Zone::Dma => (0, self.dma_end >> 12),
            Zone::Normal => (self.dma_end >> 12, self.normal_end >> 12),
            Zone::HighMem => (self.normal_end >> 12, 0x10_0000),
        };
        FrameNumber::new(start)..FrameNumber::new(end)
    }

    /// First frame of `zone`.
    #[must_use]
    pub const fn first_frame(self, zone: Zone) -> FrameNumber {
        self.frames(zone).start
    }

    /// Frames `[0, normal_end)`, i.e. everything bootmem manages.
    #[must_use]
    pub const fn lowmem_frames(self) -> Range<FrameNumber> {
        FrameNumber::new(0)..FrameNumber::new(self.normal_end >> 12)
    }
}

/// Conversion across the linear mapping failed.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LinearMapError {
    #[error("physical address {0} lies above the linear mapping")]
    NotLowMemory(PhysicalAddress),
    #[error("virtual address {0} is not inside the linear mapping")]
    NotLinear(VirtualAddress),
}

/// `p + PAGE_OFFSET` for `p < LOWMEM_END`.
///
/// # Errors
/// [`LinearMapError::NotLowMemory`] for addresses that are not permanently mapped.
#[inline]
pub const fn phys_to_virt(pa: PhysicalAddress) -> Result<VirtualAddress, LinearMapError> {
    if pa.as_u32() < LOWMEM_END {
        Ok(VirtualAddress::new(pa.as_u32() + PAGE_OFFSET))
    } else {
        Err(LinearMapError::NotLowMemory(pa))
    }
}

/// `v - PAGE_OFFSET` for `v` inside `[PAGE_OFFSET, PAGE_OFFSET + LOWMEM_END)`.
///
/// # Errors
/// [`LinearMapError::NotLinear`] for anything else.
#[inline]
pub const fn virt_to_phys(va: VirtualAddress) -> Result<PhysicalAddress, LinearMapError> {
    let v = va.as_u32();
    if v >= PAGE_OFFSET && v - PAGE_OFFSET < LOWMEM_END {
        Ok(PhysicalAddress::new(v - PAGE_OFFSET))
    } else {
        Err(LinearMapError::NotLinear(va))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_runs_one_mib_into_kernel_space() {
        assert_eq!(KERNEL_BASE, 0xC010_0000);
        assert_eq!(PAGE_OFFSET >> 22, 768);
    }

    #[test]
    fn every_address_has_one_zone() {
        let l = ZoneLayout::I386;
        assert_eq!(l.zone_of(PhysicalAddress::new(0)), Zone::Dma);
        assert_eq!(l.zone_of(PhysicalAddress::new(DMA_ZONE_END - 1)), Zone::Dma);
        assert_eq!(l.zone_of(PhysicalAddress::new(DMA_ZONE_END)), Zone::Normal);
        assert_eq!(l.zone_of(PhysicalAddress::new(LOWMEM_END - 1)), Zone::Normal);
        assert_eq!(l.zone_of(PhysicalAddress::new(LOWMEM_END)), Zone::HighMem);
        assert_eq!(Zone::of(PhysicalAddress::new(u32::MAX)), Zone::HighMem);
    }

    #[test]
    fn zone_frames_are_adjacent() {
        let l = ZoneLayout::I386;
        assert_eq!(l.frames(Zone::Dma).end, l.frames(Zone::Normal).start);
        assert_eq!(l.frames(Zone::Normal).end, l.frames(Zone::HighMem).start);
        assert_eq!(l.first_frame(Zone::Normal), FrameNumber::new(4096));
        assert_eq!(l.lowmem_frames().end, FrameNumber::new(896 * 256));
    }

    #[test]
    fn linear_map_is_checked() {
        let pa = PhysicalAddress::new(0x0123_4567);
        let va = phys_to_virt(pa).unwrap();
        assert_eq!(va.as_u32(), 0xC123_4567);
        assert_eq!(virt_to_phys(va), Ok(pa));

        let high = PhysicalAddress::new(LOWMEM_END);
        assert_eq!(phys_to_virt(high), Err(LinearMapError::NotLowMemory(high)));

        let low = VirtualAddress::new(0x0010_0000);
        assert_eq!(virt_to_phys(low), Err(LinearMapError::NotLinear(low)));
        let top = VirtualAddress::new(0xF800_0000);
        assert_eq!(virt_to_phys(top), Err(LinearMapError::NotLinear(top)));
    }
}
