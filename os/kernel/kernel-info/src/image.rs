//! # Kernel Image
//!
//! Physical bounds of the loaded kernel and of its read-only part, as
//! reported by the linker.

use crate::memory::{LinearMapError, virt_to_phys};
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, Size4K, VirtualAddress};

/// Where the kernel image sits in physical memory.
///
/// `ro_start..ro_end` covers `.text` and `.rodata`; everything else of the
/// image (`.data`, `.bss`, boot stack) is writable.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct KernelImage {
    pub start: PhysicalAddress,
    pub end: PhysicalAddress,
    pub ro_start: PhysicalAddress,
    pub ro_end: PhysicalAddress,
}

impl KernelImage {
    /// Build from the linker's kernel-virtual section symbols.
    ///
    /// # Errors
    /// [`LinearMapError`] if a symbol lies outside the linear mapping.
    pub fn from_linker_symbols(
        start: VirtualAddress,
        end: VirtualAddress,
        ro_start: VirtualAddress,
        ro_end: VirtualAddress,
    ) -> Result<Self, LinearMapError> {
        Ok(Self {
            start: virt_to_phys(start)?,
            end: virt_to_phys(end)?,
            ro_start: virt_to_phys(ro_start)?,
            ro_end: virt_to_phys(ro_end)?,
        })
    }

    /// Whether the frame `pfn` must be mapped read-only.
    ///
    /// Only frames lying entirely inside the read-only section qualify; a frame
    /// shared between the last code page and the first data bytes stays
    /// writable.
    #[must_use]
    pub fn is_read_only(&self, pfn: FrameNumber) -> bool {
        let first = self.ro_start.frame_number_up();
        let end = self.ro_end.frame_number_down();
        first <= pfn && pfn < end
    }

    /// First frame past the image.
    #[must_use]
    pub const fn end_frame(&self) -> FrameNumber {
        self.end.frame_number_up()
    }

    /// Image size in bytes.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.end.as_u32() - self.start.as_u32()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Page-aligned physical end, where the first allocation after the image
    /// may go.
    #[must_use]
    pub fn end_aligned(&self) -> PhysicalAddress {
        self.end.align_up::<Size4K>().unwrap_or(self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> KernelImage {
        KernelImage {
            start: PhysicalAddress::new(0x10_0000),
            end: PhysicalAddress::new(0x13_8123),
            ro_start: PhysicalAddress::new(0x10_0000),
            ro_end: PhysicalAddress::new(0x12_4800),
        }
    }

    #[test]
    fn partially_read_only_frames_stay_writable() {
        let img = image();
        assert!(!img.is_read_only(FrameNumber::new(0xFF)));
        assert!(img.is_read_only(FrameNumber::new(0x100)));
        assert!(img.is_read_only(FrameNumber::new(0x123)));
        // 0x124000..0x125000 holds the end of .rodata and the start of .data.
        assert!(!img.is_read_only(FrameNumber::new(0x124)));
        assert!(!img.is_read_only(FrameNumber::new(0x130)));
    }

    #[test]
    fn image_from_linker_symbols() {
        let img = KernelImage::from_linker_symbols(
            VirtualAddress::new(0xC010_0000),
            VirtualAddress::new(0xC013_8123),
            VirtualAddress::new(0xC010_0000),
            VirtualAddress::new(0xC012_4800),
        )
        .unwrap();
        assert_eq!(img, image());
        assert_eq!(img.end_frame(), FrameNumber::new(0x139));
        assert_eq!(img.end_aligned(), PhysicalAddress::new(0x13_9000));
    }

    #[test]
    fn low_symbols_are_rejected() {
        let va = VirtualAddress::new(0x10_0000);
        assert!(KernelImage::from_linker_symbols(va, va, va, va).is_err());
    }
}
