//! # Frame Table
//!
//! The permanent, whole-machine record of physical frames. It has two parts:
//!
//! - a **presence bitmap**, one bit per frame in 32-bit words (bit set =
//!   frame in use), manipulated through [`FrameTable::flag_used`],
//!   [`FrameTable::flag_free`] and [`FrameTable::test`];
//! - one [`FrameDescriptor`] per frame with its reference count, state flags
//!   and mapped virtual address.
//!
//! Both arrays are carved out of the placement allocator once, sized from
//! the highest address in the boot memory map. Every descriptor starts out
//! `reserved`; the boot allocator's [`free_all`](crate::bootmem::BootMem::free_all)
//! clears the flag for the frames it releases.

use crate::placement::PlacementAlloc;
use bitfield_struct::bitfield;
use kernel_info::boot::MemoryMap;
use kernel_info::memory::{PAGE_SIZE, ZoneLayout};
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;
use log::{debug, info};

/// Frames addressable with 32-bit physical addresses.
const MAX_FRAMES: u64 = 1 << 20;

/// State bits of a [`FrameDescriptor`].
#[bitfield(u16)]
#[derive(PartialEq, Eq)]
pub struct FrameFlags {
    /// Pinned for I/O.
    pub locked: bool,
    /// I/O on the frame failed.
    pub error: bool,
    pub referenced: bool,
    /// Contents match the backing store.
    pub uptodate: bool,
    pub dirty: bool,
    /// On the active list.
    pub active: bool,
    /// Never handed out by any allocator: kernel, firmware, holes.
    pub reserved: bool,
    /// Above the permanent linear mapping.
    pub high_memory: bool,
    #[bits(8)]
    __: u8,
}

/// Per-frame bookkeeping.
///
/// Every field is a plain integer so that any bit pattern found in freshly
/// placed memory is a valid value.
#[repr(C)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameDescriptor {
    /// Reference count.
    pub count: u32,
    pub flags: FrameFlags,
    _pad: u16,
    /// Kernel-virtual address the frame is mapped at, `0` if none.
    virtual_address: u32,
}

impl FrameDescriptor {
    const fn new(flags: FrameFlags) -> Self {
        Self {
            count: 0,
            flags,
            _pad: 0,
            virtual_address: 0,
        }
    }

    #[must_use]
    pub const fn virtual_address(&self) -> Option<VirtualAddress> {
        match self.virtual_address {
            0 => None,
            v => Some(VirtualAddress::new(v)),
        }
    }

    pub const fn set_virtual_address(&mut self, va: Option<VirtualAddress>) {
        self.virtual_address = match va {
            Some(va) => va.as_u32(),
            None => 0,
        };
    }
}

/// The machine's frame table.
pub struct FrameTable<'a> {
    bitmap: &'a mut [u32],
    descriptors: &'a mut [FrameDescriptor],
    frames: u32,
    storage: (PhysicalAddress, PhysicalAddress),
}

impl<'a> FrameTable<'a> {
    /// Size the table from `map`, place it, and mark the frames that are
    /// already taken.
    ///
    /// Marked used: every frame up to the end of the table's own storage
    /// (firmware area, kernel image, everything placed before), and every
    /// frame touched by a region that is not available RAM.
    ///
    /// # Safety
    /// Memory handed out by `placement` must be RAM reachable through
    /// `mapper` and not referenced by anything else.
    pub unsafe fn build<M: PhysMapper>(
        map: &MemoryMap<'_>,
        layout: ZoneLayout,
        placement: &mut PlacementAlloc,
        mapper: &'a M,
    ) -> Self {
        let highest = map.highest_address();
        #[allow(clippy::cast_possible_truncation)]
        let frames = highest.div_ceil(u64::from(PAGE_SIZE)).min(MAX_FRAMES) as u32;
        let words = frames.div_ceil(32);
        #[allow(clippy::cast_possible_truncation)]
        let descriptor_bytes = (frames as usize * size_of::<FrameDescriptor>()) as u32;

        let (_, bitmap_at) = placement.alloc_aligned_with_phys(words * 4);
        let (_, descriptors_at) = placement.alloc_aligned_with_phys(descriptor_bytes);
        let storage = (bitmap_at, placement.cursor());

        let bitmap = unsafe { mapper.phys_slice_mut::<u32>(bitmap_at, words as usize) };
        let descriptors =
            unsafe { mapper.phys_slice_mut::<FrameDescriptor>(descriptors_at, frames as usize) };

        bitmap.fill(0);
        let high_from = layout.normal_end / PAGE_SIZE;
        for (pfn, d) in (0u32..).zip(descriptors.iter_mut()) {
            let flags = FrameFlags::new()
                .with_reserved(true)
                .with_high_memory(pfn >= high_from);
            *d = FrameDescriptor::new(flags);
        }

        let mut table = Self {
            bitmap,
            descriptors,
            frames,
            storage,
        };

        let storage_end = storage.1.frame_number_up();
        for pfn in 0..storage_end.as_u32().min(frames) {
            table.flag_used(FrameNumber::new(pfn));
        }
        for region in map.regions().filter(|r| !r.is_available()) {
            table.flag_used_span(region.base, region.end());
        }

        info!(
            "memmap: {frames} frames ({} MiB), table at {}..{}, {} frames in use",
            (u64::from(frames) * u64::from(PAGE_SIZE)) >> 20,
            storage.0,
            storage.1,
            table.used_frames()
        );
        table
    }

    fn flag_used_span(&mut self, start: u64, end: u64) {
        let page = u64::from(PAGE_SIZE);
        #[allow(clippy::cast_possible_truncation)]
        let first = (start / page).min(u64::from(self.frames)) as u32;
        #[allow(clippy::cast_possible_truncation)]
        let last = end.div_ceil(page).min(u64::from(self.frames)) as u32;
        debug!("memmap: frames {first:#x}..{last:#x} not available");
        for pfn in first..last {
            self.flag_used(FrameNumber::new(pfn));
        }
    }

    /// Number of frames in the machine.
    #[must_use]
    pub const fn len(&self) -> u32 {
        self.frames
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.frames == 0
    }

    /// Physical span of the bitmap and descriptor array.
    #[must_use]
    pub const fn storage(&self) -> (PhysicalAddress, PhysicalAddress) {
        self.storage
    }

    /// Mark `pfn` as in use. Frames past the end of the machine are ignored.
    pub fn flag_used(&mut self, pfn: FrameNumber) {
        if let Some((w, bit)) = self.word_mut(pfn) {
            *w |= bit;
        }
    }

    /// Mark `pfn` as free. Frames past the end of the machine are ignored.
    pub fn flag_free(&mut self, pfn: FrameNumber) {
        if let Some((w, bit)) = self.word_mut(pfn) {
            *w &= !bit;
        }
    }

    /// Whether `pfn` is in use. Frames that do not exist always are.
    #[must_use]
    pub fn test(&self, pfn: FrameNumber) -> bool {
        if pfn.as_u32() >= self.frames {
            return true;
        }
        let (word, bit) = Self::position(pfn);
        self.bitmap.get(word).is_none_or(|w| w & bit != 0)
    }

    const fn position(pfn: FrameNumber) -> (usize, u32) {
        ((pfn.as_u32() / 32) as usize, 1 << (pfn.as_u32() % 32))
    }

    fn word_mut(&mut self, pfn: FrameNumber) -> Option<(&mut u32, u32)> {
        if pfn.as_u32() >= self.frames {
            return None;
        }
        let (word, bit) = Self::position(pfn);
        self.bitmap.get_mut(word).map(|w| (w, bit))
    }

    /// Number of frames marked in use.
    #[must_use]
    pub fn used_frames(&self) -> u32 {
        self.bitmap.iter().map(|w| w.count_ones()).sum()
    }

    #[must_use]
    pub fn descriptor(&self, pfn: FrameNumber) -> Option<&FrameDescriptor> {
        self.descriptors.get(pfn.as_usize())
    }

    pub fn descriptor_mut(&mut self, pfn: FrameNumber) -> Option<&mut FrameDescriptor> {
        self.descriptors.get_mut(pfn.as_usize())
    }

    #[must_use]
    pub fn descriptors(&self) -> &[FrameDescriptor] {
        self.descriptors
    }

    /// Give `pfn` to the page allocator: free in the bitmap, not reserved,
    /// one reference held by the releasing caller.
    ///
    /// Returns `false` for frames past the end of the machine.
    pub fn release(&mut self, pfn: FrameNumber) -> bool {
        self.flag_free(pfn);
        match self.descriptors.get_mut(pfn.as_usize()) {
            Some(d) => {
                d.flags.set_reserved(false);
                d.count = 1;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{AVAILABLE, RESERVED, map_bytes};
    use kernel_vmem::testing::SimulatedMemory;

    const MIB: u64 = 1 << 20;

    fn build<'a>(
        phys: &'a SimulatedMemory,
        map: &MemoryMap<'_>,
        layout: ZoneLayout,
        at: u32,
    ) -> FrameTable<'a> {
        let mut placement = PlacementAlloc::new(PhysicalAddress::new(at));
        unsafe { FrameTable::build(map, layout, &mut placement, phys) }
    }

    #[test]
    fn storage_and_holes_are_used() {
        let bytes = map_bytes(&[
            (0, 0x9_F000, AVAILABLE),
            (0x9_F000, 0x6_1000, RESERVED),
            (0x10_0000, 31 * MIB, AVAILABLE),
        ]);
        let map = MemoryMap::new(&bytes).unwrap();
        let phys = SimulatedMemory::new(256);
        let table = build(&phys, &map, ZoneLayout::I386, 0x2_0100);

        assert_eq!(table.len(), 8192);
        // 256 words of bitmap at 0x21000, 8192 * 12 bytes of descriptors at 0x22000.
        assert_eq!(
            table.storage(),
            (PhysicalAddress::new(0x2_1000), PhysicalAddress::new(0x3_A000))
        );
        assert!(table.test(FrameNumber::new(0)));
        assert!(table.test(FrameNumber::new(0x39)));
        assert!(!table.test(FrameNumber::new(0x3A)));
        assert!(!table.test(FrameNumber::new(0x9E)));
        assert!(table.test(FrameNumber::new(0x9F)));
        assert!(table.test(FrameNumber::new(0xFF)));
        assert!(!table.test(FrameNumber::new(0x100)));
        assert!(table.test(FrameNumber::new(8192)), "beyond the machine");
        assert_eq!(table.used_frames(), 0x3A + 0x61);
    }

    #[test]
    fn descriptors_start_reserved() {
        let bytes = map_bytes(&[(0, 8 * MIB, AVAILABLE)]);
        let map = MemoryMap::new(&bytes).unwrap();
        let phys = SimulatedMemory::new(64);
        let layout = ZoneLayout {
            dma_end: 2 * 1024 * 1024,
            normal_end: 4 * 1024 * 1024,
        };
        let mut table = build(&phys, &map, layout, 0x1_0000);

        assert!(table.descriptors().iter().all(|d| d.flags.reserved() && d.count == 0));
        let low = table.descriptor(FrameNumber::new(1023)).unwrap();
        assert!(!low.flags.high_memory());
        assert_eq!(low.virtual_address(), None);
        assert!(table.descriptor(FrameNumber::new(1024)).unwrap().flags.high_memory());
        assert!(table.descriptor(FrameNumber::new(2048)).is_none());

        let d = table.descriptor_mut(FrameNumber::new(5)).unwrap();
        d.set_virtual_address(Some(VirtualAddress::new(0xC000_5000)));
        assert_eq!(
            table.descriptor(FrameNumber::new(5)).unwrap().virtual_address(),
            Some(VirtualAddress::new(0xC000_5000))
        );
    }

    #[test]
    fn bit_primitives_use_32_bit_words() {
        let bytes = map_bytes(&[(0, 8 * MIB, AVAILABLE)]);
        let map = MemoryMap::new(&bytes).unwrap();
        let phys = SimulatedMemory::new(64);
        let mut table = build(&phys, &map, ZoneLayout::I386, 0x1_0000);
        let (bitmap_at, _) = table.storage();

        let pfn = FrameNumber::new(0x3F1); // word 31, bit 17
        assert!(!table.test(pfn));
        table.flag_used(pfn);
        assert!(table.test(pfn));
        let word = phys.read(bitmap_at + 31 * 4, 4);
        assert_eq!(u32::from_ne_bytes(word.try_into().unwrap()), 1 << 17);

        assert!(table.release(pfn));
        assert!(!table.test(pfn));
        let d = table.descriptor(pfn).unwrap();
        assert!(!d.flags.reserved());
        assert_eq!(d.count, 1);

        // Out of range: ignored.
        table.flag_used(FrameNumber::new(5000));
        assert!(!table.release(FrameNumber::new(5000)));
    }
}
