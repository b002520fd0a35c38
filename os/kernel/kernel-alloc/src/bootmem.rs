//! # Boot Frame Allocator
//!
//! `bootmem` is the physical allocator of the boot phase: one bit per frame
//! of low memory (`[0, normal_end)`), set when the frame is reserved or
//! allocated. It serves the early kernel until the [`FrameTable`] exists and
//! is then retired through [`BootMem::free_all`].
//!
//! ## Allocation
//!
//! Requests are served first-fit from the start of their zone (NORMAL for
//! [`BootMem::alloc`], DMA for the `_low` variants). Unaligned requests
//! continue in the unused tail of the previous allocation's last page when
//! the run found starts right after it:
//!
//! ```text
//!   previous allocation        new allocation
//! ┌──────────────────┬──────┬────────────────────┐
//! │ pfn N (reserved) │ tail │ pfn N+1 …          │
//! └──────────────────┴──────┴────────────────────┘
//!                    ▲ start = N * 4096 + last_offset
//! ```
//!
//! Allocation failure is reported, not fatal; freeing a frame that is not
//! reserved is.

use crate::memmap::FrameTable;
use crate::placement::PlacementAlloc;
use core::ops::Range;
use kernel_info::boot::MemoryMap;
use kernel_info::memory::{LinearMapError, PAGE_SIZE, Zone, ZoneLayout, phys_to_virt};
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
use kernel_vmem::PhysMapper;
use log::{debug, error, info, trace, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootMemError {
    #[error("bootmem: no run of free frames for {size:#x} bytes in zone {zone}")]
    OutOfMemory { size: u32, zone: Zone },
    #[error("bootmem: zero-sized allocation")]
    ZeroSize,
    #[error(transparent)]
    LinearMap(#[from] LinearMapError),
}

/// The boot-time frame bitmap and its allocation cursor.
pub struct BootMem<'a> {
    layout: ZoneLayout,
    pfn_start: u32,
    pfn_end: u32,
    bitmap: &'a mut [u8],
    bitmap_at: PhysicalAddress,
    /// Frame holding the last byte of the previous allocation.
    last_pfn: u32,
    /// Offset just past the previous allocation within `last_pfn`; `0` if it
    /// ended on a page boundary.
    last_offset: u32,
}

impl<'a> BootMem<'a> {
    /// Place the bitmap after the kernel, mark everything free, then reserve
    /// `[0, end of bitmap)`: real-mode structures, the kernel image and the
    /// bitmap itself.
    ///
    /// # Safety
    /// Memory handed out by `placement` must be RAM reachable through
    /// `mapper` and not referenced by anything else.
    pub unsafe fn initialise<M: PhysMapper>(
        layout: ZoneLayout,
        placement: &mut PlacementAlloc,
        mapper: &'a M,
    ) -> Self {
        let pfn_end = layout.normal_end / PAGE_SIZE;
        let bytes = pfn_end.div_ceil(8);
        let (_, bitmap_at) = placement.alloc_with_phys(bytes);
        let bitmap = unsafe { mapper.phys_slice_mut::<u8>(bitmap_at, bytes as usize) };
        bitmap.fill(0);

        let mut bootmem = Self {
            layout,
            pfn_start: 0,
            pfn_end,
            bitmap,
            bitmap_at,
            last_pfn: 0,
            last_offset: 0,
        };
        bootmem.reserve(PhysicalAddress::zero(), bitmap_at.as_u32() + bytes);
        info!(
            "bootmem: {pfn_end} frames, bitmap at {bitmap_at} ({bytes} bytes), {} free",
            bootmem.free_frames()
        );
        bootmem
    }

    /// Reserve everything the memory map does not describe as available RAM,
    /// including the range above the highest available address.
    pub fn reserve_holes(&mut self, map: &MemoryMap<'_>) {
        for region in map.regions().filter(|r| !r.is_available()) {
            debug!(
                "bootmem: hole {:#x}..{:#x} ({:?})",
                region.base,
                region.end(),
                region.kind
            );
            self.reserve_span(region.base, region.end());
        }
        let top = map.highest_available_address();
        self.reserve_span(top, self.managed_bytes());
        info!(
            "bootmem: RAM ends at {top:#x}, {} frames free",
            self.free_frames()
        );
    }

    fn managed_bytes(&self) -> u64 {
        u64::from(self.pfn_end) * u64::from(PAGE_SIZE)
    }

    /// Frames `[pfn_start, pfn_end)` under management.
    #[must_use]
    pub const fn frames(&self) -> Range<FrameNumber> {
        FrameNumber::new(self.pfn_start)..FrameNumber::new(self.pfn_end)
    }

    #[must_use]
    pub const fn layout(&self) -> ZoneLayout {
        self.layout
    }

    /// Physical span of the bitmap.
    #[must_use]
    pub fn bitmap_range(&self) -> (PhysicalAddress, PhysicalAddress) {
        #[allow(clippy::cast_possible_truncation)]
        let end = self.bitmap_at + self.bitmap.len() as u32;
        (self.bitmap_at, end)
    }

    fn is_set(&self, pfn: u32) -> bool {
        self.bitmap
            .get((pfn / 8) as usize)
            .is_some_and(|b| b & (1 << (pfn % 8)) != 0)
    }

    fn set(&mut self, pfn: u32) {
        if let Some(b) = self.bitmap.get_mut((pfn / 8) as usize) {
            *b |= 1 << (pfn % 8);
        }
    }

    fn clear(&mut self, pfn: u32) {
        if let Some(b) = self.bitmap.get_mut((pfn / 8) as usize) {
            *b &= !(1 << (pfn % 8));
        }
    }

    fn clamp(&self, first: u64, end: u64) -> Range<u32> {
        #[allow(clippy::cast_possible_truncation)]
        let clamp = |pfn: u64| pfn.clamp(u64::from(self.pfn_start), u64::from(self.pfn_end)) as u32;
        clamp(first)..clamp(end)
    }

    fn reserve_span(&mut self, start: u64, end: u64) {
        let page = u64::from(PAGE_SIZE);
        let frames = self.clamp(start / page, end.div_ceil(page));
        trace!("bootmem: reserve frames {:#x}..{:#x}", frames.start, frames.end);
        for pfn in frames {
            self.set(pfn);
        }
    }

    /// Mark every frame touched by `[addr, addr + size)` as reserved.
    pub fn reserve(&mut self, addr: PhysicalAddress, size: u32) {
        if size == 0 {
            return;
        }
        let start = u64::from(addr.as_u32());
        self.reserve_span(start, start + u64::from(size));
    }

    /// Release the frames lying wholly inside `[addr, addr + size)`.
    ///
    /// # Panics
    /// If one of these frames is not reserved: a double free.
    pub fn free(&mut self, addr: PhysicalAddress, size: u32) {
        let page = u64::from(PAGE_SIZE);
        let start = u64::from(addr.as_u32());
        let end = start + u64::from(size);
        let frames = self.clamp(start.div_ceil(page), end / page);
        trace!("bootmem: free frames {:#x}..{:#x}", frames.start, frames.end);
        for pfn in frames {
            if !self.is_set(pfn) {
                error!("bootmem: double free of frame {pfn:#x} ({addr}, {size:#x} bytes)");
                panic!("bootmem: double free of frame {pfn:#x}");
            }
            self.clear(pfn);
        }
    }

    /// `size` bytes from the NORMAL zone.
    ///
    /// # Errors
    /// [`BootMemError::OutOfMemory`] if no run is large enough,
    /// [`BootMemError::ZeroSize`] for empty requests.
    pub fn alloc(&mut self, size: u32) -> Result<VirtualAddress, BootMemError> {
        self.alloc_in(size, Zone::Normal, false)
    }

    /// `size` bytes from the DMA zone.
    ///
    /// # Errors
    /// See [`alloc`](Self::alloc).
    pub fn alloc_low(&mut self, size: u32) -> Result<VirtualAddress, BootMemError> {
        self.alloc_in(size, Zone::Dma, false)
    }

    /// `size` bytes from the NORMAL zone, starting on a page boundary.
    ///
    /// # Errors
    /// See [`alloc`](Self::alloc).
    pub fn aligned_alloc(&mut self, size: u32) -> Result<VirtualAddress, BootMemError> {
        self.alloc_in(size, Zone::Normal, true)
    }

    /// `size` bytes from the DMA zone, starting on a page boundary.
    ///
    /// # Errors
    /// See [`alloc`](Self::alloc).
    pub fn aligned_alloc_low(&mut self, size: u32) -> Result<VirtualAddress, BootMemError> {
        self.alloc_in(size, Zone::Dma, true)
    }

    fn zone_frames(&self, zone: Zone) -> Range<u32> {
        let frames = self.layout.frames(zone);
        self.clamp(u64::from(frames.start.as_u32()), u64::from(frames.end.as_u32()))
    }

    fn alloc_in(
        &mut self,
        size: u32,
        zone: Zone,
        page_aligned: bool,
    ) -> Result<VirtualAddress, BootMemError> {
        if size == 0 {
            return Err(BootMemError::ZeroSize);
        }
        let needed = size.div_ceil(PAGE_SIZE);
        let goal = self.zone_frames(zone);

        let mut run = 0;
        let mut found = None;
        for pfn in goal.clone() {
            if self.is_set(pfn) {
                run = 0;
                continue;
            }
            run += 1;
            if run == needed {
                found = Some(pfn + 1 - needed);
                break;
            }
        }
        let Some(first) = found else {
            warn!(
                "bootmem: out of memory for {size:#x} bytes in {zone} ({} frames free)",
                self.free_frames()
            );
            return Err(BootMemError::OutOfMemory { size, zone });
        };

        let mut start = first * PAGE_SIZE;
        if !page_aligned
            && self.last_offset != 0
            && first == self.last_pfn + 1
            && self.last_pfn >= goal.start
        {
            start = self.last_pfn * PAGE_SIZE + self.last_offset;
            trace!("bootmem: merging into the tail of frame {:#x}", self.last_pfn);
        }
        let va = phys_to_virt(PhysicalAddress::new(start))?;

        let end = start + size;
        self.reserve(PhysicalAddress::new(start), size);
        self.last_pfn = (end - 1) / PAGE_SIZE;
        self.last_offset = end % PAGE_SIZE;
        debug!("bootmem: {size:#x} bytes at {start:#010x} ({zone})");
        Ok(va)
    }

    /// Number of frames neither reserved nor allocated.
    #[must_use]
    pub fn free_frames(&self) -> u32 {
        let used: u32 = self.bitmap.iter().map(|b| b.count_ones()).sum();
        (self.pfn_end - self.pfn_start) - used
    }

    /// Whether `pfn` is reserved or allocated. Frames outside the managed
    /// range count as reserved.
    #[must_use]
    pub fn frame_is_reserved(&self, pfn: FrameNumber) -> bool {
        let pfn = pfn.as_u32();
        pfn < self.pfn_start || pfn >= self.pfn_end || self.is_set(pfn)
    }

    /// Hand physical accounting to `table` and retire the boot allocator.
    ///
    /// Frames reserved here stay in use in `table`. Every other frame the
    /// table also considers present is released (see
    /// [`FrameTable::release`]), followed by the pages fully covered by the
    /// bitmap itself. Returns the number of frames released.
    pub fn free_all(self, table: &mut FrameTable<'_>) -> usize {
        let mut released = 0;
        for pfn in self.pfn_start..self.pfn_end.min(table.len()) {
            let pfn_n = FrameNumber::new(pfn);
            if self.is_set(pfn) {
                table.flag_used(pfn_n);
            } else if !table.test(pfn_n) && table.release(pfn_n) {
                released += 1;
            }
        }

        let (start, end) = self.bitmap_range();
        let own = start.frame_number_up().as_u32()..end.frame_number_down().as_u32();
        for pfn in own {
            if table.release(FrameNumber::new(pfn)) {
                released += 1;
            }
        }

        info!(
            "bootmem: retired, {released} frames handed to the frame table, {} in use",
            table.used_frames()
        );
        released
    }
}
