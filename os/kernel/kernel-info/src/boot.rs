//! # Boot Descriptor
//!
//! The Multiboot (v1) information block handed over by the boot loader in
//! `ebx`, the memory map it points to, and the translation of its embedded
//! physical pointers into kernel-virtual ones.

use crate::memory::{PAGE_OFFSET, phys_to_virt};
use bitfield_struct::bitfield;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// `framebuffer_type` value for indexed-color (palette) framebuffers.
pub const FRAMEBUFFER_TYPE_INDEXED: u8 = 0;

/// Size of one memory-map entry without its leading `size` field.
const MMAP_ENTRY_MIN_SIZE: usize = 20;

/// Validity flags of the information block; bit `n` says whether the
/// corresponding group of fields was filled in by the boot loader.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct MultibootFlags {
    /// Bit 0 — `mem_lower` / `mem_upper`.
    pub memory: bool,
    /// Bit 1 — `boot_device`.
    pub boot_device: bool,
    /// Bit 2 — `cmdline`.
    pub cmdline: bool,
    /// Bit 3 — `mods_count` / `mods_addr`.
    pub modules: bool,
    /// Bit 4 — a.out symbol table in `syms`.
    pub aout_symbols: bool,
    /// Bit 5 — ELF section headers in `syms`.
    pub elf_sections: bool,
    /// Bit 6 — `mmap_length` / `mmap_addr`.
    pub memory_map: bool,
    /// Bit 7 — `drives_length` / `drives_addr`.
    pub drives: bool,
    /// Bit 8 — `config_table`.
    pub config_table: bool,
    /// Bit 9 — `boot_loader_name`.
    pub boot_loader_name: bool,
    /// Bit 10 — `apm_table`.
    pub apm_table: bool,
    /// Bit 11 — VBE fields.
    pub vbe: bool,
    /// Bit 12 — framebuffer fields.
    pub framebuffer: bool,
    #[bits(19)]
    __: u32,
}

/// The boot information block, bit-exact to the Multiboot v1 layout.
///
/// The 64-bit framebuffer address is kept as two words so that the layout
/// does not depend on the target's alignment of `u64`.
#[repr(C)]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultibootInfo {
    pub flags: MultibootFlags,
    /// KiB of memory below 1 MiB.
    pub mem_lower: u32,
    /// KiB of memory above 1 MiB.
    pub mem_upper: u32,
    pub boot_device: u32,
    pub cmdline: u32,
    pub mods_count: u32,
    pub mods_addr: u32,
    /// a.out or ELF symbol information, see [`MultibootFlags`].
    pub syms: [u32; 4],
    pub mmap_length: u32,
    pub mmap_addr: u32,
    pub drives_length: u32,
    pub drives_addr: u32,
    pub config_table: u32,
    pub boot_loader_name: u32,
    pub apm_table: u32,
    pub vbe_control_info: u32,
    pub vbe_mode_info: u32,
    pub vbe_mode: u16,
    pub vbe_interface_seg: u16,
    pub vbe_interface_off: u16,
    pub vbe_interface_len: u16,
    pub framebuffer_addr: [u32; 2],
    pub framebuffer_pitch: u32,
    pub framebuffer_width: u32,
    pub framebuffer_height: u32,
    pub framebuffer_bpp: u8,
    pub framebuffer_type: u8,
    /// Palette address and color count for indexed framebuffers, RGB field
    /// positions and mask sizes for direct-color ones.
    pub color_info: [u8; 6],
}

const _: () = {
    assert!(size_of::<MultibootInfo>() == 116);
    assert!(core::mem::offset_of!(MultibootInfo, mmap_addr) == 48);
    assert!(core::mem::offset_of!(MultibootInfo, framebuffer_addr) == 88);
};

/// One entry of the module list at `mods_addr`.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct MultibootModule {
    pub mod_start: u32,
    pub mod_end: u32,
    /// Module command line.
    pub string: u32,
    pub reserved: u32,
}

/// Problems with the boot descriptor.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum BootInfoError {
    #[error("boot loader did not provide a memory map")]
    MissingMemoryMap,
    #[error("malformed memory map entry at byte offset {offset}")]
    MalformedMemoryMap { offset: usize },
    #[error("{field} pointer {address:#010x} is outside the linearly mapped memory")]
    UnmappedPointer { field: &'static str, address: u32 },
}

/// Rewrite a physical pointer to its kernel-virtual equivalent.
///
/// Zero stays zero and values at or above `PAGE_OFFSET` are already virtual.
fn translate_pointer(field: &'static str, address: u32) -> Result<u32, BootInfoError> {
    if address == 0 || address >= PAGE_OFFSET {
        return Ok(address);
    }
    phys_to_virt(PhysicalAddress::new(address))
        .map(VirtualAddress::as_u32)
        .map_err(|_| BootInfoError::UnmappedPointer { field, address })
}

/// [`translate_pointer`] for a field whose validity flag is `present`;
/// fields the boot loader did not fill in are left as they are.
fn translate_field(
    present: bool,
    field: &'static str,
    address: u32,
) -> Result<u32, BootInfoError> {
    if present {
        translate_pointer(field, address)
    } else {
        Ok(address)
    }
}

/// Kernel-virtual pointer to the information block the boot loader left at
/// the physical address in `ebx`.
///
/// A pointer that is already in kernel space is returned unchanged.
///
/// # Errors
/// [`BootInfoError::UnmappedPointer`] for a null pointer or one outside the
/// linearly mapped memory.
pub fn translate_block(info: *mut MultibootInfo) -> Result<*mut MultibootInfo, BootInfoError> {
    const FIELD: &str = "info block";
    let address = u32::try_from(info.addr()).map_err(|_| BootInfoError::UnmappedPointer {
        field: FIELD,
        address: u32::MAX,
    })?;
    if address == 0 {
        return Err(BootInfoError::UnmappedPointer {
            field: FIELD,
            address,
        });
    }
    let va = translate_pointer(FIELD, address)?;
    Ok(info.with_addr(va as usize))
}

impl MultibootInfo {
    /// Rewrite every embedded pointer from physical to kernel-virtual form.
    ///
    /// Only fields whose validity flag is set are touched; whatever the boot
    /// loader left in the others is ignored. Pointers already in kernel space
    /// and null pointers are left alone, so running this twice is the same as
    /// running it once. The palette pointer
    /// is only rewritten for indexed-color framebuffers; for other types the
    /// same bytes hold color-mask data. Either every field is rewritten or,
    /// on error, none is.
    ///
    /// # Errors
    /// [`BootInfoError::UnmappedPointer`] if a pointer refers to physical
    /// memory outside the permanent linear mapping.
    pub fn translate(&mut self) -> Result<(), BootInfoError> {
        let flags = self.flags;
        let cmdline = translate_field(flags.cmdline(), "cmdline", self.cmdline)?;
        let mods_addr = translate_field(flags.modules(), "mods_addr", self.mods_addr)?;
        let mmap_addr = translate_field(flags.memory_map(), "mmap_addr", self.mmap_addr)?;
        let drives_addr = translate_field(flags.drives(), "drives_addr", self.drives_addr)?;
        let boot_loader_name = translate_field(
            flags.boot_loader_name(),
            "boot_loader_name",
            self.boot_loader_name,
        )?;
        let apm_table = translate_field(flags.apm_table(), "apm_table", self.apm_table)?;
        let palette = match self.palette() {
            Some((addr, _)) => Some(translate_pointer("palette", addr)?),
            None => None,
        };

        self.cmdline = cmdline;
        self.mods_addr = mods_addr;
        self.mmap_addr = mmap_addr;
        self.drives_addr = drives_addr;
        self.boot_loader_name = boot_loader_name;
        self.apm_table = apm_table;
        if let Some(addr) = palette {
            self.color_info[..4].copy_from_slice(&addr.to_le_bytes());
        }
        Ok(())
    }

    /// Palette address and number of colors, for indexed framebuffers only.
    #[must_use]
    pub fn palette(&self) -> Option<(u32, u16)> {
        if !self.flags.framebuffer() || self.framebuffer_type != FRAMEBUFFER_TYPE_INDEXED {
            return None;
        }
        let [a, b, c, d, e, f] = self.color_info;
        Some((u32::from_le_bytes([a, b, c, d]), u16::from_le_bytes([e, f])))
    }

    #[must_use]
    pub fn framebuffer_address(&self) -> u64 {
        u64::from(self.framebuffer_addr[1]) << 32 | u64::from(self.framebuffer_addr[0])
    }

    /// Location and byte length of the memory map.
    ///
    /// # Errors
    /// [`BootInfoError::MissingMemoryMap`] if flag bit 6 is clear.
    pub fn memory_map_location(&self) -> Result<(u32, usize), BootInfoError> {
        if !self.flags.memory_map() || self.mmap_addr == 0 {
            return Err(BootInfoError::MissingMemoryMap);
        }
        Ok((self.mmap_addr, self.mmap_length as usize))
    }

    /// Location and count of the module list, if present.
    #[must_use]
    pub fn modules_location(&self) -> Option<(u32, usize)> {
        (self.flags.modules() && self.mods_count > 0)
            .then_some((self.mods_addr, self.mods_count as usize))
    }
}

/// Rewrite the command-line pointers of the module list.
///
/// The module ranges themselves stay physical: they describe memory, they are
/// not dereferenced through this table.
///
/// # Errors
/// [`BootInfoError::UnmappedPointer`]; no entry is modified in that case.
pub fn translate_modules(modules: &mut [MultibootModule]) -> Result<(), BootInfoError> {
    for m in modules.iter() {
        translate_pointer("module string", m.string)?;
    }
    for m in modules.iter_mut() {
        m.string = translate_pointer("module string", m.string)?;
    }
    Ok(())
}

/// Type of a memory-map region.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemoryKind {
    /// Usable RAM.
    Available,
    Reserved,
    /// ACPI tables, usable once they have been parsed.
    AcpiReclaimable,
    /// Must be preserved across hibernation.
    NonVolatile,
    /// Defective RAM.
    Bad,
    Unknown(u32),
}

impl From<u32> for MemoryKind {
    fn from(value: u32) -> Self {
        match value {
            1 => Self::Available,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::NonVolatile,
            5 => Self::Bad,
            other => Self::Unknown(other),
        }
    }
}

/// One physical range of the memory map.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MemoryRegion {
    pub base: u64,
    pub length: u64,
    pub kind: MemoryKind,
}

impl MemoryRegion {
    /// Exclusive end address.
    #[must_use]
    pub const fn end(&self) -> u64 {
        self.base.saturating_add(self.length)
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self.kind, MemoryKind::Available)
    }
}

/// A validated view of the memory map bytes.
///
/// Each entry is `{size: u32, base: u64, length: u64, type: u32}`, packed,
/// and the next entry starts `size + 4` bytes after the current one.
#[derive(Debug, Copy, Clone)]
pub struct MemoryMap<'a> {
    bytes: &'a [u8],
}

impl<'a> MemoryMap<'a> {
    /// Walk the entries once to make sure iteration terminates and never
    /// reads out of bounds.
    ///
    /// # Errors
    /// [`BootInfoError::MalformedMemoryMap`] for an entry whose `size` is too
    /// small (including zero) or which runs past the end of the buffer.
    pub fn new(bytes: &'a [u8]) -> Result<Self, BootInfoError> {
        let mut offset = 0;
        while offset < bytes.len() {
            let size = read_u32(bytes, offset)
                .ok_or(BootInfoError::MalformedMemoryMap { offset })? as usize;
            match entry_end(offset, size) {
                Some(next) if size >= MMAP_ENTRY_MIN_SIZE && next <= bytes.len() => {
                    offset = next;
                }
                _ => return Err(BootInfoError::MalformedMemoryMap { offset }),
            }
        }
        Ok(Self { bytes })
    }

    #[must_use]
    pub const fn regions(&self) -> MemoryRegions<'a> {
        MemoryRegions {
            bytes: self.bytes,
            offset: 0,
        }
    }

    /// Highest end address of any region, whatever its type.
    #[must_use]
    pub fn highest_address(&self) -> u64 {
        self.regions().map(|r| r.end()).max().unwrap_or(0)
    }

    /// Highest end address of an available region.
    #[must_use]
    pub fn highest_available_address(&self) -> u64 {
        self.regions()
            .filter(MemoryRegion::is_available)
            .map(|r| r.end())
            .max()
            .unwrap_or(0)
    }

    /// Total size of all available regions.
    #[must_use]
    pub fn available_bytes(&self) -> u64 {
        self.regions()
            .filter(MemoryRegion::is_available)
            .map(|r| r.length)
            .sum()
    }
}

impl<'a> IntoIterator for &MemoryMap<'a> {
    type Item = MemoryRegion;
    type IntoIter = MemoryRegions<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.regions()
    }
}

/// Iterator over a [`MemoryMap`].
#[derive(Debug, Clone)]
pub struct MemoryRegions<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Iterator for MemoryRegions<'_> {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<Self::Item> {
        let at = self.offset;
        let size = read_u32(self.bytes, at)? as usize;
        let base = read_u64(self.bytes, at + 4)?;
        let length = read_u64(self.bytes, at + 12)?;
        let kind = read_u32(self.bytes, at + 20)?;
        self.offset = entry_end(at, size)?;
        Some(MemoryRegion {
            base,
            length,
            kind: kind.into(),
        })
    }
}

/// Offset of the entry after the one at `at` whose `size` field is `size`.
const fn entry_end(at: usize, size: usize) -> Option<usize> {
    match at.checked_add(4) {
        Some(v) => v.checked_add(size),
        None => None,
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw = bytes.get(at..at.checked_add(4)?)?;
    Some(u32::from_le_bytes(raw.try_into().ok()?))
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let raw = bytes.get(at..at.checked_add(8)?)?;
    Some(u64::from_le_bytes(raw.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(out: &mut Vec<u8>, base: u64, length: u64, kind: u32) {
        out.extend_from_slice(&20u32.to_le_bytes());
        out.extend_from_slice(&base.to_le_bytes());
        out.extend_from_slice(&length.to_le_bytes());
        out.extend_from_slice(&kind.to_le_bytes());
    }

    fn sample_map() -> Vec<u8> {
        let mut bytes = Vec::new();
        entry(&mut bytes, 0, 0x9_FC00, 1);
        entry(&mut bytes, 0x9_FC00, 0x400, 2);
        entry(&mut bytes, 0xF_0000, 0x1_0000, 2);
        entry(&mut bytes, 0x10_0000, 0x3F0_0000, 1);
        entry(&mut bytes, 0xFFFC_0000, 0x4_0000, 2);
        bytes
    }

    fn sample_info() -> MultibootInfo {
        MultibootInfo {
            flags: MultibootFlags::new()
                .with_memory(true)
                .with_cmdline(true)
                .with_modules(true)
                .with_memory_map(true)
                .with_boot_loader_name(true),
            mem_lower: 639,
            mem_upper: 64_512,
            cmdline: 0x0001_0000,
            mods_count: 1,
            mods_addr: 0x0001_0100,
            mmap_length: 120,
            mmap_addr: 0x0001_0200,
            boot_loader_name: 0x0001_0300,
            ..MultibootInfo::default()
        }
    }

    #[test]
    fn flags_match_hardware_bits() {
        let flags = MultibootFlags::from_bits(1 << 6 | 1);
        assert!(flags.memory_map());
        assert!(flags.memory());
        assert!(!flags.modules());
    }

    #[test]
    fn translation_rewrites_physical_pointers() {
        let mut info = sample_info();
        info.translate().unwrap();
        assert_eq!(info.cmdline, 0xC001_0000);
        assert_eq!(info.mods_addr, 0xC001_0100);
        assert_eq!(info.mmap_addr, 0xC001_0200);
        assert_eq!(info.boot_loader_name, 0xC001_0300);
        // Null pointers stay null.
        assert_eq!(info.drives_addr, 0);
        assert_eq!(info.apm_table, 0);
        // Non-pointer fields are untouched.
        assert_eq!(info.mem_upper, 64_512);
        assert_eq!(info.mmap_length, 120);
    }

    #[test]
    fn translation_is_idempotent() {
        let mut once = sample_info();
        once.translate().unwrap();
        let mut twice = once.clone();
        twice.translate().unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn palette_is_translated_only_for_indexed_framebuffers() {
        let mut indexed = sample_info();
        indexed.flags.set_framebuffer(true);
        indexed.framebuffer_type = FRAMEBUFFER_TYPE_INDEXED;
        indexed.color_info = [0x00, 0x20, 0x00, 0x00, 16, 0];
        indexed.translate().unwrap();
        assert_eq!(indexed.palette(), Some((0xC000_2000, 16)));

        let mut rgb = sample_info();
        rgb.flags.set_framebuffer(true);
        rgb.framebuffer_type = 1;
        rgb.color_info = [16, 8, 8, 8, 0, 8];
        rgb.translate().unwrap();
        assert_eq!(rgb.color_info, [16, 8, 8, 8, 0, 8]);
        assert_eq!(rgb.palette(), None);
    }

    #[test]
    fn unmapped_pointer_leaves_block_untouched() {
        let mut info = sample_info();
        info.flags.set_apm_table(true);
        info.apm_table = 0x8000_0000;
        let before = info.clone();
        assert_eq!(
            info.translate(),
            Err(BootInfoError::UnmappedPointer {
                field: "apm_table",
                address: 0x8000_0000
            })
        );
        assert_eq!(info, before);
    }

    #[test]
    fn fields_without_their_flag_are_ignored() {
        let mut info = sample_info();
        info.apm_table = 0x8000_0000;
        info.drives_addr = 0x0002_0000;
        info.translate().unwrap();
        assert_eq!(info.apm_table, 0x8000_0000);
        assert_eq!(info.drives_addr, 0x0002_0000);
        assert_eq!(info.cmdline, 0xC001_0000);
    }

    #[test]
    fn block_pointer_is_moved_into_kernel_space() {
        let physical = core::ptr::without_provenance_mut::<MultibootInfo>(0x9500);
        let virt = translate_block(physical).unwrap();
        assert_eq!(virt.addr(), 0xC000_9500);
        assert_eq!(translate_block(virt), Ok(virt));
    }

    #[test]
    fn block_pointer_must_be_mapped() {
        let null = core::ptr::null_mut::<MultibootInfo>();
        assert_eq!(
            translate_block(null),
            Err(BootInfoError::UnmappedPointer {
                field: "info block",
                address: 0
            })
        );
        let high = core::ptr::without_provenance_mut::<MultibootInfo>(0x8000_0000);
        assert!(translate_block(high).is_err());
    }

    #[test]
    fn modules_need_flag_and_entries() {
        let mut info = sample_info();
        assert_eq!(info.modules_location(), Some((0x0001_0100, 1)));
        info.mods_count = 0;
        assert_eq!(info.modules_location(), None);
        info.mods_count = 2;
        info.flags.set_modules(false);
        assert_eq!(info.modules_location(), None);
    }

    #[test]
    fn framebuffer_address_joins_both_words() {
        let info = MultibootInfo {
            framebuffer_addr: [0xFD00_0000, 0x1],
            ..MultibootInfo::default()
        };
        assert_eq!(info.framebuffer_address(), 0x1_FD00_0000);
    }

    #[test]
    fn module_strings_are_translated() {
        let mut mods = [
            MultibootModule {
                mod_start: 0x20_0000,
                mod_end: 0x20_4000,
                string: 0x1_0400,
                reserved: 0,
            },
            MultibootModule {
                string: 0xC001_0500,
                ..MultibootModule::default()
            },
        ];
        translate_modules(&mut mods).unwrap();
        assert_eq!(mods[0].string, 0xC001_0400);
        assert_eq!(mods[0].mod_start, 0x20_0000);
        assert_eq!(mods[1].string, 0xC001_0500);
    }

    #[test]
    fn memory_map_requires_flag() {
        let mut info = sample_info();
        assert_eq!(info.memory_map_location(), Ok((0x0001_0200, 120)));
        info.flags.set_memory_map(false);
        assert_eq!(
            info.memory_map_location(),
            Err(BootInfoError::MissingMemoryMap)
        );
    }

    #[test]
    fn memory_map_iteration() {
        let bytes = sample_map();
        let map = MemoryMap::new(&bytes).unwrap();
        let regions: Vec<_> = map.regions().collect();
        assert_eq!(regions.len(), 5);
        assert_eq!(regions[0].kind, MemoryKind::Available);
        assert_eq!(regions[1].kind, MemoryKind::Reserved);
        assert_eq!(regions[3].end(), 0x400_0000);
        assert_eq!(map.highest_address(), 0x1_0000_0000);
        assert_eq!(map.highest_available_address(), 0x400_0000);
        assert_eq!(map.available_bytes(), 0x9_FC00 + 0x3F0_0000);
    }

    #[test]
    fn larger_entry_size_is_skipped_over() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&24u32.to_le_bytes());
        bytes.extend_from_slice(&0u64.to_le_bytes());
        bytes.extend_from_slice(&0x1000u64.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes()); // extended attributes
        entry(&mut bytes, 0x1000, 0x1000, 9);
        let map = MemoryMap::new(&bytes).unwrap();
        let kinds: Vec<_> = map.regions().map(|r| r.kind).collect();
        assert_eq!(kinds, [MemoryKind::AcpiReclaimable, MemoryKind::Unknown(9)]);
    }

    #[test]
    fn zero_sized_entry_is_rejected() {
        let mut bytes = sample_map();
        bytes[24..28].copy_from_slice(&0u32.to_le_bytes());
        assert_eq!(
            MemoryMap::new(&bytes).unwrap_err(),
            BootInfoError::MalformedMemoryMap { offset: 24 }
        );
    }

    #[test]
    fn huge_entry_size_is_rejected() {
        let mut bytes = sample_map();
        bytes[24..28].copy_from_slice(&u32::MAX.to_le_bytes());
        assert_eq!(
            MemoryMap::new(&bytes).unwrap_err(),
            BootInfoError::MalformedMemoryMap { offset: 24 }
        );
        assert_eq!(entry_end(usize::MAX - 2, 20), None);
        assert_eq!(entry_end(24, usize::MAX - 27), None);
        assert_eq!(entry_end(24, 20), Some(48));
    }

    #[test]
    fn truncated_entry_is_rejected() {
        let bytes = sample_map();
        assert_eq!(
            MemoryMap::new(&bytes[..bytes.len() - 1]).unwrap_err(),
            BootInfoError::MalformedMemoryMap { offset: 96 }
        );
    }
}
