//! # Linear-map `PhysMapper`
//!
//! Once paging is on, every physical address below `LOWMEM_END` is
//! reachable at `pa + PAGE_OFFSET`. [`LinearPhysMapper`] turns that into a
//! [`PhysMapper`] for the page-table and allocator code.
//!
//! The boot stub runs the kernel at its link address before paging is on,
//! so the same mapper also serves the bring-up itself.

use kernel_info::memory::phys_to_virt;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] through the kernel's permanent linear mapping.
///
/// Addresses above the linear mapping have no kernel-virtual alias and map
/// to the null pointer, whose page is never mapped after the identity
/// mapping is retired.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinearPhysMapper;

impl PhysMapper for LinearPhysMapper {
    fn phys_to_ptr(&self, at: PhysicalAddress) -> *mut u8 {
        phys_to_virt(at).map_or(core::ptr::null_mut(), |va| va.as_mut_ptr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_memory_is_offset_by_page_offset() {
        let p = LinearPhysMapper.phys_to_ptr(PhysicalAddress::new(0x0012_3000));
        assert_eq!(p as usize, 0xC012_3000);
    }

    #[test]
    fn high_memory_has_no_alias() {
        let p = LinearPhysMapper.phys_to_ptr(PhysicalAddress::new(0x3800_0000));
        assert!(p.is_null());
    }
}
