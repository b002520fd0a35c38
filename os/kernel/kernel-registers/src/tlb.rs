//! Translation lookaside buffer maintenance.

#[cfg(all(feature = "asm", target_arch = "x86"))]
use kernel_memory_addresses::VirtualAddress;

/// Drop the cached translation for the page containing `va`.
///
/// # Safety
/// Privileged instruction; ring 0 only.
#[cfg(all(feature = "asm", target_arch = "x86"))]
#[inline]
pub unsafe fn invlpg(va: VirtualAddress) {
    unsafe {
        core::arch::asm!("invlpg [{}]", in(reg) va.as_u32(), options(nostack, preserves_flags));
    }
}
