//! # Privileged Paging Operations
//!
//! Everything the paging code needs from the CPU, behind one trait so the
//! algorithms run unchanged on the host against
//! [`RecordingMmu`](crate::testing::RecordingMmu).

use kernel_memory_addresses::{PhysicalPage, Size4K, VirtualAddress};

/// Page-table base register, paging switch and TLB.
pub trait Mmu {
    /// Point the MMU at `directory`.
    ///
    /// # Safety
    /// `directory` must be a valid page directory. Once paging is on, it must
    /// map the currently executing code, stack and data.
    unsafe fn load_page_directory(&mut self, directory: PhysicalPage<Size4K>);

    /// The directory the MMU currently walks.
    fn page_directory(&self) -> PhysicalPage<Size4K>;

    /// Set CR0.PG and CR0.WP.
    ///
    /// # Safety
    /// The loaded directory must identity-map the instruction following the
    /// switch.
    unsafe fn enable_paging(&mut self);

    /// Drop the cached translation of the page containing `va`.
    ///
    /// # Safety
    /// Always sound on hardware; marked unsafe because it is privileged.
    unsafe fn invalidate_page(&mut self, va: VirtualAddress);
}

/// The real CPU.
#[cfg(target_arch = "x86")]
#[derive(Debug)]
pub struct X86Mmu {
    _private: (),
}

#[cfg(target_arch = "x86")]
impl X86Mmu {
    /// # Safety
    /// Only valid at CPL 0.
    #[must_use]
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

#[cfg(target_arch = "x86")]
impl Mmu for X86Mmu {
    unsafe fn load_page_directory(&mut self, directory: PhysicalPage<Size4K>) {
        use kernel_registers::StoreRegisterUnsafe;
        use kernel_registers::cr3::Cr3;
        unsafe {
            Cr3::from_directory_phys(directory.base()).store_unsafe();
        }
    }

    fn page_directory(&self) -> PhysicalPage<Size4K> {
        use kernel_registers::LoadRegisterUnsafe;
        use kernel_registers::cr3::Cr3;
        // SAFETY: an `X86Mmu` only exists at CPL 0.
        let cr3 = unsafe { Cr3::load_unsafe() };
        PhysicalPage::containing_address(cr3.directory_phys())
    }

    unsafe fn enable_paging(&mut self) {
        use kernel_registers::cr0::Cr0;
        use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
        unsafe {
            Cr0::load_unsafe().with_paging_enabled().store_unsafe();
        }
    }

    unsafe fn invalidate_page(&mut self, va: VirtualAddress) {
        unsafe {
            kernel_registers::tlb::invlpg(va);
        }
    }
}
