//! # Physical memory access
//!
//! The kernel can only dereference virtual addresses. A [`PhysMapper`] turns
//! a physical address into a reference the current address space can use;
//! the memory manager needs it to zero freshly allocated frames.
//!
//! With a higher-half direct map (HHDM) every physical address is visible at
//! `HHDM_BASE + pa`, which is what [`HhdmPhysMapper`] does. Hosted tests use a
//! heap-backed mapper instead.

use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Translates physical addresses into usable references.
pub trait PhysMapper {
    /// Returns a reference to the `T` located at `pa`.
    ///
    /// # Safety
    /// The physical range `[pa, pa + size_of::<T>())` must be mapped, valid
    /// for `T`, and not aliased for the lifetime `'a`.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// [`PhysMapper`] implementation for kernels with a higher-half direct map.
///
/// The kernel hands one to the physical memory manager at boot:
///
/// ```no_run
/// use kernel_memory_addresses::PhysicalAddress;
/// use kernel_mm::{FrameAlloc, HhdmPhysMapper, PhysicalMemoryManager, ShouldZeroFill};
///
/// let pmm = PhysicalMemoryManager::new(HhdmPhysMapper);
/// pmm.add_physical_range(PhysicalAddress::new(0x10_0000), 256);
/// // Zeroing writes through the direct map.
/// let page = pmm.allocate_page(ShouldZeroFill::Yes);
/// ```
///
/// # Safety
/// The HHDM mapping must be present and cover every frame the memory manager
/// hands out.
pub struct HhdmPhysMapper;

impl HhdmPhysMapper {
    /// Where `pa` appears in the direct map.
    #[inline]
    #[must_use]
    pub const fn virtual_address(pa: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(HHDM_BASE + pa.as_u64())
    }
}

impl PhysMapper for HhdmPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = Self::virtual_address(pa).as_u64() as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and mapped via HHDM.
        unsafe { &mut *va }
    }
}
