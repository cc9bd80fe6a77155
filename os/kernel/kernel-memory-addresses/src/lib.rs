//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the addresses and address ranges handled by the
//! memory-management core.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | An address in some address space (page-table translated). |
//! | [`PhysicalAddress`] | An address of RAM or MMIO as seen by the CPU's bus. |
//! | [`VirtualRange`] | A half-open `[base, base + size)` interval of virtual addresses. |
//!
//! The wrappers are zero-cost `#[repr(transparent)]` views of `u64` and exist
//! only to keep the two address spaces from being mixed up. All page
//! arithmetic uses the 4 KiB base page ([`PAGE_SIZE`]); huge pages are not
//! modelled here.
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x4000_1234);
//! assert_eq!(va.page_base(), VirtualAddress::new(0x4000_1000));
//!
//! let range = VirtualRange::expand_to_page_boundaries(va, 0x10).unwrap();
//! assert_eq!(range.base().as_u64(), 0x4000_1000);
//! assert_eq!(range.size(), PAGE_SIZE);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]

mod physical_address;
mod virtual_address;
mod virtual_range;

pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;
pub use virtual_range::VirtualRange;

/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: u32 = 12;

/// Size of a base page in bytes.
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;

/// Whether `value` is a multiple of [`PAGE_SIZE`].
#[inline]
#[must_use]
pub const fn is_page_aligned(value: u64) -> bool {
    value & (PAGE_SIZE - 1) == 0
}

/// Rounds `value` down to a page boundary.
#[inline]
#[must_use]
pub const fn page_round_down(value: u64) -> u64 {
    align_down(value, PAGE_SIZE)
}

/// Rounds `value` up to a page boundary, or `None` on overflow.
#[inline]
#[must_use]
pub const fn page_round_up(value: u64) -> Option<u64> {
    align_up(value, PAGE_SIZE)
}

/// Align `x` up to the next multiple of `align`, or `None` on overflow.
///
/// `align` must be a power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0x1001, 0x1000), Some(0x2000));
/// assert_eq!(align_up(0x2000, 0x1000), Some(0x2000));
/// assert_eq!(align_up(u64::MAX, 0x1000), None);
/// ```
#[inline]
#[must_use]
pub const fn align_up(x: u64, align: u64) -> Option<u64> {
    debug_assert!(align.is_power_of_two());
    match x.checked_add(align - 1) {
        Some(v) => Some(v & !(align - 1)),
        None => None,
    }
}

/// Align `x` down to a multiple of `align`.
///
/// `align` must be a power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0x1fff, 0x1000), 0x1000);
/// ```
#[inline]
#[must_use]
pub const fn align_down(x: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    x & !(align - 1)
}
