//! # Memory Layout

use kernel_memory_addresses::PAGE_SIZE as BASE_PAGE_SIZE;

/// Size of a base page in bytes.
pub const PAGE_SIZE: u64 = BASE_PAGE_SIZE;

/// Size of a buddy-zone chunk, the zone's bookkeeping unit.
pub const ZONE_CHUNK_SIZE: u64 = PAGE_SIZE / 2;

/// Highest buddy order. An order-`k` block spans `2^k` pages.
pub const ZONE_MAX_ORDER: usize = 12;

/// Pages in the largest buddy block; also the largest zone.
pub const ZONE_MAX_PAGES: usize = 1 << ZONE_MAX_ORDER;

/// First usable userspace address; everything below stays unmapped to catch
/// null-pointer dereferences.
pub const USERSPACE_RANGE_BASE: u64 = 0x0000_0000_0001_0000;

/// One past the last address a userspace region may occupy.
pub const USERSPACE_RANGE_CEILING: u64 = 0x0000_7fff_ffff_0000;

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Where the kernel executes (VMA).
pub const KERNEL_BASE: u64 = 0xffff_ffff_8000_0000;

const _: () = {
    assert!(PAGE_SIZE.is_power_of_two());
    assert!(ZONE_CHUNK_SIZE * 2 == PAGE_SIZE);
    // Chunk indices of a full zone must fit the zone's 32-bit links.
    assert!((ZONE_MAX_PAGES as u64) * 2 < u32::MAX as u64);
    assert!(USERSPACE_RANGE_BASE.is_multiple_of(PAGE_SIZE));
    assert!(USERSPACE_RANGE_CEILING.is_multiple_of(PAGE_SIZE));
    assert!(USERSPACE_RANGE_BASE < USERSPACE_RANGE_CEILING);
    assert!(HHDM_BASE > USERSPACE_RANGE_CEILING);
    assert!(KERNEL_BASE > HHDM_BASE);
};
