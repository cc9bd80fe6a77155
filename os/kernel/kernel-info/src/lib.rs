//! # Kernel Memory Configuration
//!
//! Compile-time constants shared by the memory-management crates: the
//! virtual address-space layout and the tunables of the physical buddy zones.
//!
//! ## Virtual Memory Layout
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │   Null guard (never mapped)     │
//! USERSPACE_RANGE_BASE  ├─────────────────────────────────┤ 0x0000_0000_0001_0000
//!                       │                                 │
//!                       │         User Space              │
//!                       │   (one Space per process)       │
//!                       │                                 │
//! USERSPACE_RANGE_CEILING├────────────────────────────────┤ 0x0000_7fff_ffff_0000
//!                       │   Non-canonical hole            │
//! HHDM_BASE             ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Higher Half Direct Mapping    │
//! KERNEL_BASE           ├─────────────────────────────────┤ 0xffff_ffff_8000_0000
//!                       │       Kernel Text & Data        │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Physical Zones
//!
//! Physical memory is handed out by buddy zones. A zone tracks memory in
//! *chunks* of half a page; a block of order `k` spans `2^k` pages. The largest
//! block ([`memory::ZONE_MAX_ORDER`]) bounds both the largest physically
//! contiguous allocation and the size of a single zone.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod memory;
