//! # Kernel Memory Management
//!
//! Physical page allocation and per-process virtual address spaces.
//!
//! ## Layers
//!
//! ```text
//!   Space ───────────── one per process: page directory + RegionTree
//!     │ Arc<Region>
//!   Region ──────────── page-aligned virtual range, access rights, flags
//!     │ Arc<VmObject>
//!   VmObject ────────── page slots (anonymous, inode, MMIO), COW and dirty bits
//!     │ PhysicalPageRef
//!   PhysicalMemoryManager ── buddy PhysicalZones behind one SpinLock
//! ```
//!
//! Frames are reference counted through [`PhysicalPageRef`]; the last
//! reference returns the frame to the zone it came from. The page tables
//! themselves are not managed here: a [`PageDirectory`] implementation per
//! architecture installs whatever the Regions ask for, and a [`PhysMapper`]
//! lets the allocator reach frame contents to zero them.
//!
//! ## Lock order
//!
//! `Space` → `VmObject` → registry / physical memory manager. No
//! [`PhysicalPageRef`] may be dropped while the physical memory manager's
//! lock is held.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::cast_possible_truncation)]

extern crate alloc;
#[cfg(feature = "test-support")]
extern crate std;

mod access;
mod bitmap;
mod error;
mod frame_alloc;
mod page_directory;
mod phys_mapper;
mod physical_page;
mod pmm;
pub mod region;
pub mod region_tree;
pub mod registry;
pub mod space;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod vmobject;
pub mod zone;

pub use crate::access::{Access, RegionFlags};
pub use crate::bitmap::Bitmap;
pub use crate::error::MmError;
pub use crate::frame_alloc::{CommittedPages, FrameAlloc, ShouldZeroFill};
pub use crate::page_directory::{Mapping, PageDirectory};
pub use crate::phys_mapper::{HhdmPhysMapper, PhysMapper};
pub use crate::physical_page::{FrameDeallocator, PhysicalPage, PhysicalPageRef};
pub use crate::pmm::{PhysicalMemoryManager, PhysicalMemoryStats};
pub use crate::region::{Region, RegionId};
pub use crate::region_tree::RegionTree;
pub use crate::space::{Space, SpaceOptions};
pub use crate::vmobject::{AllocationStrategy, InodeId, VmObject, VmObjectId, VmObjectKind};
pub use crate::zone::{MAX_ORDER, PhysicalZone};
pub use kernel_info::memory as info;
