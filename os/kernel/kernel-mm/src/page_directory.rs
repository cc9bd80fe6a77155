//! # Page directory contract
//!
//! The architecture's translation-table root. The memory-management core
//! never looks at page-table entries; it only asks a [`PageDirectory`] to
//! install or remove translations for whole page runs.
//!
//! Calls arrive with the owning Space's lock held (and, when propagating a
//! page change, the VMObject's lock too). Implementations must not call back
//! into either.

use crate::access::Access;
use crate::error::MmError;
use crate::physical_page::PhysicalPageRef;
use alloc::sync::Arc;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress, VirtualRange};

/// An installed translation of one page.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub physical: PhysicalAddress,
    pub access: Access,
}

pub trait PageDirectory: Send + Sync {
    /// Installs `pages` at `range`, one slot per page.
    ///
    /// Empty slots are installed as not-present, replacing any previous
    /// translation.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if intermediate tables cannot be allocated.
    fn install(&self, range: VirtualRange, pages: &[Option<PhysicalPageRef>], access: Access) -> Result<(), MmError>;

    /// Removes every translation inside `range` and flushes it from the TLBs.
    fn remove(&self, range: VirtualRange);

    /// Creates a new, empty root that shares this root's kernel mappings.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if the new root cannot be allocated.
    fn try_clone(&self) -> Result<Arc<dyn PageDirectory>, MmError>;

    /// The translation currently installed for `address`, if any.
    fn query(&self, address: VirtualAddress) -> Option<Mapping>;
}
