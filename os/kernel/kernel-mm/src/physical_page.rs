//! Reference-counted physical frame handles.

use alloc::sync::Arc;
use core::fmt;
use kernel_memory_addresses::PhysicalAddress;

/// Takes frames back once the last [`PhysicalPageRef`] to them is gone.
pub trait FrameDeallocator: Send + Sync {
    fn deallocate_frame(&self, address: PhysicalAddress);
}

/// One physical frame.
///
/// Managed frames return themselves to their [`FrameDeallocator`] on drop.
/// Unmanaged frames (MMIO) just go away.
pub struct PhysicalPage {
    address: PhysicalAddress,
    owner: Option<Arc<dyn FrameDeallocator>>,
}

/// Shared handle to a [`PhysicalPage`]; the strong count is the frame's
/// reference count.
pub type PhysicalPageRef = Arc<PhysicalPage>;

impl PhysicalPage {
    #[must_use]
    pub fn new(address: PhysicalAddress, owner: Arc<dyn FrameDeallocator>) -> PhysicalPageRef {
        debug_assert!(address.is_page_aligned());
        Arc::new(Self {
            address,
            owner: Some(owner),
        })
    }

    /// A frame nobody allocated, e.g. device memory.
    #[must_use]
    pub fn new_unmanaged(address: PhysicalAddress) -> PhysicalPageRef {
        debug_assert!(address.is_page_aligned());
        Arc::new(Self {
            address,
            owner: None,
        })
    }

    #[inline]
    #[must_use]
    pub const fn address(&self) -> PhysicalAddress {
        self.address
    }

    #[inline]
    #[must_use]
    pub const fn is_managed(&self) -> bool {
        self.owner.is_some()
    }

    /// Whether more than one holder references the frame.
    #[inline]
    #[must_use]
    pub fn is_shared(this: &PhysicalPageRef) -> bool {
        Arc::strong_count(this) > 1
    }
}

impl Drop for PhysicalPage {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.take() {
            owner.deallocate_frame(self.address);
        }
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalPage")
            .field("address", &self.address)
            .field("managed", &self.is_managed())
            .finish()
    }
}
