//! # Frame allocation contract
//!
//! Memory objects do not talk to buddy zones directly. They go through
//! [`FrameAlloc`], which the physical memory manager implements and tests can
//! substitute.
//!
//! Besides plain allocation the contract supports *commitment*: reserving
//! frames up front so that a later allocation cannot fail. A reservation is
//! held as a [`CommittedPages`] value and released when that value drops.

use crate::error::MmError;
use crate::physical_page::PhysicalPageRef;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

/// Whether a newly allocated frame must be cleared before use.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ShouldZeroFill {
    No,
    Yes,
}

/// Page-allocation collaborator of memory objects.
pub trait FrameAlloc: Send + Sync {
    /// Allocates one frame that is not covered by any commitment.
    fn allocate_page(&self, fill: ShouldZeroFill) -> Option<PhysicalPageRef>;

    /// Allocates `page_count` physically contiguous frames.
    fn allocate_contiguous_pages(&self, page_count: usize, fill: ShouldZeroFill) -> Option<Vec<PhysicalPageRef>>;

    /// Reserves `page_count` frames for later [`allocate_committed_page`](Self::allocate_committed_page) calls.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if not enough uncommitted frames remain.
    fn commit(&self, page_count: usize) -> Result<(), MmError>;

    /// Releases a reservation of `page_count` frames.
    fn uncommit(&self, page_count: usize);

    /// Allocates one frame out of an earlier commitment. Cannot fail.
    fn allocate_committed_page(&self, fill: ShouldZeroFill) -> PhysicalPageRef;
}

/// An outstanding commitment of frames.
pub struct CommittedPages {
    allocator: Arc<dyn FrameAlloc>,
    remaining: usize,
}

impl CommittedPages {
    /// Reserves `page_count` frames from `allocator`.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if the reservation cannot be made.
    pub fn try_commit(allocator: &Arc<dyn FrameAlloc>, page_count: usize) -> Result<Self, MmError> {
        allocator.commit(page_count)?;
        Ok(Self {
            allocator: Arc::clone(allocator),
            remaining: page_count,
        })
    }

    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.remaining
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    /// Takes one frame out of the reservation.
    ///
    /// # Panics
    /// Panics if the reservation is used up.
    pub fn take_one(&mut self, fill: ShouldZeroFill) -> PhysicalPageRef {
        assert!(self.remaining > 0, "commitment exhausted");
        self.remaining -= 1;
        self.allocator.allocate_committed_page(fill)
    }

    /// Takes over the frames reserved by `other`.
    pub fn absorb(&mut self, mut other: Self) {
        self.remaining += core::mem::take(&mut other.remaining);
    }

    /// Gives back one reserved frame without allocating it.
    pub fn uncommit_one(&mut self) {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.allocator.uncommit(1);
        }
    }
}

impl Drop for CommittedPages {
    fn drop(&mut self) {
        if self.remaining > 0 {
            self.allocator.uncommit(self.remaining);
        }
    }
}

impl fmt::Debug for CommittedPages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommittedPages")
            .field("remaining", &self.remaining)
            .finish_non_exhaustive()
    }
}
