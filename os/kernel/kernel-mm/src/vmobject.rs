//! # Virtual Memory Objects
//!
//! A [`VmObject`] owns a fixed-length array of physical page slots and knows
//! every [`Region`] that maps it. It is independent of any one address space:
//! a shared object may be mapped by Regions in many Spaces at once.
//!
//! ```text
//!   Space A                 Space B
//!  ┌────────┐              ┌────────┐
//!  │ Region │──┐        ┌──│ Region │
//!  └────────┘  │ Arc    │  └────────┘
//!              ▼        ▼
//!          ┌──────────────────┐   Weak   ┌──────────┐
//!          │     VmObject     │◀─────────│ registry │
//!          │ [pg][pg][--][pg] │          └──────────┘
//!          └──────────────────┘
//!               │ regions: Weak<Region> back-references
//! ```
//!
//! ## Locking
//!
//! The page array and the back-reference set live behind a
//! [`RecursiveSpinLock`]. Changing a page slot re-installs that page in every
//! registered Region before the lock is released, so no Space can keep a
//! stale translation. Callbacks run with the lock held and may call back into
//! the same object from the same thread.
//!
//! ## Construction
//!
//! Constructors either return a fully built object or nothing. Frames obtained
//! before a failure are released when the partially filled array drops, and
//! the object is entered into the global registry only once it is complete.

use crate::bitmap::Bitmap;
use crate::error::MmError;
use crate::frame_alloc::{CommittedPages, FrameAlloc, ShouldZeroFill};
use crate::physical_page::{PhysicalPage, PhysicalPageRef};
use crate::region::{Region, RegionId};
use crate::registry;
use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use core::ops::Range;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalAddress, page_round_up};
use kernel_sync::RecursiveSpinLock;
use log::warn;

/// Unique identity of a [`VmObject`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VmObjectId(u64);

impl VmObjectId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VmObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vmobject#{}", self.0)
    }
}

/// Identity of the file backing an inode object.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InodeId {
    pub filesystem: u32,
    pub index: u64,
}

/// How anonymous memory is backed at creation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// Reserve every frame now, allocate on first use.
    Reserve,
    /// Allocate and zero every frame now.
    AllocateNow,
    /// Neither reserve nor allocate; first use may fail.
    None,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VmObjectKind {
    /// Zero-filled memory with copy-on-write cloning.
    Anonymous { purgeable: bool },
    /// File contents shared by every mapping.
    SharedInode(InodeId),
    /// File contents, privately modifiable per mapping.
    PrivateInode(InodeId),
    /// Device memory at a fixed physical address.
    Mmio(PhysicalAddress),
}

struct VmObjectState {
    physical_pages: Vec<Option<PhysicalPageRef>>,
    regions: BTreeMap<RegionId, Weak<Region>>,
    /// Anonymous objects: frame shared with a clone, to be copied on write.
    cow: Bitmap,
    /// Inode objects: page modified since it was read in.
    dirty: Bitmap,
    /// Frames reserved for slots that are still empty.
    committed: Option<CommittedPages>,
}

/// Reference-counted owner of a span of physical pages.
pub struct VmObject {
    id: VmObjectId,
    kind: VmObjectKind,
    allocator: Option<Arc<dyn FrameAlloc>>,
    volatile: AtomicBool,
    was_purged: AtomicBool,
    state: RecursiveSpinLock<RefCell<VmObjectState>>,
}

fn page_count_for(size: u64) -> Result<usize, MmError> {
    let size = page_round_up(size).ok_or(MmError::Overflow)?;
    usize::try_from(size / PAGE_SIZE).map_err(|_| MmError::Overflow)
}

impl VmObject {
    /// `page_count` empty page slots.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if the slot array cannot be allocated.
    pub fn create_physical_pages(page_count: usize) -> Result<Vec<Option<PhysicalPageRef>>, MmError> {
        let mut pages = Vec::new();
        pages
            .try_reserve_exact(page_count)
            .map_err(|_| MmError::OutOfMemory)?;
        pages.resize_with(page_count, || None);
        Ok(pages)
    }

    /// Anonymous zero-filled memory of `size` bytes (rounded up to pages).
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if the slots, the reservation or the frames
    /// cannot be obtained; [`MmError::Overflow`] for absurd sizes.
    pub fn try_create_anonymous(
        allocator: &Arc<dyn FrameAlloc>,
        size: u64,
        strategy: AllocationStrategy,
    ) -> Result<Arc<Self>, MmError> {
        Self::try_create_anonymous_impl(allocator, size, strategy, false)
    }

    /// Like [`try_create_anonymous`](Self::try_create_anonymous), but the
    /// contents may be discarded while marked volatile.
    ///
    /// # Errors
    /// See [`try_create_anonymous`](Self::try_create_anonymous).
    pub fn try_create_purgeable_anonymous(
        allocator: &Arc<dyn FrameAlloc>,
        size: u64,
        strategy: AllocationStrategy,
    ) -> Result<Arc<Self>, MmError> {
        Self::try_create_anonymous_impl(allocator, size, strategy, true)
    }

    fn try_create_anonymous_impl(
        allocator: &Arc<dyn FrameAlloc>,
        size: u64,
        strategy: AllocationStrategy,
        purgeable: bool,
    ) -> Result<Arc<Self>, MmError> {
        let page_count = page_count_for(size)?;
        let mut pages = Self::create_physical_pages(page_count)?;
        let committed = match strategy {
            AllocationStrategy::None => None,
            AllocationStrategy::Reserve => Some(CommittedPages::try_commit(allocator, page_count)?),
            AllocationStrategy::AllocateNow => {
                let mut commitment = CommittedPages::try_commit(allocator, page_count)?;
                for slot in &mut pages {
                    *slot = Some(commitment.take_one(ShouldZeroFill::Yes));
                }
                None
            }
        };
        Ok(Self::publish(
            VmObjectKind::Anonymous { purgeable },
            Some(Arc::clone(allocator)),
            pages,
            committed,
            None,
        ))
    }

    /// Anonymous memory over physically contiguous, zeroed frames.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if no contiguous run of that size is free.
    pub fn try_create_physically_contiguous(allocator: &Arc<dyn FrameAlloc>, size: u64) -> Result<Arc<Self>, MmError> {
        let page_count = page_count_for(size)?;
        let mut pages = Self::create_physical_pages(page_count)?;
        let frames = allocator
            .allocate_contiguous_pages(page_count, ShouldZeroFill::Yes)
            .ok_or(MmError::OutOfMemory)?;
        for (slot, frame) in pages.iter_mut().zip(frames) {
            *slot = Some(frame);
        }
        Ok(Self::publish(
            VmObjectKind::Anonymous { purgeable: false },
            Some(Arc::clone(allocator)),
            pages,
            None,
            None,
        ))
    }

    /// Anonymous memory over frames the caller already owns.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if the slot array cannot be allocated.
    pub fn try_create_with_physical_pages(frames: &[PhysicalPageRef]) -> Result<Arc<Self>, MmError> {
        let mut pages = Self::create_physical_pages(frames.len())?;
        for (slot, frame) in pages.iter_mut().zip(frames) {
            *slot = Some(Arc::clone(frame));
        }
        Ok(Self::publish(
            VmObjectKind::Anonymous { purgeable: false },
            None,
            pages,
            None,
            None,
        ))
    }

    /// An object for `inode` whose pages every mapping shares.
    ///
    /// Slots start empty; the filesystem fills them through
    /// [`set_physical_page`](Self::set_physical_page).
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if the slot array cannot be allocated.
    pub fn try_create_shared_inode(inode: InodeId, size: u64) -> Result<Arc<Self>, MmError> {
        let pages = Self::create_physical_pages(page_count_for(size)?)?;
        Ok(Self::publish(VmObjectKind::SharedInode(inode), None, pages, None, None))
    }

    /// An object for `inode` that each mapping may modify privately.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if the slot array cannot be allocated.
    pub fn try_create_private_inode(inode: InodeId, size: u64) -> Result<Arc<Self>, MmError> {
        let pages = Self::create_physical_pages(page_count_for(size)?)?;
        Ok(Self::publish(VmObjectKind::PrivateInode(inode), None, pages, None, None))
    }

    /// Device memory at `base`; the frames are never returned to an allocator.
    ///
    /// # Errors
    /// [`MmError::Overflow`] if the range wraps, [`MmError::OutOfMemory`] if
    /// the slot array cannot be allocated.
    pub fn try_create_mmio(base: PhysicalAddress, size: u64) -> Result<Arc<Self>, MmError> {
        debug_assert!(base.is_page_aligned());
        let page_count = page_count_for(size)?;
        base.checked_add(page_count as u64 * PAGE_SIZE)
            .ok_or(MmError::Overflow)?;
        let mut pages = Self::create_physical_pages(page_count)?;
        for (i, slot) in pages.iter_mut().enumerate() {
            *slot = Some(PhysicalPage::new_unmanaged(base + i as u64 * PAGE_SIZE));
        }
        Ok(Self::publish(VmObjectKind::Mmio(base), None, pages, None, None))
    }

    /// Wraps fully built state and enters it into the registry.
    fn publish(
        kind: VmObjectKind,
        allocator: Option<Arc<dyn FrameAlloc>>,
        physical_pages: Vec<Option<PhysicalPageRef>>,
        committed: Option<CommittedPages>,
        page_bits: Option<(Bitmap, Bitmap)>,
    ) -> Arc<Self> {
        let page_count = physical_pages.len();
        let (cow, dirty) = page_bits.unwrap_or_else(|| (Bitmap::new(page_count), Bitmap::new(page_count)));
        let object = Arc::new(Self {
            id: VmObjectId::next(),
            kind,
            allocator,
            volatile: AtomicBool::new(false),
            was_purged: AtomicBool::new(false),
            state: RecursiveSpinLock::new(RefCell::new(VmObjectState {
                physical_pages,
                regions: BTreeMap::new(),
                cow,
                dirty,
                committed,
            })),
        });
        registry::register(&object);
        object
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> VmObjectId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn kind(&self) -> VmObjectKind {
        self.kind
    }

    #[must_use]
    pub fn page_count(&self) -> usize {
        self.state.lock().borrow().physical_pages.len()
    }

    /// Size in bytes.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.page_count() as u64 * PAGE_SIZE
    }

    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self.kind, VmObjectKind::Anonymous { .. })
    }

    #[must_use]
    pub const fn is_inode(&self) -> bool {
        matches!(self.kind, VmObjectKind::SharedInode(_) | VmObjectKind::PrivateInode(_))
    }

    #[must_use]
    pub const fn is_shared_inode(&self) -> bool {
        matches!(self.kind, VmObjectKind::SharedInode(_))
    }

    #[must_use]
    pub const fn is_private_inode(&self) -> bool {
        matches!(self.kind, VmObjectKind::PrivateInode(_))
    }

    #[must_use]
    pub const fn is_mmio(&self) -> bool {
        matches!(self.kind, VmObjectKind::Mmio(_))
    }

    #[must_use]
    pub const fn is_purgeable(&self) -> bool {
        matches!(self.kind, VmObjectKind::Anonymous { purgeable: true })
    }

    #[must_use]
    pub fn is_volatile(&self) -> bool {
        self.volatile.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn was_purged(&self) -> bool {
        self.was_purged.load(Ordering::Acquire)
    }

    /// A new slot array referencing the same frames.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if the slot array cannot be allocated.
    pub fn clone_physical_pages(&self) -> Result<Vec<Option<PhysicalPageRef>>, MmError> {
        let guard = self.state.lock();
        let state = guard.borrow();
        let mut pages = Self::create_physical_pages(state.physical_pages.len())?;
        pages.clone_from_slice(&state.physical_pages);
        Ok(pages)
    }

    /// A copy of this object for a forked address space.
    ///
    /// Anonymous objects are cloned copy-on-write: both objects keep
    /// referencing the same frames and mark them for copying, and every Region
    /// of this object is remapped so the shared frames lose write access.
    /// Inode objects are cloned with their page array (and dirty state).
    ///
    /// # Errors
    /// [`MmError::NotSupported`] for MMIO objects, [`MmError::OutOfMemory`] if
    /// the clone or its reservation cannot be made.
    pub fn try_clone(&self) -> Result<Arc<Self>, MmError> {
        match self.kind {
            VmObjectKind::Mmio(_) => Err(MmError::NotSupported),
            VmObjectKind::Anonymous { .. } => self.try_clone_anonymous(),
            VmObjectKind::SharedInode(_) => {
                let pages = self.clone_physical_pages()?;
                Ok(Self::publish(self.kind, None, pages, None, None))
            }
            VmObjectKind::PrivateInode(_) => {
                let guard = self.state.lock();
                let pages = self.clone_physical_pages()?;
                let dirty = guard.borrow().dirty.clone();
                let cow = Bitmap::new(pages.len());
                Ok(Self::publish(self.kind, None, pages, None, Some((cow, dirty))))
            }
        }
    }

    fn try_clone_anonymous(&self) -> Result<Arc<Self>, MmError> {
        let guard = self.state.lock();
        let pages = self.clone_physical_pages()?;

        // Empty slots of the source are still backed by its reservation; the
        // clone needs one of its own for them.
        let reserved = guard
            .borrow()
            .committed
            .as_ref()
            .map_or(0, CommittedPages::remaining);
        let committed = match (&self.allocator, reserved) {
            (Some(allocator), n) if n > 0 => Some(CommittedPages::try_commit(allocator, n)?),
            _ => None,
        };

        let page_count = pages.len();
        let mut cow = Bitmap::new(page_count);
        {
            let mut state = guard.borrow_mut();
            let VmObjectState {
                physical_pages,
                cow: source_cow,
                ..
            } = &mut *state;
            for (index, page) in physical_pages.iter().enumerate() {
                if page.is_some() {
                    source_cow.set(index, true);
                    cow.set(index, true);
                }
            }
        }

        let clone = Self::publish(
            self.kind,
            self.allocator.clone(),
            pages,
            committed,
            Some((cow, Bitmap::new(page_count))),
        );
        clone.volatile.store(self.is_volatile(), Ordering::Release);

        self.for_each_region(|region| {
            if let Err(error) = region.remap() {
                warn!("{}: remapping {} read-only failed: {error}", self.id, region.range());
            }
        });
        Ok(clone)
    }

    /// Registers `region` as mapping this object.
    pub fn add_region(&self, region: &Arc<Region>) {
        let guard = self.state.lock();
        guard
            .borrow_mut()
            .regions
            .insert(region.id(), Arc::downgrade(region));
    }

    /// Unregisters `region`.
    ///
    /// # Panics
    /// Panics if `region` was not registered.
    pub fn remove_region(&self, region: &Region) {
        let guard = self.state.lock();
        let removed = guard.borrow_mut().regions.remove(&region.id());
        assert!(
            removed.is_some(),
            "{} does not map {}",
            region.id(),
            self.id
        );
    }

    #[must_use]
    pub fn region_count(&self) -> usize {
        self.state.lock().borrow().regions.len()
    }

    /// Invokes `callback` for every live Region mapping this object.
    ///
    /// The object's lock stays held for the whole iteration, so no Region can
    /// be added or removed concurrently. The callback may re-enter this
    /// object from the same thread, but must not lock other objects in an
    /// order that could cycle back here.
    pub fn for_each_region(&self, mut callback: impl FnMut(&Arc<Region>)) {
        let guard = self.state.lock();
        let regions: Vec<Arc<Region>> = guard
            .borrow()
            .regions
            .values()
            .filter_map(Weak::upgrade)
            .collect();
        for region in &regions {
            callback(region);
        }
    }

    /// The frame in slot `index`, if backed.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    #[must_use]
    pub fn physical_page(&self, index: usize) -> Option<PhysicalPageRef> {
        let guard = self.state.lock();
        let state = guard.borrow();
        Self::check_index(&state, index);
        state.physical_pages[index].clone()
    }

    /// Replaces slot `index` and re-installs it in every mapping Region.
    ///
    /// The previous frame is released only after no Region maps it anymore.
    ///
    /// # Errors
    /// The first error a Region's page directory reported; the slot is
    /// updated regardless.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn set_physical_page(&self, index: usize, page: Option<PhysicalPageRef>) -> Result<(), MmError> {
        let guard = self.state.lock();
        let previous = {
            let mut state = guard.borrow_mut();
            Self::check_index(&state, index);
            state.cow.set(index, false);
            core::mem::replace(&mut state.physical_pages[index], page)
        };
        let result = self.remap_page_in_regions(index);
        drop(guard);
        drop(previous);
        result
    }

    /// Backs slot `index` of an anonymous object, allocating a zeroed frame
    /// from the object's reservation or its allocator if it is empty.
    ///
    /// # Errors
    /// [`MmError::NotSupported`] for objects that cannot allocate their own
    /// frames, [`MmError::OutOfMemory`] if no frame is available.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn ensure_physical_page(&self, index: usize) -> Result<PhysicalPageRef, MmError> {
        let guard = self.state.lock();
        if let Some(page) = self.physical_page(index) {
            return Ok(page);
        }
        if !self.is_anonymous() {
            return Err(MmError::NotSupported);
        }

        let page = {
            let mut state = guard.borrow_mut();
            match state.committed.as_mut().filter(|c| !c.is_empty()) {
                Some(commitment) => commitment.take_one(ShouldZeroFill::Yes),
                None => self
                    .allocator
                    .as_ref()
                    .ok_or(MmError::NotSupported)?
                    .allocate_page(ShouldZeroFill::Yes)
                    .ok_or(MmError::OutOfMemory)?,
            }
        };
        guard.borrow_mut().physical_pages[index] = Some(Arc::clone(&page));
        self.remap_page_in_regions(index)?;
        Ok(page)
    }

    fn remap_page_in_regions(&self, index: usize) -> Result<(), MmError> {
        let mut result = Ok(());
        self.for_each_region(|region| {
            if let Err(error) = region.remap_vmobject_page(index) {
                result = result.and(Err(error));
            }
        });
        result
    }

    /// Whether a private mapping must treat slot `index` as copy-on-write.
    #[must_use]
    pub fn should_cow(&self, index: usize, shared_mapping: bool) -> bool {
        if shared_mapping || !self.is_anonymous() {
            return false;
        }
        self.state.lock().borrow().cow.get(index)
    }

    /// Runs `f` on the slots in `window` and their copy-on-write state, with
    /// the object locked so no slot changes underneath.
    pub(crate) fn with_page_window<R>(
        &self,
        window: Range<usize>,
        shared_mapping: bool,
        f: impl FnOnce(&[Option<PhysicalPageRef>], &[bool]) -> R,
    ) -> R {
        let guard = self.state.lock();
        let cow_applies = !shared_mapping && self.is_anonymous();
        let (pages, cow): (Vec<_>, Vec<_>) = {
            let state = guard.borrow();
            window
                .map(|index| {
                    (
                        state.physical_pages[index].clone(),
                        cow_applies && state.cow.get(index),
                    )
                })
                .unzip()
        };
        f(&pages, &cow)
    }

    /// Marks the contents of a purgeable object as discardable (or not).
    ///
    /// Making an object volatile releases its reservation. Making it
    /// non-volatile again reserves frames for every empty slot. Returns
    /// whether the contents were purged while volatile.
    ///
    /// # Errors
    /// [`MmError::NotSupported`] for non-purgeable objects;
    /// [`MmError::OutOfMemory`] if the reservation fails, in which case the
    /// object stays volatile.
    pub fn set_volatile(&self, volatile: bool) -> Result<bool, MmError> {
        if !self.is_purgeable() {
            return Err(MmError::NotSupported);
        }
        let guard = self.state.lock();
        if volatile {
            guard.borrow_mut().committed = None;
            self.volatile.store(true, Ordering::Release);
            return Ok(self.was_purged());
        }

        let (missing, reserved) = {
            let state = guard.borrow();
            let missing = state.physical_pages.iter().filter(|p| p.is_none()).count();
            (missing, state.committed.as_ref().map_or(0, CommittedPages::remaining))
        };
        if missing > reserved {
            let allocator = self.allocator.as_ref().ok_or(MmError::NotSupported)?;
            let extra = CommittedPages::try_commit(allocator, missing - reserved)?;
            let mut state = guard.borrow_mut();
            match state.committed.as_mut() {
                Some(commitment) => commitment.absorb(extra),
                None => state.committed = Some(extra),
            }
        }
        self.volatile.store(false, Ordering::Release);
        Ok(self.was_purged.swap(false, Ordering::AcqRel))
    }

    /// Drops every frame of a volatile purgeable object and unmaps them.
    ///
    /// Returns the number of frames released.
    pub fn purge(&self) -> usize {
        if !self.is_purgeable() {
            return 0;
        }
        // `set_volatile` flips the flag under this lock.
        let guard = self.state.lock();
        if !self.is_volatile() {
            return 0;
        }
        let purged: Vec<PhysicalPageRef> = {
            let mut state = guard.borrow_mut();
            let VmObjectState {
                physical_pages, cow, ..
            } = &mut *state;
            physical_pages
                .iter_mut()
                .enumerate()
                .filter_map(|(index, slot)| {
                    cow.set(index, false);
                    slot.take()
                })
                .collect()
        };
        if purged.is_empty() {
            return 0;
        }
        self.was_purged.store(true, Ordering::Release);
        self.for_each_region(|region| {
            if let Err(error) = region.remap() {
                warn!("{}: unmapping purged pages of {} failed: {error}", self.id, region.range());
            }
        });
        drop(guard);
        purged.len()
    }

    /// Marks slot `index` of an inode object as modified (or clean).
    ///
    /// # Errors
    /// [`MmError::NotSupported`] for objects without a backing inode.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn set_page_dirty(&self, index: usize, dirty: bool) -> Result<(), MmError> {
        if !self.is_inode() {
            return Err(MmError::NotSupported);
        }
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        Self::check_index(&state, index);
        state.dirty.set(index, dirty);
        Ok(())
    }

    #[must_use]
    pub fn is_page_dirty(&self, index: usize) -> bool {
        self.is_inode() && self.state.lock().borrow().dirty.get(index)
    }

    /// Backed slots in `window`.
    #[must_use]
    pub fn resident_pages_in(&self, window: Range<usize>) -> usize {
        self.count_pages_in(window, |_, _| true)
    }

    /// Backed slots in `window` whose frame is referenced from elsewhere too.
    #[must_use]
    pub fn shared_pages_in(&self, window: Range<usize>) -> usize {
        self.count_pages_in(window, |page, _| PhysicalPage::is_shared(page))
    }

    /// Backed, modified slots of an inode object in `window`.
    #[must_use]
    pub fn dirty_pages_in(&self, window: Range<usize>) -> usize {
        if !self.is_inode() {
            return 0;
        }
        self.count_pages_in(window, |_, dirty| dirty)
    }

    /// Backed, unmodified slots of an inode object.
    #[must_use]
    pub fn clean_pages(&self) -> usize {
        if !self.is_inode() {
            return 0;
        }
        self.count_pages_in(0..self.page_count(), |_, dirty| !dirty)
    }

    /// Bytes of modified inode pages.
    #[must_use]
    pub fn amount_dirty(&self) -> u64 {
        self.dirty_pages_in(0..self.page_count()) as u64 * PAGE_SIZE
    }

    /// Bytes of resident, unmodified inode pages.
    #[must_use]
    pub fn amount_clean(&self) -> u64 {
        self.clean_pages() as u64 * PAGE_SIZE
    }

    /// Backed slots of the whole object.
    #[must_use]
    pub fn resident_pages(&self) -> usize {
        self.resident_pages_in(0..self.page_count())
    }

    fn count_pages_in(&self, window: Range<usize>, filter: impl Fn(&PhysicalPageRef, bool) -> bool) -> usize {
        let guard = self.state.lock();
        let state = guard.borrow();
        window
            .filter(|&index| {
                state.physical_pages[index]
                    .as_ref()
                    .is_some_and(|page| filter(page, state.dirty.get(index)))
            })
            .count()
    }

    fn check_index(state: &VmObjectState, index: usize) {
        assert!(
            index < state.physical_pages.len(),
            "page index {index} out of bounds ({} pages)",
            state.physical_pages.len()
        );
    }
}

impl Drop for VmObject {
    fn drop(&mut self) {
        registry::unregister(self.id);
    }
}

impl fmt::Debug for VmObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmObject")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("page_count", &self.page_count())
            .finish_non_exhaustive()
    }
}
