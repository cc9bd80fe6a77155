//! # Address spaces
//!
//! A [`Space`] is one process's view of memory: a page directory plus an
//! ordered, non-overlapping set of [`Region`]s inside a fixed total range.
//!
//! ```text
//!  total_range
//!  ├──────┬───────────┬──────────────┬─────────┬────────────────┤
//!  │ free │  Region   │     free     │ Region  │      free      │
//!  ├──────┴───────────┴──────────────┴─────────┴────────────────┤
//!           │                              │
//!           ▼                              ▼
//!       VmObject                       VmObject
//! ```
//!
//! Every mutating operation runs under the Space's lock, including the page
//! directory calls it makes. The lock is re-entrant, so operations compose
//! (e.g. [`Space::unmap_range`] calls [`Space::split_region_around_range`])
//! without releasing it in between.
//!
//! A small lookup cache remembers the last Region found by exact range. It
//! holds the Region weakly and is cleared whenever a Region leaves the tree,
//! so it can never resurrect or return a stale entry.

use crate::access::Access;
use crate::error::MmError;
use crate::frame_alloc::FrameAlloc;
use crate::page_directory::PageDirectory;
use crate::region::Region;
use crate::region_tree::RegionTree;
use crate::vmobject::{AllocationStrategy, VmObject, VmObjectId};
use alloc::collections::BTreeSet;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use kernel_info::memory::{PAGE_SIZE, USERSPACE_RANGE_BASE, USERSPACE_RANGE_CEILING};
use kernel_memory_addresses::{VirtualAddress, VirtualRange, page_round_up};
use kernel_sync::RecursiveSpinLock;
use log::{debug, trace, warn};

/// Construction parameters of a [`Space`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SpaceOptions {
    /// Span all Regions must lie in.
    pub total_range: VirtualRange,
    /// Whether system calls are only accepted from syscall Regions.
    pub enforces_syscall_regions: bool,
    /// Whether [`Space::find_region_from_range`] remembers its last hit.
    pub region_lookup_cache_enabled: bool,
}

impl Default for SpaceOptions {
    fn default() -> Self {
        Self {
            total_range: VirtualRange::new(
                VirtualAddress::new(USERSPACE_RANGE_BASE),
                USERSPACE_RANGE_CEILING - USERSPACE_RANGE_BASE,
            ),
            enforces_syscall_regions: false,
            region_lookup_cache_enabled: true,
        }
    }
}

#[derive(Default)]
struct LookupCache {
    range: Option<VirtualRange>,
    region: Weak<Region>,
}

struct SpaceState {
    regions: RegionTree,
    cache: LookupCache,
    enforces_syscall_regions: bool,
}

pub struct Space {
    page_directory: Arc<dyn PageDirectory>,
    region_lookup_cache_enabled: bool,
    state: RecursiveSpinLock<RefCell<SpaceState>>,
}

impl Space {
    /// Creates a Space with a page directory derived from `kernel_directory`.
    ///
    /// With a `parent`, the Space is its fork: every parent Region is cloned
    /// (copy-on-write for private memory) and mapped, and the parent's total
    /// range and syscall enforcement carry over.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if the page directory or any Region clone
    /// cannot be created. Nothing of the new Space survives a failure.
    pub fn try_create(
        kernel_directory: &dyn PageDirectory,
        parent: Option<&Self>,
        options: SpaceOptions,
    ) -> Result<Self, MmError> {
        let page_directory = kernel_directory.try_clone()?;

        let parent_guard = parent.map(|parent| parent.state.lock());
        let (mut regions, enforces_syscall_regions) = match &parent_guard {
            Some(guard) => {
                let state = guard.borrow();
                (
                    RegionTree::new(state.regions.total_range()),
                    state.enforces_syscall_regions,
                )
            }
            None => (
                RegionTree::new(options.total_range),
                options.enforces_syscall_regions,
            ),
        };

        if let Some(parent) = parent {
            for region in parent.regions() {
                let clone = region.try_clone()?;
                regions.insert(Arc::clone(&clone));
                clone.map(Arc::clone(&page_directory))?;
            }
        }
        drop(parent_guard);

        debug!(
            "created space over {} with {} regions",
            regions.total_range(),
            regions.len()
        );
        Ok(Self {
            page_directory,
            region_lookup_cache_enabled: options.region_lookup_cache_enabled,
            state: RecursiveSpinLock::new(RefCell::new(SpaceState {
                regions,
                cache: LookupCache::default(),
                enforces_syscall_regions,
            })),
        })
    }

    #[must_use]
    pub fn page_directory(&self) -> &Arc<dyn PageDirectory> {
        &self.page_directory
    }

    #[must_use]
    pub fn total_range(&self) -> VirtualRange {
        self.state.lock().borrow().regions.total_range()
    }

    /// Finds room for `size` bytes (rounded up to pages).
    ///
    /// A `hint` that is aligned and free is used as is; otherwise the lowest
    /// fitting gap is chosen. `alignment` is raised to at least a page and
    /// must be a power of two.
    #[must_use]
    pub fn allocate_range(&self, hint: Option<VirtualAddress>, size: u64, alignment: u64) -> Option<VirtualRange> {
        let size = page_round_up(size)?;
        if size == 0 || !alignment.is_power_of_two() {
            return None;
        }
        let alignment = alignment.max(PAGE_SIZE);

        let guard = self.state.lock();
        let state = guard.borrow();
        if let Some(hint) = hint.filter(|hint| hint.as_u64() % alignment == 0)
            && let Some(range) = state.regions.allocate_range_specific(hint, size)
        {
            return Some(range);
        }
        state.regions.allocate_range_anywhere(size, alignment)
    }

    /// Places a Region over `vmobject` at `range` and maps it.
    ///
    /// # Errors
    /// [`MmError::RangeInUse`] if `range` overlaps a Region,
    /// [`MmError::InvalidRange`] if it leaves the total range or does not fit
    /// the object; both are reported before anything changes. Mapping errors
    /// are reported after the Region has been removed again.
    pub fn allocate_region_with_vmobject(
        &self,
        range: VirtualRange,
        vmobject: Arc<VmObject>,
        offset_in_vmobject: u64,
        name: Option<String>,
        access: Access,
        shared: bool,
    ) -> Result<Arc<Region>, MmError> {
        let _guard = self.state.lock();
        self.check_range_free(range)?;
        let region = Region::try_create(range, vmobject, offset_in_vmobject, name, access, shared)?;
        self.insert_and_map(region)
    }

    /// Places a Region over a new anonymous object at `range` and maps it.
    ///
    /// # Errors
    /// As [`allocate_region_with_vmobject`](Self::allocate_region_with_vmobject),
    /// plus [`MmError::OutOfMemory`] if the object cannot be backed as
    /// `strategy` asks.
    pub fn allocate_region(
        &self,
        range: VirtualRange,
        name: Option<String>,
        access: Access,
        strategy: AllocationStrategy,
        allocator: &Arc<dyn FrameAlloc>,
    ) -> Result<Arc<Region>, MmError> {
        let _guard = self.state.lock();
        self.check_range_free(range)?;
        let vmobject = VmObject::try_create_anonymous(allocator, range.size(), strategy)?;
        self.allocate_region_with_vmobject(range, vmobject, 0, name, access, false)
    }

    fn check_range_free(&self, range: VirtualRange) -> Result<(), MmError> {
        let guard = self.state.lock();
        let state = guard.borrow();
        if !range.is_page_aligned() || range.is_empty() || !state.regions.total_range().contains(&range) {
            return Err(MmError::InvalidRange(range));
        }
        if !state.regions.is_range_free(range) {
            return Err(MmError::RangeInUse(range));
        }
        Ok(())
    }

    fn insert_and_map(&self, region: Arc<Region>) -> Result<Arc<Region>, MmError> {
        let guard = self.state.lock();
        guard.borrow_mut().regions.insert(Arc::clone(&region));
        trace!("inserted {region:?}");
        if let Err(error) = region.map(Arc::clone(&self.page_directory)) {
            let removed = guard.borrow_mut().regions.remove(region.base());
            drop(removed);
            region.unmap();
            return Err(error);
        }
        Ok(region)
    }

    /// Removes `region` from the Space and unmaps it.
    ///
    /// Returns `false` if the Region is not part of this Space.
    pub fn deallocate_region(&self, region: &Region) -> bool {
        self.take_region(region).is_some()
    }

    /// Removes `region` from the Space, unmaps it and hands it over.
    pub fn take_region(&self, region: &Region) -> Option<Arc<Region>> {
        let guard = self.state.lock();
        let taken = {
            let mut state = guard.borrow_mut();
            let present = state
                .regions
                .find_exact(region.range())
                .is_some_and(|candidate| core::ptr::eq(candidate.as_ref(), region));
            if !present {
                return None;
            }
            state.cache = LookupCache::default();
            state.regions.remove(region.base())?
        };
        taken.unmap();
        trace!("removed {taken:?}");
        Some(taken)
    }

    /// Inserts and maps a Region over `range` that carries `source`'s object,
    /// name, rights, sharing and flags at `offset_in_vmobject`.
    ///
    /// # Errors
    /// As [`allocate_region_with_vmobject`](Self::allocate_region_with_vmobject).
    pub fn allocate_split_region(
        &self,
        source: &Region,
        range: VirtualRange,
        offset_in_vmobject: u64,
    ) -> Result<Arc<Region>, MmError> {
        let _guard = self.state.lock();
        self.check_range_free(range)?;
        let region = Region::try_create(
            range,
            Arc::clone(source.vmobject()),
            offset_in_vmobject,
            source.name().map(String::from),
            source.access(),
            source.is_shared(),
        )?;
        region.set_flags(source.flags());
        self.insert_and_map(region)
    }

    /// Replaces `source` with the pieces of it left around `hole`.
    ///
    /// Returns zero pieces if `hole` covers the whole Region, one if it
    /// touches an edge, two otherwise. Each piece maps the same object at an
    /// offset moved by its distance from the source base. If a piece cannot
    /// be mapped, the source is put back.
    ///
    /// # Errors
    /// [`MmError::InvalidRange`] if `source` is not in this Space or `hole` is
    /// not a page-aligned part of it; mapping errors otherwise.
    pub fn split_region_around_range(
        &self,
        source: &Region,
        hole: VirtualRange,
    ) -> Result<Vec<Arc<Region>>, MmError> {
        if hole.is_empty() || !hole.is_page_aligned() || !source.range().contains(&hole) {
            return Err(MmError::InvalidRange(hole));
        }
        let _guard = self.state.lock();
        let taken = self
            .take_region(source)
            .ok_or(MmError::InvalidRange(source.range()))?;

        let mut pieces = Vec::new();
        pieces
            .try_reserve_exact(2)
            .map_err(|_| MmError::OutOfMemory)?;
        for piece in taken.range().carve(hole).into_iter().flatten() {
            let offset = taken.offset_in_vmobject() + piece.base().offset_from(taken.base());
            match self.allocate_split_region(&taken, piece, offset) {
                Ok(region) => pieces.push(region),
                Err(error) => {
                    self.restore_split_source(taken, &pieces);
                    return Err(error);
                }
            }
        }
        debug!(
            "split {} around {hole} into {} pieces",
            taken.range(),
            pieces.len()
        );
        Ok(pieces)
    }

    fn restore_split_source(&self, source: Arc<Region>, pieces: &[Arc<Region>]) {
        for piece in pieces {
            self.deallocate_region(piece);
        }
        let range = source.range();
        if let Err(error) = self.insert_and_map(source) {
            warn!("could not restore {range} after a failed split: {error}");
        }
    }

    /// Removes every mapping in `[address, address + size)`, rounded out to
    /// pages, splitting Regions that extend past it.
    ///
    /// Unmapping a range that holds no Region succeeds without change.
    ///
    /// # Errors
    /// [`MmError::InvalidRange`] for an empty range, [`MmError::Overflow`] if
    /// it wraps, mapping errors from splits.
    pub fn unmap_range(&self, address: VirtualAddress, size: u64) -> Result<(), MmError> {
        if size == 0 {
            return Err(MmError::InvalidRange(VirtualRange::new(address, 0)));
        }
        let range = VirtualRange::expand_to_page_boundaries(address, size).ok_or(MmError::Overflow)?;

        let _guard = self.state.lock();
        if let Some(region) = self.find_region_from_range(range) {
            self.deallocate_region(&region);
            return Ok(());
        }
        if let Some(region) = self.find_region_containing(range) {
            self.split_region_around_range(&region, range)?;
            return Ok(());
        }
        for region in self.find_regions_intersecting(range) {
            match region.range().intersect(&range) {
                Some(hole) if hole == region.range() => {
                    self.deallocate_region(&region);
                }
                Some(hole) => {
                    self.split_region_around_range(&region, hole)?;
                }
                None => {}
            }
        }
        Ok(())
    }

    /// The Region whose range is exactly `range`.
    #[must_use]
    pub fn find_region_from_range(&self, range: VirtualRange) -> Option<Arc<Region>> {
        let guard = self.state.lock();
        if self.region_lookup_cache_enabled {
            let state = guard.borrow();
            if state.cache.range == Some(range)
                && let Some(region) = state.cache.region.upgrade()
            {
                return Some(region);
            }
        }

        let found = guard.borrow().regions.find_exact(range).cloned();
        if self.region_lookup_cache_enabled
            && let Some(region) = &found
        {
            guard.borrow_mut().cache = LookupCache {
                range: Some(range),
                region: Arc::downgrade(region),
            };
        }
        found
    }

    /// The Region that covers all of `range`.
    #[must_use]
    pub fn find_region_containing(&self, range: VirtualRange) -> Option<Arc<Region>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.regions.find_containing(range).cloned()
    }

    /// Regions overlapping `range`, in address order.
    #[must_use]
    pub fn find_regions_intersecting(&self, range: VirtualRange) -> Vec<Arc<Region>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.regions.find_intersecting(range).cloned().collect()
    }

    #[must_use]
    pub fn find_region_containing_address(&self, address: VirtualAddress) -> Option<Arc<Region>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.regions.find_containing_address(address).cloned()
    }

    #[must_use]
    pub fn region_count(&self) -> usize {
        self.state.lock().borrow().regions.len()
    }

    /// All Regions, in address order.
    #[must_use]
    pub fn regions(&self) -> Vec<Arc<Region>> {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.regions.iter().cloned().collect()
    }

    #[must_use]
    pub fn enforces_syscall_regions(&self) -> bool {
        self.state.lock().borrow().enforces_syscall_regions
    }

    pub fn set_enforces_syscall_regions(&self, enforces: bool) {
        self.state.lock().borrow_mut().enforces_syscall_regions = enforces;
    }

    /// Whether a system call issued from code at `address` is acceptable.
    #[must_use]
    pub fn is_syscall_allowed_from(&self, address: VirtualAddress) -> bool {
        let _guard = self.state.lock();
        !self.enforces_syscall_regions()
            || self
                .find_region_containing_address(address)
                .is_some_and(|region| region.is_syscall_region())
    }

    /// Unmaps and drops every Region.
    pub fn remove_all_regions(&self) {
        let guard = self.state.lock();
        let regions = {
            let mut state = guard.borrow_mut();
            state.cache = LookupCache::default();
            state.regions.take_all()
        };
        for region in &regions {
            region.unmap();
        }
        debug!("removed all {} regions", regions.len());
    }

    fn sum_regions(&self, amount: impl Fn(&Region) -> u64) -> u64 {
        let guard = self.state.lock();
        let state = guard.borrow();
        state.regions.iter().map(|region| amount(region.as_ref())).sum()
    }

    /// Bytes of address space covered by Regions.
    #[must_use]
    pub fn amount_virtual(&self) -> u64 {
        self.sum_regions(Region::size)
    }

    /// Bytes backed by a frame.
    #[must_use]
    pub fn amount_resident(&self) -> u64 {
        self.sum_regions(Region::amount_resident)
    }

    /// Bytes whose frames are also referenced from elsewhere.
    #[must_use]
    pub fn amount_shared(&self) -> u64 {
        self.sum_regions(Region::amount_shared)
    }

    /// Dirty bytes of private Regions.
    #[must_use]
    pub fn amount_dirty_private(&self) -> u64 {
        self.sum_regions(|region| if region.is_shared() { 0 } else { region.amount_dirty() })
    }

    /// Resident bytes of purgeable memory currently marked volatile.
    #[must_use]
    pub fn amount_purgeable_volatile(&self) -> u64 {
        self.sum_regions(|region| {
            let vmobject = region.vmobject();
            if vmobject.is_purgeable() && vmobject.is_volatile() {
                region.amount_resident()
            } else {
                0
            }
        })
    }

    /// Resident bytes of purgeable memory currently marked non-volatile.
    #[must_use]
    pub fn amount_purgeable_nonvolatile(&self) -> u64 {
        self.sum_regions(|region| {
            let vmobject = region.vmobject();
            if vmobject.is_purgeable() && !vmobject.is_volatile() {
                region.amount_resident()
            } else {
                0
            }
        })
    }

    /// Unmodified resident bytes of inode objects, each object counted once.
    #[must_use]
    pub fn amount_clean_inode(&self) -> u64 {
        let guard = self.state.lock();
        let state = guard.borrow();
        let mut seen = BTreeSet::<VmObjectId>::new();
        state
            .regions
            .iter()
            .map(|region| region.vmobject())
            .filter(|vmobject| vmobject.is_inode() && seen.insert(vmobject.id()))
            .map(|vmobject| vmobject.clean_pages() as u64 * PAGE_SIZE)
            .sum()
    }
}

impl Drop for Space {
    fn drop(&mut self) {
        self.remove_all_regions();
    }
}

impl fmt::Debug for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Space")
            .field("total_range", &self.total_range())
            .field("regions", &self.region_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{MockPageDirectory, test_pmm};
    use crate::vmobject::InodeId;
    use alloc::string::ToString;

    fn range(base: u64, pages: u64) -> VirtualRange {
        VirtualRange::new(VirtualAddress::new(base), pages * PAGE_SIZE)
    }

    fn options(cache: bool) -> SpaceOptions {
        SpaceOptions {
            total_range: range(0x1000, 0xff),
            region_lookup_cache_enabled: cache,
            ..SpaceOptions::default()
        }
    }

    fn space() -> Space {
        Space::try_create(MockPageDirectory::new().as_ref(), None, options(true)).unwrap()
    }

    fn allocator() -> Arc<dyn FrameAlloc> {
        test_pmm(64)
    }

    #[test]
    fn default_options_cover_userspace() {
        let options = SpaceOptions::default();
        assert_eq!(options.total_range.base().as_u64(), USERSPACE_RANGE_BASE);
        assert_eq!(options.total_range.end().as_u64(), USERSPACE_RANGE_CEILING);
        assert!(options.region_lookup_cache_enabled);
    }

    #[test]
    fn allocate_range_honors_free_aligned_hints() {
        let space = space();
        let allocator = allocator();
        space
            .allocate_region(range(0x1000, 2), None, Access::READ_WRITE, AllocationStrategy::None, &allocator)
            .unwrap();

        assert_eq!(
            space.allocate_range(Some(VirtualAddress::new(0x8000)), 0x1800, PAGE_SIZE),
            Some(range(0x8000, 2))
        );
        assert_eq!(
            space.allocate_range(Some(VirtualAddress::new(0x1000)), PAGE_SIZE, PAGE_SIZE),
            Some(range(0x3000, 1)),
            "an occupied hint falls back to the first gap"
        );
        assert_eq!(
            space.allocate_range(Some(VirtualAddress::new(0x9000)), PAGE_SIZE, 0x4000),
            Some(range(0x4000, 1)),
            "a misaligned hint is ignored"
        );
        assert_eq!(space.allocate_range(None, 0, PAGE_SIZE), None);
        assert_eq!(space.allocate_range(None, PAGE_SIZE, 0x3000), None);
    }

    #[test]
    fn overlapping_allocation_changes_nothing() {
        let space = space();
        let allocator = allocator();
        space
            .allocate_region(range(0x2000, 4), None, Access::READ_WRITE, AllocationStrategy::None, &allocator)
            .unwrap();
        let overlapping = range(0x4000, 4);
        assert_eq!(
            space
                .allocate_region(overlapping, None, Access::READ, AllocationStrategy::None, &allocator)
                .err(),
            Some(MmError::RangeInUse(overlapping))
        );
        let outside = range(0x10_0000, 1);
        assert_eq!(
            space
                .allocate_region(outside, None, Access::READ, AllocationStrategy::None, &allocator)
                .err(),
            Some(MmError::InvalidRange(outside))
        );
        assert_eq!(space.region_count(), 1);
    }

    #[test]
    fn allocated_regions_are_mapped_into_the_space() {
        let space = space();
        let allocator = allocator();
        let region = space
            .allocate_region(
                range(0x2000, 2),
                Some("data".to_string()),
                Access::READ_WRITE,
                AllocationStrategy::AllocateNow,
                &allocator,
            )
            .unwrap();
        assert!(region.is_mapped());
        let mapping = space
            .page_directory()
            .query(VirtualAddress::new(0x3000))
            .unwrap();
        assert_eq!(mapping.physical, region.vmobject().physical_page(1).unwrap().address());
        assert_eq!(space.amount_virtual(), 2 * PAGE_SIZE);
        assert_eq!(space.amount_resident(), 2 * PAGE_SIZE);
        assert_eq!(space.amount_dirty_private(), 2 * PAGE_SIZE);
    }

    #[test]
    fn deallocation_unmaps_and_invalidates_the_cache() {
        let space = space();
        let allocator = allocator();
        let region = space
            .allocate_region(range(0x2000, 1), None, Access::READ, AllocationStrategy::AllocateNow, &allocator)
            .unwrap();
        assert!(space.find_region_from_range(range(0x2000, 1)).is_some());
        assert!(space.deallocate_region(&region));
        assert!(!space.deallocate_region(&region));
        assert!(!region.is_mapped());
        assert!(space.find_region_from_range(range(0x2000, 1)).is_none());
        assert!(space.page_directory().query(VirtualAddress::new(0x2000)).is_none());
    }

    #[test]
    fn regions_of_other_spaces_are_not_taken() {
        let a = space();
        let b = space();
        let allocator = allocator();
        let region = a
            .allocate_region(range(0x2000, 1), None, Access::READ, AllocationStrategy::None, &allocator)
            .unwrap();
        b.allocate_region(range(0x2000, 1), None, Access::READ, AllocationStrategy::None, &allocator)
            .unwrap();
        assert!(b.take_region(&region).is_none());
        assert_eq!(b.region_count(), 1);
    }

    #[test]
    fn split_keeps_name_flags_and_object() {
        let space = space();
        let allocator = allocator();
        let source = space
            .allocate_region(
                range(0x1_0000, 8),
                Some("stack".to_string()),
                Access::READ_WRITE,
                AllocationStrategy::AllocateNow,
                &allocator,
            )
            .unwrap();
        source.set_stack(true);

        let pieces = space
            .split_region_around_range(&source, range(0x1_0000, 2))
            .unwrap();
        assert_eq!(pieces.len(), 1);
        let piece = &pieces[0];
        assert_eq!(piece.range(), range(0x1_2000, 6));
        assert_eq!(piece.offset_in_vmobject(), 2 * PAGE_SIZE);
        assert_eq!(piece.name(), Some("stack"));
        assert!(piece.is_stack());
        assert!(Arc::ptr_eq(piece.vmobject(), source.vmobject()));
        assert!(space.page_directory().query(VirtualAddress::new(0x1_0000)).is_none());
        assert_eq!(
            space
                .page_directory()
                .query(VirtualAddress::new(0x1_2000))
                .map(|m| m.physical),
            source.vmobject().physical_page(2).map(|p| p.address())
        );
    }

    #[test]
    fn split_rejects_holes_outside_the_source() {
        let space = space();
        let allocator = allocator();
        let source = space
            .allocate_region(range(0x2000, 2), None, Access::READ, AllocationStrategy::None, &allocator)
            .unwrap();
        let hole = range(0x3000, 2);
        assert_eq!(
            space.split_region_around_range(&source, hole).err(),
            Some(MmError::InvalidRange(hole))
        );
        assert_eq!(space.region_count(), 1);
    }

    #[test]
    fn unmap_range_spanning_several_regions() {
        let space = space();
        let allocator = allocator();
        for base in [0x2000, 0x4000, 0x6000] {
            space
                .allocate_region(range(base, 2), None, Access::READ_WRITE, AllocationStrategy::None, &allocator)
                .unwrap();
        }
        space
            .unmap_range(VirtualAddress::new(0x3000), 0x3001)
            .unwrap();
        let left: Vec<_> = space.regions().iter().map(|r| r.range()).collect();
        assert_eq!(left, [range(0x2000, 1), range(0x7000, 1)]);

        space
            .unmap_range(VirtualAddress::new(0x50_000), PAGE_SIZE)
            .unwrap();
        assert_eq!(space.region_count(), 2);
        assert_eq!(
            space.unmap_range(VirtualAddress::new(0x2000), 0),
            Err(MmError::InvalidRange(range(0x2000, 0)))
        );
    }

    #[test]
    fn zero_length_unmap_inside_a_page_changes_nothing() {
        let space = space();
        let allocator = allocator();
        space
            .allocate_region(range(0x2000, 2), None, Access::READ_WRITE, AllocationStrategy::None, &allocator)
            .unwrap();
        let address = VirtualAddress::new(0x2010);
        assert_eq!(
            space.unmap_range(address, 0),
            Err(MmError::InvalidRange(VirtualRange::new(address, 0)))
        );
        let left: Vec<_> = space.regions().iter().map(|r| r.range()).collect();
        assert_eq!(left, [range(0x2000, 2)]);
    }

    #[test]
    fn syscall_enforcement() {
        let space = space();
        let allocator = allocator();
        let code = space
            .allocate_region(range(0x2000, 1), None, Access::READ_EXECUTE, AllocationStrategy::None, &allocator)
            .unwrap();
        assert!(space.is_syscall_allowed_from(VirtualAddress::new(0x9000)));
        space.set_enforces_syscall_regions(true);
        assert!(!space.is_syscall_allowed_from(VirtualAddress::new(0x2010)));
        code.set_syscall_region(true);
        assert!(space.is_syscall_allowed_from(VirtualAddress::new(0x2010)));
        assert!(!space.is_syscall_allowed_from(VirtualAddress::new(0x9000)));
    }

    #[test]
    fn purgeable_and_inode_accounting() {
        let space = space();
        let allocator = allocator();
        let purgeable =
            VmObject::try_create_purgeable_anonymous(&allocator, 2 * PAGE_SIZE, AllocationStrategy::AllocateNow).unwrap();
        space
            .allocate_region_with_vmobject(range(0x2000, 2), Arc::clone(&purgeable), 0, None, Access::READ_WRITE, false)
            .unwrap();
        assert_eq!(space.amount_purgeable_nonvolatile(), 2 * PAGE_SIZE);
        purgeable.set_volatile(true).unwrap();
        assert_eq!(space.amount_purgeable_volatile(), 2 * PAGE_SIZE);
        assert_eq!(space.amount_purgeable_nonvolatile(), 0);

        let frames = test_pmm(2);
        let inode = VmObject::try_create_shared_inode(InodeId { filesystem: 4, index: 4 }, 2 * PAGE_SIZE).unwrap();
        for index in 0..2 {
            inode
                .set_physical_page(index, frames.allocate_page(crate::frame_alloc::ShouldZeroFill::No))
                .unwrap();
        }
        inode.set_page_dirty(0, true).unwrap();
        space
            .allocate_region_with_vmobject(range(0x8000, 2), Arc::clone(&inode), 0, None, Access::READ, true)
            .unwrap();
        space
            .allocate_region_with_vmobject(range(0xa000, 1), Arc::clone(&inode), PAGE_SIZE, None, Access::READ, true)
            .unwrap();
        assert_eq!(space.amount_clean_inode(), PAGE_SIZE, "the object is counted once");
    }

    #[test]
    fn dropping_the_space_releases_its_memory() {
        let pmm = test_pmm(8);
        let allocator: Arc<dyn FrameAlloc> = pmm.clone();
        let directory = MockPageDirectory::new();
        let space = Space::try_create(directory.as_ref(), None, options(true)).unwrap();
        space
            .allocate_region(range(0x2000, 8), None, Access::READ_WRITE, AllocationStrategy::AllocateNow, &allocator)
            .unwrap();
        assert_eq!(pmm.stats().available_pages, 0);
        drop(space);
        assert_eq!(pmm.stats().available_pages, 8);
    }
}
