//! Ordered, non-overlapping set of [`Region`]s keyed by base address.

use crate::region::Region;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, VirtualRange, align_up};

pub struct RegionTree {
    total_range: VirtualRange,
    regions: BTreeMap<VirtualAddress, Arc<Region>>,
}

impl RegionTree {
    #[must_use]
    pub const fn new(total_range: VirtualRange) -> Self {
        Self {
            total_range,
            regions: BTreeMap::new(),
        }
    }

    /// The span every Region must lie in.
    #[inline]
    #[must_use]
    pub const fn total_range(&self) -> VirtualRange {
        self.total_range
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Adds `region`.
    ///
    /// # Panics
    /// Panics if the Region leaves the total range or overlaps another one.
    /// Callers check with [`is_range_free`](Self::is_range_free) first.
    pub fn insert(&mut self, region: Arc<Region>) {
        let range = region.range();
        assert!(
            self.is_range_free(range),
            "{range} overlaps a region or leaves {}",
            self.total_range
        );
        self.regions.insert(range.base(), region);
    }

    /// Removes and returns the Region starting at `base`.
    pub fn remove(&mut self, base: VirtualAddress) -> Option<Arc<Region>> {
        self.regions.remove(&base)
    }

    /// The Region whose range is exactly `range`.
    #[must_use]
    pub fn find_exact(&self, range: VirtualRange) -> Option<&Arc<Region>> {
        self.regions
            .get(&range.base())
            .filter(|region| region.range() == range)
    }

    #[must_use]
    pub fn find_containing_address(&self, address: VirtualAddress) -> Option<&Arc<Region>> {
        self.regions
            .range(..=address)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.range().contains_address(address))
    }

    /// The Region that covers all of `range`.
    #[must_use]
    pub fn find_containing(&self, range: VirtualRange) -> Option<&Arc<Region>> {
        self.find_containing_address(range.base())
            .filter(|region| region.range().contains(&range))
    }

    /// Regions sharing at least one address with `range`, in address order.
    pub fn find_intersecting(&self, range: VirtualRange) -> impl Iterator<Item = &Arc<Region>> {
        let (start, end) = if range.is_empty() {
            (range.base(), range.base())
        } else {
            (range.base(), range.end())
        };
        let straddling = self
            .regions
            .range(..start)
            .next_back()
            .map(|(_, region)| region)
            .filter(move |region| region.range().intersects(&range));
        let inside = self
            .regions
            .range(start..end)
            .map(|(_, region)| region);
        straddling.into_iter().chain(inside)
    }

    /// Whether `range` lies in the total range and touches no Region.
    #[must_use]
    pub fn is_range_free(&self, range: VirtualRange) -> bool {
        self.total_range.contains(&range) && self.find_intersecting(range).next().is_none()
    }

    /// The lowest free range of `size` bytes whose base is a multiple of
    /// `alignment`.
    ///
    /// `alignment` must be a power of two no smaller than a page.
    #[must_use]
    pub fn allocate_range_anywhere(&self, size: u64, alignment: u64) -> Option<VirtualRange> {
        debug_assert!(alignment.is_power_of_two() && alignment >= PAGE_SIZE);
        if size == 0 {
            return None;
        }
        let fit = |gap_start: VirtualAddress, gap_end: VirtualAddress| {
            let base = align_up(gap_start.as_u64(), alignment)?;
            let end = base.checked_add(size)?;
            (end <= gap_end.as_u64()).then(|| VirtualRange::new(VirtualAddress::new(base), size))
        };

        let mut cursor = self.total_range.base();
        for region in self.regions.values() {
            if let Some(range) = fit(cursor, region.base()) {
                return Some(range);
            }
            cursor = cursor.max(region.range().end());
        }
        fit(cursor, self.total_range.end())
    }

    /// `[base, base + size)` if it is free.
    #[must_use]
    pub fn allocate_range_specific(&self, base: VirtualAddress, size: u64) -> Option<VirtualRange> {
        let range = VirtualRange::try_new(base, size)?;
        (!range.is_empty() && self.is_range_free(range)).then_some(range)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Region>> {
        self.regions.values()
    }

    /// Empties the tree, handing back its Regions in address order.
    pub fn take_all(&mut self) -> Vec<Arc<Region>> {
        core::mem::take(&mut self.regions).into_values().collect()
    }
}
