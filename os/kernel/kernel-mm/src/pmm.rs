//! # Physical Memory Manager
//!
//! Owns every [`PhysicalZone`] and the global commitment counter behind one
//! spin lock. All zone calls are made with that lock held.
//!
//! Frames leave the manager as [`PhysicalPageRef`]s and come back one page at
//! a time when the last reference drops. Multi-page blocks handed out by
//! [`FrameAlloc::allocate_contiguous_pages`] are thus returned as individual
//! order-0 blocks; the buddy merge reassembles them.
//!
//! Returning a frame takes the manager lock, so no [`PhysicalPageRef`] may be
//! dropped while it is held.

use crate::error::MmError;
use crate::frame_alloc::{FrameAlloc, ShouldZeroFill};
use crate::phys_mapper::PhysMapper;
use crate::physical_page::{FrameDeallocator, PhysicalPage, PhysicalPageRef};
use crate::zone::{MAX_ORDER, PhysicalZone, order_for_pages};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use kernel_info::memory::{PAGE_SIZE, ZONE_MAX_PAGES};
use kernel_memory_addresses::PhysicalAddress;
use kernel_sync::SpinLock;
use log::{info, warn};

/// Snapshot of the manager's counters, in pages.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PhysicalMemoryStats {
    pub total_pages: usize,
    pub available_pages: usize,
    pub committed_pages: usize,
    pub zone_count: usize,
}

#[derive(Default)]
struct PmmState {
    zones: Vec<PhysicalZone>,
    total_pages: usize,
    committed_pages: usize,
}

impl PmmState {
    fn available(&self) -> usize {
        self.zones.iter().map(PhysicalZone::available).sum()
    }

    fn uncommitted_available(&self) -> usize {
        self.available().saturating_sub(self.committed_pages)
    }

    fn allocate_block(&mut self, order: usize) -> Option<PhysicalAddress> {
        self.zones
            .iter_mut()
            .filter(|zone| zone.available() >= 1 << order)
            .find_map(|zone| zone.allocate_block_address(order))
    }
}

/// The system's physical page allocator.
pub struct PhysicalMemoryManager<M> {
    mapper: M,
    state: SpinLock<PmmState>,
    this: Weak<Self>,
}

impl<M> PhysicalMemoryManager<M>
where
    M: PhysMapper + Send + Sync + 'static,
{
    /// Creates a manager without any memory; see [`add_physical_range`](Self::add_physical_range).
    pub fn new(mapper: M) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            mapper,
            state: SpinLock::new(PmmState::default()),
            this: this.clone(),
        })
    }

    /// Hands `page_count` pages starting at `base` to the allocator.
    ///
    /// The range is split into zones of at most [`ZONE_MAX_PAGES`] pages.
    ///
    /// # Panics
    /// Panics if `base` is not page-aligned.
    pub fn add_physical_range(&self, base: PhysicalAddress, page_count: usize) {
        assert!(base.is_page_aligned(), "physical range {base:?} is not page-aligned");

        let mut state = self.state.lock();
        let mut zone_base = base;
        let mut remaining = page_count;
        while remaining > 0 {
            let pages = remaining.min(ZONE_MAX_PAGES);
            state.zones.push(PhysicalZone::new(zone_base, pages));
            zone_base += pages as u64 * PAGE_SIZE;
            remaining -= pages;
        }
        state.total_pages += page_count;
        info!(
            "physical memory: added {page_count} pages at {base:?} ({} zones total)",
            state.zones.len()
        );
    }

    #[must_use]
    pub fn stats(&self) -> PhysicalMemoryStats {
        let state = self.state.lock();
        PhysicalMemoryStats {
            total_pages: state.total_pages,
            available_pages: state.available(),
            committed_pages: state.committed_pages,
            zone_count: state.zones.len(),
        }
    }

    /// Runs [`PhysicalZone::verify_integrity`] on every zone.
    pub fn verify_integrity(&self) {
        let state = self.state.lock();
        for zone in &state.zones {
            zone.verify_integrity();
        }
    }

    fn make_page(&self, owner: &Arc<dyn FrameDeallocator>, address: PhysicalAddress, fill: ShouldZeroFill) -> PhysicalPageRef {
        if fill == ShouldZeroFill::Yes {
            // Safety: the frame was just taken out of a zone; nothing else references it.
            let frame: &mut [u8; PAGE_SIZE as usize] = unsafe { self.mapper.phys_to_mut(address) };
            frame.fill(0);
        }
        PhysicalPage::new(address, Arc::clone(owner))
    }

    fn owner(&self) -> Option<Arc<dyn FrameDeallocator>> {
        let this: Arc<dyn FrameDeallocator> = self.this.upgrade()?;
        Some(this)
    }
}

impl<M> FrameAlloc for PhysicalMemoryManager<M>
where
    M: PhysMapper + Send + Sync + 'static,
{
    fn allocate_page(&self, fill: ShouldZeroFill) -> Option<PhysicalPageRef> {
        let owner = self.owner()?;
        let address = {
            let mut state = self.state.lock();
            if state.uncommitted_available() == 0 {
                return None;
            }
            state.allocate_block(0)?
        };
        Some(self.make_page(&owner, address, fill))
    }

    fn allocate_contiguous_pages(&self, page_count: usize, fill: ShouldZeroFill) -> Option<Vec<PhysicalPageRef>> {
        if page_count == 0 {
            return Some(Vec::new());
        }
        let order = order_for_pages(page_count);
        if order > MAX_ORDER {
            warn!("physical memory: {page_count} contiguous pages exceed the largest block");
            return None;
        }
        let owner = self.owner()?;

        let base = {
            let mut state = self.state.lock();
            if state.uncommitted_available() < 1 << order {
                warn!("physical memory: no room for {page_count} contiguous pages");
                return None;
            }
            let Some(base) = state.allocate_block(order) else {
                warn!("physical memory: too fragmented for {page_count} contiguous pages");
                return None;
            };
            // Give back the tail of the block right away.
            for page in page_count..1 << order {
                let address = base + page as u64 * PAGE_SIZE;
                if let Some(zone) = state.zones.iter_mut().find(|zone| zone.contains(address)) {
                    zone.deallocate_block_address(address, 0);
                }
            }
            base
        };

        Some(
            (0..page_count)
                .map(|page| self.make_page(&owner, base + page as u64 * PAGE_SIZE, fill))
                .collect(),
        )
    }

    fn commit(&self, page_count: usize) -> Result<(), MmError> {
        let mut state = self.state.lock();
        if state.uncommitted_available() < page_count {
            warn!(
                "physical memory: cannot commit {page_count} pages ({} uncommitted)",
                state.uncommitted_available()
            );
            return Err(MmError::OutOfMemory);
        }
        state.committed_pages += page_count;
        Ok(())
    }

    fn uncommit(&self, page_count: usize) {
        let mut state = self.state.lock();
        assert!(
            state.committed_pages >= page_count,
            "uncommitting {page_count} pages with only {} committed",
            state.committed_pages
        );
        state.committed_pages -= page_count;
    }

    fn allocate_committed_page(&self, fill: ShouldZeroFill) -> PhysicalPageRef {
        let owner = self.owner();
        let address = {
            let mut state = self.state.lock();
            assert!(state.committed_pages > 0, "allocating a committed page without a commitment");
            state.committed_pages -= 1;
            state.allocate_block(0)
        };
        match (owner, address) {
            (Some(owner), Some(address)) => self.make_page(&owner, address, fill),
            _ => panic!("committed frame is missing from the physical zones"),
        }
    }
}

impl<M> FrameDeallocator for PhysicalMemoryManager<M>
where
    M: PhysMapper + Send + Sync + 'static,
{
    fn deallocate_frame(&self, address: PhysicalAddress) {
        let mut state = self.state.lock();
        let Some(zone) = state.zones.iter_mut().find(|zone| zone.contains(address)) else {
            panic!("freeing {address:?}, which no zone manages");
        };
        zone.deallocate_block_address(address, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{TestPhys, test_pmm};
    use std::sync::{Arc as StdArc, Barrier};
    use std::thread;

    #[test]
    fn pages_return_to_their_zone_on_drop() {
        let pmm = test_pmm(16);
        let page = pmm.allocate_page(ShouldZeroFill::No).unwrap();
        assert_eq!(pmm.stats().available_pages, 15);
        drop(page);
        assert_eq!(pmm.stats().available_pages, 16);
        pmm.verify_integrity();
    }

    #[test]
    fn zero_fill_clears_the_frame() {
        let pmm = test_pmm(4);
        let page = pmm.allocate_page(ShouldZeroFill::Yes).unwrap();
        assert!(pmm.mapper.frame_bytes(page.address()).iter().all(|&b| b == 0));

        let dirty = pmm.allocate_page(ShouldZeroFill::No).unwrap();
        assert!(pmm.mapper.frame_bytes(dirty.address()).iter().all(|&b| b == TestPhys::POISON));
    }

    #[test]
    fn large_ranges_are_split_into_zones() {
        let pmm = PhysicalMemoryManager::new(TestPhys::new(0));
        pmm.add_physical_range(PhysicalAddress::new(0x100_0000), ZONE_MAX_PAGES * 2 + 5);
        let stats = pmm.stats();
        assert_eq!(stats.zone_count, 3);
        assert_eq!(stats.total_pages, ZONE_MAX_PAGES * 2 + 5);
        assert_eq!(stats.available_pages, stats.total_pages);
    }

    #[test]
    fn commitments_are_protected_from_plain_allocation() {
        let pmm = test_pmm(4);
        pmm.commit(3).unwrap();
        assert_eq!(pmm.commit(2), Err(MmError::OutOfMemory));

        let loose = pmm.allocate_page(ShouldZeroFill::No);
        assert!(loose.is_some());
        assert!(pmm.allocate_page(ShouldZeroFill::No).is_none(), "remaining frames are committed");

        let committed: Vec<_> = (0..3).map(|_| pmm.allocate_committed_page(ShouldZeroFill::Yes)).collect();
        assert_eq!(pmm.stats().committed_pages, 0);
        assert_eq!(pmm.stats().available_pages, 0);
        drop(committed);
        drop(loose);
        assert_eq!(pmm.stats().available_pages, 4);
    }

    #[test]
    fn committed_pages_uncommit_the_rest_on_drop() {
        let pmm = test_pmm(8);
        let allocator: Arc<dyn FrameAlloc> = pmm.clone();
        let mut commitment = crate::frame_alloc::CommittedPages::try_commit(&allocator, 5).unwrap();
        let page = commitment.take_one(ShouldZeroFill::No);
        commitment.uncommit_one();
        assert_eq!(commitment.remaining(), 3);
        assert_eq!(pmm.stats().committed_pages, 3);
        drop(commitment);
        assert_eq!(pmm.stats().committed_pages, 0);
        drop(page);
        assert_eq!(pmm.stats().available_pages, 8);
    }

    #[test]
    fn contiguous_allocation_releases_the_tail() {
        let pmm = test_pmm(16);
        let pages = pmm.allocate_contiguous_pages(5, ShouldZeroFill::No).unwrap();
        assert_eq!(pages.len(), 5);
        for pair in pages.windows(2) {
            assert_eq!(pair[1].address().offset_from(pair[0].address()), PAGE_SIZE);
        }
        assert_eq!(pmm.stats().available_pages, 11);
        drop(pages);
        assert_eq!(pmm.stats().available_pages, 16);
        pmm.verify_integrity();
        assert!(pmm.allocate_contiguous_pages(16, ShouldZeroFill::No).is_some());
    }

    #[test]
    fn contiguous_allocation_fails_when_fragmented() {
        let pmm = test_pmm(4);
        let pages: Vec<_> = (0..4).map(|_| pmm.allocate_page(ShouldZeroFill::No).unwrap()).collect();
        // Keep every other frame so no two free frames are adjacent.
        let kept: Vec<_> = pages.into_iter().step_by(2).collect();
        assert_eq!(pmm.stats().available_pages, 2);
        assert!(pmm.allocate_contiguous_pages(2, ShouldZeroFill::No).is_none());
        drop(kept);
    }

    #[test]
    fn concurrent_allocation_never_hands_out_a_frame_twice() {
        let pmm = test_pmm(256);
        let threads = 4;
        let start = StdArc::new(Barrier::new(threads));
        let done = StdArc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let pmm = pmm.clone();
                let start = start.clone();
                let done = done.clone();
                thread::spawn(move || {
                    start.wait();
                    let mut mine = Vec::new();
                    for round in 0..200 {
                        if let Some(page) = pmm.allocate_page(ShouldZeroFill::No) {
                            mine.push(page);
                        }
                        if round % 3 == 0 {
                            mine.pop();
                        }
                    }
                    let addresses: Vec<_> = mine.iter().map(|p| p.address()).collect();
                    // Hold on to the frames until every thread has reported.
                    done.wait();
                    addresses
                })
            })
            .collect();

        let mut all: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total, "a frame was handed out twice");
        assert_eq!(pmm.stats().available_pages, 256);
        pmm.verify_integrity();
    }
}
