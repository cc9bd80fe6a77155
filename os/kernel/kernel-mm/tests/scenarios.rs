use kernel_mm::test_support::{MockPageDirectory, test_pmm};
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, VirtualRange};
use kernel_mm::{
    Access, AllocationStrategy, FrameAlloc, InodeId, MmError, ShouldZeroFill, Space, SpaceOptions, VmObject,
};
use proptest::prelude::*;
use std::sync::Arc;

fn range(base: u64, size: u64) -> VirtualRange {
    VirtualRange::new(VirtualAddress::new(base), size)
}

fn options(cache: bool) -> SpaceOptions {
    SpaceOptions {
        total_range: range(0x1000, 0x100_0000),
        region_lookup_cache_enabled: cache,
        ..SpaceOptions::default()
    }
}

fn new_space(kernel: &MockPageDirectory, cache: bool) -> (Space, Arc<MockPageDirectory>) {
    let space = Space::try_create(kernel, None, options(cache)).unwrap();
    (space, kernel.last_child())
}

#[test]
fn splitting_around_a_hole_keeps_both_sides() {
    let kernel = MockPageDirectory::new();
    let (space, directory) = new_space(&kernel, true);
    let allocator: Arc<dyn FrameAlloc> = test_pmm(16);

    let source = space
        .allocate_region(
            range(0x1000, 0x4000),
            None,
            Access::READ_WRITE,
            AllocationStrategy::AllocateNow,
            &allocator,
        )
        .unwrap();
    let hole = range(0x2000, 0x1000);
    let pieces = space.split_region_around_range(&source, hole).unwrap();

    assert_eq!(pieces.len(), 2);
    assert_eq!(pieces[0].range(), range(0x1000, 0x1000));
    assert_eq!(pieces[0].offset_in_vmobject(), 0);
    assert_eq!(pieces[1].range(), range(0x3000, 0x2000));
    assert_eq!(pieces[1].offset_in_vmobject(), 0x2000);
    for piece in &pieces {
        assert!(Arc::ptr_eq(piece.vmobject(), source.vmobject()));
    }

    // The pieces and the hole add up to the source.
    let covered: u64 = pieces.iter().map(|p| p.size()).sum::<u64>() + hole.size();
    assert_eq!(covered, source.size());
    assert_eq!(pieces[0].range().end(), hole.base());
    assert_eq!(hole.end(), pieces[1].base());

    assert_eq!(space.region_count(), 2);
    assert!(directory.physical(0x2000).is_none());
    assert_eq!(
        directory.physical(0x3000),
        source.vmobject().physical_page(2).map(|p| p.address())
    );
}

#[test]
fn splitting_away_everything_deallocates() {
    let kernel = MockPageDirectory::new();
    let (space, directory) = new_space(&kernel, true);
    let allocator: Arc<dyn FrameAlloc> = test_pmm(4);
    let source = space
        .allocate_region(range(0x1000, 0x2000), None, Access::READ, AllocationStrategy::AllocateNow, &allocator)
        .unwrap();
    let pieces = space.split_region_around_range(&source, source.range()).unwrap();
    assert!(pieces.is_empty());
    assert_eq!(space.region_count(), 0);
    assert_eq!(directory.mapped_pages(), 0);
}

#[test]
fn shared_page_changes_reach_every_space() {
    let kernel = MockPageDirectory::new();
    let (first, first_directory) = new_space(&kernel, true);
    let (second, second_directory) = new_space(&kernel, true);
    let frames = test_pmm(4);

    let object = VmObject::try_create_shared_inode(InodeId { filesystem: 1, index: 42 }, 2 * PAGE_SIZE).unwrap();
    first
        .allocate_region_with_vmobject(range(0x10_0000, 0x2000), Arc::clone(&object), 0, None, Access::READ, true)
        .unwrap();
    second
        .allocate_region_with_vmobject(
            range(0x40_0000, 0x1000),
            Arc::clone(&object),
            PAGE_SIZE,
            None,
            Access::READ_WRITE,
            true,
        )
        .unwrap();
    assert_eq!(object.region_count(), 2);

    let page = frames.allocate_page(ShouldZeroFill::Yes).unwrap();
    let address = page.address();
    object.set_physical_page(1, Some(page)).unwrap();
    assert_eq!(first_directory.physical(0x10_1000), Some(address));
    assert_eq!(second_directory.physical(0x40_0000), Some(address));
    assert_eq!(second_directory.access(0x40_0000), Some(Access::READ_WRITE));

    object.set_physical_page(1, None).unwrap();
    assert!(first_directory.physical(0x10_1000).is_none());
    assert!(second_directory.physical(0x40_0000).is_none());
    assert_eq!(frames.stats().available_pages, 4, "the replaced frame was released");
}

#[test]
fn fork_shares_frames_copy_on_write() {
    let kernel = MockPageDirectory::new();
    let (parent, parent_directory) = new_space(&kernel, true);
    let allocator: Arc<dyn FrameAlloc> = test_pmm(16);

    let private = parent
        .allocate_region(range(0x1_0000, 0x2000), None, Access::READ_WRITE, AllocationStrategy::AllocateNow, &allocator)
        .unwrap();
    let shared_object =
        VmObject::try_create_anonymous(&allocator, PAGE_SIZE, AllocationStrategy::AllocateNow).unwrap();
    parent
        .allocate_region_with_vmobject(range(0x8_0000, 0x1000), Arc::clone(&shared_object), 0, None, Access::READ_WRITE, true)
        .unwrap();
    parent.set_enforces_syscall_regions(true);

    let child = Space::try_create(kernel.as_ref(), Some(&parent), options(true)).unwrap();
    let child_directory = kernel.last_child();

    assert_eq!(child.region_count(), 2);
    assert!(child.enforces_syscall_regions());

    let child_private = child.find_region_from_range(private.range()).unwrap();
    assert!(!Arc::ptr_eq(child_private.vmobject(), private.vmobject()));
    assert_eq!(parent_directory.physical(0x1_0000), child_directory.physical(0x1_0000));
    assert_eq!(parent_directory.access(0x1_0000), Some(Access::READ));
    assert_eq!(child_directory.access(0x1_1000), Some(Access::READ));
    assert_eq!(child.amount_shared(), 2 * PAGE_SIZE);

    let child_shared = child.find_region_containing_address(VirtualAddress::new(0x8_0000)).unwrap();
    assert!(Arc::ptr_eq(child_shared.vmobject(), &shared_object));
    assert_eq!(child_directory.access(0x8_0000), Some(Access::READ_WRITE));

    drop((child_private, child_shared, child));
    assert_eq!(child_directory.mapped_pages(), 0);
    assert_eq!(private.vmobject().physical_page(0).map(|p| Arc::strong_count(&p)), Some(2));
}

#[test]
fn overlapping_regions_are_rejected_before_any_change() {
    let kernel = MockPageDirectory::new();
    let (space, directory) = new_space(&kernel, true);
    let allocator: Arc<dyn FrameAlloc> = test_pmm(16);
    space
        .allocate_region(range(0x4000, 0x4000), None, Access::READ_WRITE, AllocationStrategy::AllocateNow, &allocator)
        .unwrap();
    let before = directory.mapped_pages();

    for overlapping in [range(0x3000, 0x2000), range(0x7000, 0x1000), range(0x5000, 0x1000), range(0x1000, 0x10000)] {
        let object = VmObject::try_create_anonymous(&allocator, overlapping.size(), AllocationStrategy::None).unwrap();
        assert_eq!(
            space
                .allocate_region_with_vmobject(overlapping, object, 0, None, Access::READ, false)
                .err(),
            Some(MmError::RangeInUse(overlapping))
        );
    }
    assert_eq!(space.region_count(), 1);
    assert_eq!(directory.mapped_pages(), before);
}

#[derive(Debug, Clone)]
enum Op {
    Allocate { slot: u64, pages: u64 },
    Unmap { slot: u64, page: u64 },
    Lookup { slot: u64, pages: u64 },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u64..8, 1u64..4).prop_map(|(slot, pages)| Op::Allocate { slot, pages }),
        (0u64..8, 0u64..4).prop_map(|(slot, page)| Op::Unmap { slot, page }),
        (0u64..8, 1u64..4).prop_map(|(slot, pages)| Op::Lookup { slot, pages }),
    ]
}

fn slot_range(slot: u64, pages: u64) -> VirtualRange {
    range(0x10_0000 + slot * 0x10_000, pages * PAGE_SIZE)
}

/// Applies `op` and reports what a caller would observe.
fn apply(space: &Space, allocator: &Arc<dyn FrameAlloc>, op: &Op) -> Option<VirtualRange> {
    match *op {
        Op::Allocate { slot, pages } => space
            .allocate_region(slot_range(slot, pages), None, Access::READ_WRITE, AllocationStrategy::None, allocator)
            .ok()
            .map(|region| region.range()),
        Op::Unmap { slot, page } => {
            let address = VirtualAddress::new(slot_range(slot, 1).base().as_u64() + page * PAGE_SIZE);
            space.unmap_range(address, PAGE_SIZE).ok().map(|()| range(address.as_u64(), PAGE_SIZE))
        }
        Op::Lookup { slot, pages } => space
            .find_region_from_range(slot_range(slot, pages))
            .map(|region| region.range()),
    }
}

proptest! {
    #[test]
    fn lookup_cache_never_changes_results(ops in proptest::collection::vec(op(), 1..64)) {
        let kernel = MockPageDirectory::new();
        let allocator: Arc<dyn FrameAlloc> = test_pmm(8);
        let (cached, _) = new_space(&kernel, true);
        let (uncached, _) = new_space(&kernel, false);

        for op in &ops {
            prop_assert_eq!(apply(&cached, &allocator, op), apply(&uncached, &allocator, op));
        }
        let cached_ranges: Vec<_> = cached.regions().iter().map(|r| r.range()).collect();
        let uncached_ranges: Vec<_> = uncached.regions().iter().map(|r| r.range()).collect();
        prop_assert_eq!(cached_ranges, uncached_ranges);
    }

    #[test]
    fn regions_stay_disjoint(requests in proptest::collection::vec((0u64..64, 1u64..8), 1..48)) {
        let kernel = MockPageDirectory::new();
        let allocator: Arc<dyn FrameAlloc> = test_pmm(1);
        let (space, _) = new_space(&kernel, true);

        for (page, pages) in requests {
            let wanted = range(0x10_0000 + page * PAGE_SIZE, pages * PAGE_SIZE);
            let before = space.region_count();
            match space.allocate_region(wanted, None, Access::READ, AllocationStrategy::None, &allocator) {
                Ok(region) => prop_assert_eq!(region.range(), wanted),
                Err(error) => {
                    prop_assert_eq!(error, MmError::RangeInUse(wanted));
                    prop_assert_eq!(space.region_count(), before);
                }
            }
        }
        let ranges: Vec<_> = space.regions().iter().map(|r| r.range()).collect();
        for pair in ranges.windows(2) {
            prop_assert!(pair[0].end() <= pair[1].base());
        }
    }
}
