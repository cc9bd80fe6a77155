//! Global set of live [`VmObject`]s.
//!
//! Objects enter on construction and leave in their destructor. The set only
//! holds weak references, so it never keeps an object alive. Iteration works
//! on a snapshot taken under the lock; callbacks run with the lock released
//! because dropping the last reference to an object re-enters the registry.

use crate::vmobject::{VmObject, VmObjectId, VmObjectKind};
use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use kernel_sync::SpinLock;
use log::trace;

static VMOBJECTS: SpinLock<BTreeMap<VmObjectId, Weak<VmObject>>> = SpinLock::new(BTreeMap::new());

pub(crate) fn register(object: &Arc<VmObject>) {
    let previous = VMOBJECTS
        .lock()
        .insert(object.id(), Arc::downgrade(object));
    debug_assert!(previous.is_none(), "{} registered twice", object.id());
    trace!("registered {}", object.id());
}

pub(crate) fn unregister(id: VmObjectId) {
    VMOBJECTS.lock().remove(&id);
}

/// Whether the object with `id` is still alive.
#[must_use]
pub fn contains(id: VmObjectId) -> bool {
    VMOBJECTS.lock().contains_key(&id)
}

/// Number of live objects.
#[must_use]
pub fn vmobject_count() -> usize {
    VMOBJECTS.lock().len()
}

/// Invokes `callback` for every live object.
pub fn for_each_vmobject(mut callback: impl FnMut(&Arc<VmObject>)) {
    let snapshot: Vec<Arc<VmObject>> = VMOBJECTS
        .lock()
        .values()
        .filter_map(Weak::upgrade)
        .collect();
    for object in &snapshot {
        callback(object);
    }
}

/// System-wide object statistics.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct VmObjectTotals {
    pub anonymous: usize,
    pub inode: usize,
    pub mmio: usize,
    pub resident_pages: usize,
    /// Resident pages whose frame is referenced from more than one place.
    pub shared_pages: usize,
    pub dirty_pages: usize,
    pub purgeable_volatile_pages: usize,
}

impl VmObjectTotals {
    fn account(&mut self, object: &VmObject) {
        match object.kind() {
            VmObjectKind::Anonymous { .. } => self.anonymous += 1,
            VmObjectKind::SharedInode(_) | VmObjectKind::PrivateInode(_) => self.inode += 1,
            VmObjectKind::Mmio(_) => self.mmio += 1,
        }
        let pages = 0..object.page_count();
        self.resident_pages += object.resident_pages_in(pages.clone());
        self.shared_pages += object.shared_pages_in(pages.clone());
        self.dirty_pages += object.dirty_pages_in(pages.clone());
        if object.is_purgeable() && object.is_volatile() {
            self.purgeable_volatile_pages += object.resident_pages_in(pages);
        }
    }
}

#[must_use]
pub fn totals() -> VmObjectTotals {
    let mut totals = VmObjectTotals::default();
    for_each_vmobject(|object| totals.account(object));
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame_alloc::{FrameAlloc, ShouldZeroFill};
    use crate::test_support::test_pmm;
    use crate::vmobject::{AllocationStrategy, InodeId};
    use kernel_memory_addresses::PhysicalAddress;
    use kernel_info::memory::PAGE_SIZE;

    // Other tests create objects concurrently, so only facts about our own
    // objects are checked.

    #[test]
    fn objects_are_visible_while_alive() {
        let inode = InodeId { filesystem: 9, index: 1 };
        let object = VmObject::try_create_shared_inode(inode, PAGE_SIZE).unwrap();
        let id = object.id();
        assert!(contains(id));

        let mut seen = false;
        for_each_vmobject(|o| seen |= o.id() == id);
        assert!(seen);

        drop(object);
        assert!(!contains(id));
    }

    #[test]
    fn ids_are_unique() {
        let inode = InodeId { filesystem: 9, index: 2 };
        let a = VmObject::try_create_private_inode(inode, PAGE_SIZE).unwrap();
        let b = VmObject::try_create_private_inode(inode, PAGE_SIZE).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn releasing_references_during_iteration_is_allowed() {
        let inode = InodeId { filesystem: 9, index: 3 };
        let mut held = Some(VmObject::try_create_shared_inode(inode, PAGE_SIZE).unwrap());
        let id = held.as_ref().map(|o| o.id());
        for_each_vmobject(|o| {
            if Some(o.id()) == id {
                held = None;
            }
        });
        assert!(held.is_none());
        let id = id.unwrap();
        assert!(!contains(id));
    }

    #[test]
    fn totals_count_mmio_objects() {
        let object = VmObject::try_create_mmio(PhysicalAddress::new(0xb800_0000), 2 * PAGE_SIZE).unwrap();
        let totals = totals();
        assert!(totals.mmio >= 1);
        assert!(totals.resident_pages >= object.resident_pages());
    }

    #[test]
    fn totals_sum_what_each_object_contributes() {
        let pmm = test_pmm(8);
        let allocator: Arc<dyn FrameAlloc> = pmm.clone();
        let anonymous =
            VmObject::try_create_anonymous(&allocator, 2 * PAGE_SIZE, AllocationStrategy::AllocateNow).unwrap();
        let clone = anonymous.try_clone().unwrap();
        let inode = VmObject::try_create_private_inode(InodeId { filesystem: 9, index: 4 }, 2 * PAGE_SIZE).unwrap();
        inode
            .set_physical_page(0, pmm.allocate_page(ShouldZeroFill::No))
            .unwrap();
        inode.set_page_dirty(0, true).unwrap();
        let purgeable =
            VmObject::try_create_purgeable_anonymous(&allocator, PAGE_SIZE, AllocationStrategy::AllocateNow).unwrap();
        purgeable.set_volatile(true).unwrap();
        let mmio = VmObject::try_create_mmio(PhysicalAddress::new(0xfe00_0000), 2 * PAGE_SIZE).unwrap();

        // Only our own objects are summed; other tests add theirs concurrently.
        let ours = [anonymous.id(), clone.id(), inode.id(), purgeable.id(), mmio.id()];
        let mut totals = VmObjectTotals::default();
        for_each_vmobject(|object| {
            if ours.contains(&object.id()) {
                totals.account(object);
            }
        });
        assert_eq!(
            totals,
            VmObjectTotals {
                anonymous: 3,
                inode: 1,
                mmio: 1,
                resident_pages: 8,
                shared_pages: 4,
                dirty_pages: 1,
                purgeable_volatile_pages: 1,
            }
        );

        drop(clone);
        let mut totals = VmObjectTotals::default();
        totals.account(&anonymous);
        assert_eq!(totals.shared_pages, 0, "frames are exclusive once the clone is gone");
        assert_eq!(totals.resident_pages, 2);
    }
}
