//! Hosted stand-ins for the hardware collaborators.
//!
//! Built for this crate's own tests and, with the `test-support` feature,
//! for integration tests and downstream crates.

#![allow(clippy::missing_panics_doc, clippy::must_use_candidate)]

use crate::access::Access;
use crate::error::MmError;
use crate::page_directory::{Mapping, PageDirectory};
use crate::phys_mapper::PhysMapper;
use crate::physical_page::PhysicalPageRef;
use crate::pmm::PhysicalMemoryManager;
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::UnsafeCell;
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, VirtualAddress, VirtualRange};
use std::sync::Mutex;

#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; PAGE_SIZE as usize]>);

/// "Physical memory" backed by heap frames, starting at physical address 0.
pub struct TestPhys {
    frames: Box<[Frame]>,
}

// Safety: frames are only reached through `phys_to_mut`, whose caller
// guarantees exclusive access.
unsafe impl Sync for TestPhys {}
unsafe impl Send for TestPhys {}

impl TestPhys {
    pub const POISON: u8 = 0xA5;

    pub fn new(pages: usize) -> Self {
        Self {
            frames: (0..pages)
                .map(|_| Frame(UnsafeCell::new([Self::POISON; PAGE_SIZE as usize])))
                .collect(),
        }
    }

    pub fn frame_bytes(&self, pa: PhysicalAddress) -> &[u8] {
        let frame = &self.frames[(pa.as_u64() / PAGE_SIZE) as usize];
        unsafe { &*frame.0.get() }
    }
}

impl PhysMapper for TestPhys {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let index = (pa.as_u64() / PAGE_SIZE) as usize;
        let offset = (pa.as_u64() % PAGE_SIZE) as usize;
        let base = self.frames[index].0.get().cast::<u8>();
        unsafe { &mut *base.add(offset).cast::<T>() }
    }
}

/// A manager over `pages` frames of [`TestPhys`] memory.
pub fn test_pmm(pages: usize) -> Arc<PhysicalMemoryManager<TestPhys>> {
    let pmm = PhysicalMemoryManager::new(TestPhys::new(pages));
    pmm.add_physical_range(PhysicalAddress::zero(), pages);
    pmm
}

/// Page directory that records installed translations.
#[derive(Default)]
pub struct MockPageDirectory {
    mappings: Mutex<BTreeMap<VirtualAddress, Mapping>>,
    removals: Mutex<Vec<VirtualRange>>,
    /// Roots handed out by `try_clone`, so child spaces can be inspected.
    children: Mutex<Vec<Arc<MockPageDirectory>>>,
}

impl MockPageDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mapped_pages(&self) -> usize {
        self.mappings.lock().unwrap().len()
    }

    pub fn removals(&self) -> Vec<VirtualRange> {
        self.removals.lock().unwrap().clone()
    }

    pub fn physical(&self, address: u64) -> Option<PhysicalAddress> {
        self.query(VirtualAddress::new(address)).map(|m| m.physical)
    }

    pub fn access(&self, address: u64) -> Option<Access> {
        self.query(VirtualAddress::new(address)).map(|m| m.access)
    }

    /// The most recent root derived through `try_clone`.
    pub fn last_child(&self) -> Arc<Self> {
        Arc::clone(self.children.lock().unwrap().last().unwrap())
    }
}

impl PageDirectory for MockPageDirectory {
    fn install(&self, range: VirtualRange, pages: &[Option<PhysicalPageRef>], access: Access) -> Result<(), MmError> {
        assert_eq!(range.page_count(), pages.len());
        let mut mappings = self.mappings.lock().unwrap();
        for (i, page) in pages.iter().enumerate() {
            let va = range.base() + i as u64 * PAGE_SIZE;
            match page {
                Some(page) => {
                    mappings.insert(
                        va,
                        Mapping {
                            physical: page.address(),
                            access,
                        },
                    );
                }
                None => {
                    mappings.remove(&va);
                }
            }
        }
        Ok(())
    }

    fn remove(&self, range: VirtualRange) {
        self.mappings
            .lock()
            .unwrap()
            .retain(|va, _| !range.contains_address(*va));
        self.removals.lock().unwrap().push(range);
    }

    fn try_clone(&self) -> Result<Arc<dyn PageDirectory>, MmError> {
        let child = Self::new();
        self.children.lock().unwrap().push(Arc::clone(&child));
        Ok(child)
    }

    fn query(&self, address: VirtualAddress) -> Option<Mapping> {
        self.mappings.lock().unwrap().get(&address.page_base()).copied()
    }
}
