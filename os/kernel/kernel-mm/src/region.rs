//! # Regions
//!
//! A [`Region`] is a contiguous, page-aligned virtual range of one address
//! space, backed by a window of a [`VmObject`] starting at
//! `offset_in_vmobject`:
//!
//! ```text
//!  virtual:   range.base()                      range.end()
//!                 │◀────────── range.size() ──────────▶│
//!                 ▼                                     ▼
//!  VmObject: [pg0][pg1][pg2][pg3][pg4][pg5][pg6][pg7][pg8]
//!                 ▲
//!                 └─ offset_in_vmobject = 2 pages
//! ```
//!
//! Once attached to a [`PageDirectory`] the Region keeps its translations in
//! sync with the object: the object calls back into every Region mapping it
//! whenever a page slot changes. Pages marked copy-on-write are installed
//! without write access in private mappings.

use crate::access::{Access, RegionFlags};
use crate::error::MmError;
use crate::page_directory::PageDirectory;
use crate::physical_page::PhysicalPageRef;
use crate::vmobject::VmObject;
use alloc::string::String;
use alloc::sync::Arc;
use core::fmt;
use core::ops::Range;
use core::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{VirtualAddress, VirtualRange, is_page_aligned};
use kernel_sync::SpinLock;
use log::trace;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(u64);

impl RegionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region#{}", self.0)
    }
}

pub struct Region {
    id: RegionId,
    range: VirtualRange,
    offset_in_vmobject: u64,
    vmobject: Arc<VmObject>,
    name: Option<String>,
    access: Access,
    shared: bool,
    flags: AtomicU8,
    page_directory: SpinLock<Option<Arc<dyn PageDirectory>>>,
}

impl Region {
    /// Creates a Region over `vmobject` and registers it there.
    ///
    /// The Region is not mapped anywhere until [`map`](Self::map) is called.
    ///
    /// # Errors
    /// [`MmError::InvalidRange`] if `range` is empty or unaligned, or if the
    /// window does not fit inside the object; [`MmError::Overflow`] if the
    /// window end is not representable.
    pub fn try_create(
        range: VirtualRange,
        vmobject: Arc<VmObject>,
        offset_in_vmobject: u64,
        name: Option<String>,
        access: Access,
        shared: bool,
    ) -> Result<Arc<Self>, MmError> {
        if range.is_empty() || !range.is_page_aligned() || !is_page_aligned(offset_in_vmobject) {
            return Err(MmError::InvalidRange(range));
        }
        let window_end = offset_in_vmobject
            .checked_add(range.size())
            .ok_or(MmError::Overflow)?;
        if window_end > vmobject.size() {
            return Err(MmError::InvalidRange(range));
        }

        let region = Arc::new(Self {
            id: RegionId::next(),
            range,
            offset_in_vmobject,
            vmobject,
            name,
            access,
            shared,
            flags: AtomicU8::new(RegionFlags::new().into_bits()),
            page_directory: SpinLock::new(None),
        });
        region.vmobject.add_region(&region);
        trace!("{}: created {region:?}", region.id);
        Ok(region)
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> RegionId {
        self.id
    }

    #[inline]
    #[must_use]
    pub const fn range(&self) -> VirtualRange {
        self.range
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.range.base()
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.range.size()
    }

    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> usize {
        self.range.page_count()
    }

    #[inline]
    #[must_use]
    pub const fn offset_in_vmobject(&self) -> u64 {
        self.offset_in_vmobject
    }

    #[inline]
    #[must_use]
    pub const fn vmobject(&self) -> &Arc<VmObject> {
        &self.vmobject
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[inline]
    #[must_use]
    pub const fn access(&self) -> Access {
        self.access
    }

    #[inline]
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        self.access.readable()
    }

    #[inline]
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        self.access.writable()
    }

    #[inline]
    #[must_use]
    pub const fn is_executable(&self) -> bool {
        self.access.executable()
    }

    /// Whether changes through this Region are visible to other mappings of
    /// the same object.
    #[inline]
    #[must_use]
    pub const fn is_shared(&self) -> bool {
        self.shared
    }

    /// Index of the object's page backing the Region's first page.
    #[inline]
    #[must_use]
    pub const fn first_page_index(&self) -> usize {
        (self.offset_in_vmobject / PAGE_SIZE) as usize
    }

    /// The object's page indices this Region covers.
    #[must_use]
    pub const fn vmobject_window(&self) -> Range<usize> {
        self.first_page_index()..self.first_page_index() + self.page_count()
    }

    /// The object's page index backing `address`.
    ///
    /// # Panics
    /// Panics if `address` lies outside the Region.
    #[must_use]
    pub fn translate_to_vmobject_page(&self, address: VirtualAddress) -> usize {
        assert!(
            self.range.contains_address(address),
            "{address} is outside {}",
            self.range
        );
        self.first_page_index() + (self.range.offset_of(address) / PAGE_SIZE) as usize
    }

    #[must_use]
    pub fn should_cow(&self, page_index: usize) -> bool {
        self.vmobject
            .should_cow(self.first_page_index() + page_index, self.shared)
    }

    #[must_use]
    pub fn flags(&self) -> RegionFlags {
        RegionFlags::from_bits(self.flags.load(Ordering::Acquire))
    }

    pub(crate) fn set_flags(&self, flags: RegionFlags) {
        self.flags.store(flags.into_bits(), Ordering::Release);
    }

    fn update_flags(&self, update: impl Fn(RegionFlags) -> RegionFlags) {
        let mut current = self.flags.load(Ordering::Acquire);
        loop {
            let next = update(RegionFlags::from_bits(current)).into_bits();
            match self
                .flags
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    #[must_use]
    pub fn is_stack(&self) -> bool {
        self.flags().stack()
    }

    pub fn set_stack(&self, stack: bool) {
        self.update_flags(|flags| flags.with_stack(stack));
    }

    #[must_use]
    pub fn is_mmap(&self) -> bool {
        self.flags().mmap()
    }

    pub fn set_mmap(&self, mmap: bool) {
        self.update_flags(|flags| flags.with_mmap(mmap));
    }

    #[must_use]
    pub fn is_syscall_region(&self) -> bool {
        self.flags().syscall()
    }

    pub fn set_syscall_region(&self, syscall: bool) {
        self.update_flags(|flags| flags.with_syscall(syscall));
    }

    /// Attaches the Region to `page_directory` and installs all its pages.
    ///
    /// A Region that is already mapped is removed from its previous
    /// directory first.
    ///
    /// # Errors
    /// Whatever the page directory reports; the Region stays attached and a
    /// later [`unmap`](Self::unmap) removes what was installed.
    pub fn map(&self, page_directory: Arc<dyn PageDirectory>) -> Result<(), MmError> {
        let previous = self.page_directory.lock().replace(page_directory);
        if let Some(previous) = previous {
            previous.remove(self.range);
            trace!("{}: moved off its previous page directory", self.id);
        }
        self.remap()
    }

    /// Re-installs every page, e.g. after copy-on-write marks changed.
    ///
    /// Does nothing while the Region is not mapped.
    ///
    /// # Errors
    /// Whatever the page directory reports.
    pub fn remap(&self) -> Result<(), MmError> {
        let Some(page_directory) = self.page_directory() else {
            return Ok(());
        };
        self.vmobject
            .with_page_window(self.vmobject_window(), self.shared, |pages, cow| {
                self.install_pages(page_directory.as_ref(), 0, pages, cow)
            })
    }

    /// Re-installs the page backed by slot `index` of the object, if this
    /// Region covers it.
    ///
    /// # Errors
    /// Whatever the page directory reports.
    pub fn remap_vmobject_page(&self, index: usize) -> Result<(), MmError> {
        let window = self.vmobject_window();
        if !window.contains(&index) {
            return Ok(());
        }
        let Some(page_directory) = self.page_directory() else {
            return Ok(());
        };
        self.vmobject
            .with_page_window(index..index + 1, self.shared, |pages, cow| {
                self.install_pages(page_directory.as_ref(), index - window.start, pages, cow)
            })
    }

    /// Installs `pages` starting at the Region's page `first_page`, in runs
    /// of equal copy-on-write state.
    fn install_pages(
        &self,
        page_directory: &dyn PageDirectory,
        first_page: usize,
        pages: &[Option<PhysicalPageRef>],
        cow: &[bool],
    ) -> Result<(), MmError> {
        let mut start = 0;
        while start < pages.len() {
            let run_cow = cow[start];
            let run = cow[start..].iter().take_while(|&&c| c == run_cow).count();
            let access = if run_cow {
                self.access.without_write()
            } else {
                self.access
            };
            let base = self.range.base() + (first_page + start) as u64 * PAGE_SIZE;
            page_directory.install(
                VirtualRange::new(base, run as u64 * PAGE_SIZE),
                &pages[start..start + run],
                access,
            )?;
            start += run;
        }
        Ok(())
    }

    /// Removes the Region's translations and detaches it from its page
    /// directory.
    pub fn unmap(&self) {
        let page_directory = self.page_directory.lock().take();
        if let Some(page_directory) = page_directory {
            page_directory.remove(self.range);
            trace!("{}: unmapped {}", self.id, self.range);
        }
    }

    #[must_use]
    pub fn is_mapped(&self) -> bool {
        self.page_directory.lock().is_some()
    }

    #[must_use]
    pub fn page_directory(&self) -> Option<Arc<dyn PageDirectory>> {
        self.page_directory.lock().clone()
    }

    /// A copy of this Region for a forked address space; not yet mapped.
    ///
    /// Shared Regions (and device memory) reference the same object. Private
    /// Regions get a copy-on-write clone of it.
    ///
    /// # Errors
    /// [`MmError::OutOfMemory`] if the object cannot be cloned.
    pub fn try_clone(&self) -> Result<Arc<Self>, MmError> {
        let vmobject = if self.shared || self.vmobject.is_mmio() {
            Arc::clone(&self.vmobject)
        } else {
            self.vmobject.try_clone()?
        };
        let clone = Self::try_create(
            self.range,
            vmobject,
            self.offset_in_vmobject,
            self.name.clone(),
            self.access,
            self.shared,
        )?;
        clone.set_flags(self.flags());
        Ok(clone)
    }

    /// Bytes of the Region backed by a frame.
    #[must_use]
    pub fn amount_resident(&self) -> u64 {
        self.vmobject.resident_pages_in(self.vmobject_window()) as u64 * PAGE_SIZE
    }

    /// Bytes of the Region whose frames are referenced elsewhere too.
    #[must_use]
    pub fn amount_shared(&self) -> u64 {
        self.vmobject.shared_pages_in(self.vmobject_window()) as u64 * PAGE_SIZE
    }

    /// Bytes that would have to be written back (inode memory) or preserved
    /// (anonymous memory) to drop the Region's frames.
    #[must_use]
    pub fn amount_dirty(&self) -> u64 {
        if !self.vmobject.is_inode() {
            return self.amount_resident();
        }
        self.vmobject.dirty_pages_in(self.vmobject_window()) as u64 * PAGE_SIZE
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        self.unmap();
        self.vmobject.remove_region(self);
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("id", &self.id)
            .field("range", &self.range)
            .field("vmobject", &self.vmobject.id())
            .field("offset", &self.offset_in_vmobject)
            .field("name", &self.name)
            .field("access", &self.access)
            .field("shared", &self.shared)
            .finish_non_exhaustive()
    }
}
