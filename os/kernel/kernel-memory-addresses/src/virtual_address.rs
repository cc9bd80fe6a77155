use crate::{PAGE_SHIFT, PAGE_SIZE, align_up, is_page_aligned, page_round_down};
use core::fmt;
use core::ops::{Add, AddAssign};

/// Virtual memory address.
///
/// Only meaningful relative to the address space (page directory) it is
/// translated by.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u64);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub fn from_ptr<T>(ptr: *const T) -> Self {
        Self(ptr as u64)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        is_page_aligned(self.0)
    }

    /// The base address of the page containing `self`.
    #[inline]
    #[must_use]
    pub const fn page_base(self) -> Self {
        Self(page_round_down(self.0))
    }

    /// Rounds up to the next page boundary, or `None` on overflow.
    #[inline]
    #[must_use]
    pub const fn page_round_up(self) -> Option<Self> {
        match align_up(self.0, PAGE_SIZE) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Page number of the page containing `self`.
    #[inline]
    #[must_use]
    pub const fn page_number(self) -> u64 {
        self.0 >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Distance in bytes from `origin` up to `self`.
    ///
    /// # Panics
    /// Panics in debug builds if `origin` lies above `self`.
    #[inline]
    #[must_use]
    pub const fn offset_from(self, origin: Self) -> u64 {
        self.0 - origin.0
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl Add<u64> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u64> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u64) {
        self.0 += rhs;
    }
}

impl From<VirtualAddress> for u64 {
    #[inline]
    fn from(value: VirtualAddress) -> Self {
        value.0
    }
}
