use crate::{PAGE_SHIFT, VirtualAddress, is_page_aligned, page_round_down, page_round_up};
use core::fmt;

/// A half-open interval `[base, base + size)` of virtual addresses.
///
/// Ranges never wrap: [`VirtualRange::try_new`] rejects a `base + size` that
/// overflows, and every other constructor derives from an existing range.
///
/// ```rust
/// # use kernel_memory_addresses::*;
/// let region = VirtualRange::new(VirtualAddress::new(0x1000), 0x4000);
/// let hole = VirtualRange::new(VirtualAddress::new(0x2000), 0x1000);
///
/// let [before, after] = region.carve(hole);
/// assert_eq!(before, Some(VirtualRange::new(VirtualAddress::new(0x1000), 0x1000)));
/// assert_eq!(after, Some(VirtualRange::new(VirtualAddress::new(0x3000), 0x2000)));
/// ```
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct VirtualRange {
    base: VirtualAddress,
    size: u64,
}

impl VirtualRange {
    /// Creates a range; `base + size` must not overflow.
    #[inline]
    #[must_use]
    pub const fn new(base: VirtualAddress, size: u64) -> Self {
        debug_assert!(base.as_u64().checked_add(size).is_some());
        Self { base, size }
    }

    /// Creates a range, or `None` if `base + size` overflows.
    #[inline]
    #[must_use]
    pub const fn try_new(base: VirtualAddress, size: u64) -> Option<Self> {
        match base.as_u64().checked_add(size) {
            Some(_) => Some(Self { base, size }),
            None => None,
        }
    }

    /// Creates `[start, end)`, or `None` if `end < start`.
    #[inline]
    #[must_use]
    pub const fn from_bounds(start: VirtualAddress, end: VirtualAddress) -> Option<Self> {
        match end.as_u64().checked_sub(start.as_u64()) {
            Some(size) => Some(Self { base: start, size }),
            None => None,
        }
    }

    /// The smallest page-aligned range covering `[address, address + size)`.
    #[must_use]
    pub const fn expand_to_page_boundaries(address: VirtualAddress, size: u64) -> Option<Self> {
        let Some(end) = address.as_u64().checked_add(size) else {
            return None;
        };
        let Some(end) = page_round_up(end) else {
            return None;
        };
        let base = page_round_down(address.as_u64());
        Some(Self {
            base: VirtualAddress::new(base),
            size: end - base,
        })
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// One past the last address of the range.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        VirtualAddress::new(self.base.as_u64() + self.size)
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of whole pages in the range.
    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> usize {
        (self.size >> PAGE_SHIFT) as usize
    }

    /// Both ends lie on page boundaries.
    #[inline]
    #[must_use]
    pub const fn is_page_aligned(&self) -> bool {
        is_page_aligned(self.base.as_u64()) && is_page_aligned(self.size)
    }

    #[inline]
    #[must_use]
    pub const fn contains_address(&self, address: VirtualAddress) -> bool {
        address.as_u64() >= self.base.as_u64() && address.as_u64() < self.end().as_u64()
    }

    /// Whether `other` lies entirely within `self`.
    #[inline]
    #[must_use]
    pub const fn contains(&self, other: &Self) -> bool {
        other.base.as_u64() >= self.base.as_u64() && other.end().as_u64() <= self.end().as_u64()
    }

    /// Whether the two ranges share at least one address.
    #[inline]
    #[must_use]
    pub const fn intersects(&self, other: &Self) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.base.as_u64() < other.end().as_u64()
            && other.base.as_u64() < self.end().as_u64()
    }

    /// The overlapping part of both ranges.
    #[must_use]
    pub const fn intersect(&self, other: &Self) -> Option<Self> {
        if !self.intersects(other) {
            return None;
        }
        let start = if self.base.as_u64() > other.base.as_u64() {
            self.base
        } else {
            other.base
        };
        let end = if self.end().as_u64() < other.end().as_u64() {
            self.end()
        } else {
            other.end()
        };
        Self::from_bounds(start, end)
    }

    /// Splits off what remains of `self` after removing `taken`.
    ///
    /// Returns the piece below `taken` and the piece above it; either is
    /// `None` when empty. If the ranges do not intersect, `self` comes back
    /// whole as the first piece.
    #[must_use]
    pub const fn carve(&self, taken: Self) -> [Option<Self>; 2] {
        if !self.intersects(&taken) {
            return [Some(*self), None];
        }
        let before = if taken.base.as_u64() > self.base.as_u64() {
            Self::from_bounds(self.base, taken.base)
        } else {
            None
        };
        let after = if taken.end().as_u64() < self.end().as_u64() {
            Self::from_bounds(taken.end(), self.end())
        } else {
            None
        };
        [before, after]
    }

    /// Byte offset of `address` from the start of the range.
    #[inline]
    #[must_use]
    pub const fn offset_of(&self, address: VirtualAddress) -> u64 {
        address.offset_from(self.base)
    }
}

impl fmt::Debug for VirtualRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VirtualRange(0x{:016X}..0x{:016X})",
            self.base.as_u64(),
            self.end().as_u64()
        )
    }
}

impl fmt::Display for VirtualRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.base, self.end())
    }
}
