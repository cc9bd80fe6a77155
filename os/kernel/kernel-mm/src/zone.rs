//! # Physical Zone (Buddy Allocator)
//!
//! A [`PhysicalZone`] governs one physically contiguous, page-aligned range and
//! hands out naturally aligned power-of-two blocks of it.
//!
//! ## Units
//!
//! The zone's bookkeeping unit is the *chunk*, half a page. Blocks are
//! addressed by the [`ChunkIndex`] of their first chunk. A block of order `k`
//! spans `2^k` pages, i.e. `2^(k+1)` chunks:
//!
//! ```text
//! order 0  ▕██▏                       1 page,  2 chunks
//! order 1  ▕████▏                     2 pages, 4 chunks
//! order 2  ▕████████▏                 4 pages, 8 chunks
//!   ...
//! order 12 ▕███ … ███▏                4096 pages (16 MiB)
//! ```
//!
//! ## Buckets
//!
//! Every order owns a doubly linked free list and, below [`MAX_ORDER`], a
//! bitmap with one bit per *buddy pair*. The bit means "exactly one block of
//! the pair is free":
//!
//! ```text
//!            pair p at order k
//!  ┌───────────────┬───────────────┐
//!  │  lower half   │  upper half   │   bit(p) = free(lower) XOR free(upper)
//!  └───────────────┴───────────────┘
//! ```
//!
//! Splitting a block leaves one half free and hands out the other, so it sets
//! the bit. Freeing a block whose bit is set means its buddy is free as well.
//! The two coalesce and the search continues one order up.
//!
//! The zone is not synchronized; the physical memory manager serializes every
//! call under its own lock.

use crate::bitmap::Bitmap;
use alloc::vec;
use alloc::vec::Vec;
use core::array;
use kernel_info::memory::{ZONE_CHUNK_SIZE, ZONE_MAX_ORDER};
use kernel_memory_addresses::PhysicalAddress;
use log::{debug, trace};

/// Highest block order a zone manages.
pub const MAX_ORDER: usize = ZONE_MAX_ORDER;

/// Index of a chunk (half page) relative to the zone base.
pub type ChunkIndex = usize;

/// End-of-list marker in the link array.
const NIL: u32 = u32::MAX;

/// `free_order` of a block that is not on any free list.
const NOT_FREE: u8 = u8::MAX;

/// Chunks in a block of `order`.
#[inline]
#[must_use]
pub const fn block_chunks(order: usize) -> usize {
    2 << order
}

/// Smallest order whose block covers `page_count` pages.
#[must_use]
pub const fn order_for_pages(page_count: usize) -> usize {
    if page_count <= 1 {
        0
    } else {
        (usize::BITS - (page_count - 1).leading_zeros()) as usize
    }
}

/// Free-list membership of the block starting at a given page.
///
/// Blocks always start on an even chunk, so one link per page suffices.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct Link {
    prev: u32,
    next: u32,
    free_order: u8,
}

const UNLINKED: Link = Link {
    prev: NIL,
    next: NIL,
    free_order: NOT_FREE,
};

#[derive(Clone, Debug, PartialEq, Eq)]
struct Bucket {
    /// Page index of the first free block, or [`NIL`].
    freelist: u32,
    free_blocks: usize,
    /// One bit per buddy pair; empty at [`MAX_ORDER`].
    bitmap: Bitmap,
}

/// Buddy allocator over one contiguous physical range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhysicalZone {
    base_address: PhysicalAddress,
    page_count: usize,
    used_chunks: usize,
    buckets: [Bucket; MAX_ORDER + 1],
    links: Vec<Link>,
}

impl PhysicalZone {
    /// Creates a zone over `page_count` pages starting at `base_address`.
    ///
    /// The range is seeded with the largest naturally aligned blocks that fit.
    /// A zone of zero pages is legal and never has anything to hand out.
    ///
    /// # Panics
    /// Panics if `base_address` is not page-aligned or the range has more
    /// chunks than the 32-bit links can address.
    #[must_use]
    pub fn new(base_address: PhysicalAddress, page_count: usize) -> Self {
        assert!(
            base_address.is_page_aligned(),
            "zone base {base_address:?} is not page-aligned"
        );
        assert!(
            page_count.checked_mul(2).is_some_and(|c| c < NIL as usize),
            "zone of {page_count} pages is too large"
        );

        let chunk_count = page_count * 2;
        let buckets = array::from_fn(|order| Bucket {
            freelist: NIL,
            free_blocks: 0,
            bitmap: Bitmap::new(if order < MAX_ORDER {
                chunk_count.div_ceil(block_chunks(order + 1))
            } else {
                0
            }),
        });

        let mut zone = Self {
            base_address,
            page_count,
            used_chunks: 0,
            buckets,
            links: vec![UNLINKED; page_count],
        };

        let mut seeds = Vec::new();
        let mut index = 0;
        while index < chunk_count {
            let mut order = MAX_ORDER;
            while order > 0
                && (index % block_chunks(order) != 0 || index + block_chunks(order) > chunk_count)
            {
                order -= 1;
            }
            seeds.push((index, order));
            index += block_chunks(order);
        }

        // Push in reverse so that low addresses end up at the list heads.
        for &(index, order) in seeds.iter().rev() {
            zone.push_free(order, index);
            if order < MAX_ORDER {
                // The buddy of a seed block is never free: had it fit, the
                // pair would have been seeded one order up.
                zone.set_buddy_bit(order, index, true);
            }
        }

        debug!(
            "zone {base_address:?}: {page_count} pages seeded as {} blocks",
            seeds.len()
        );
        zone
    }

    #[inline]
    #[must_use]
    pub const fn base_address(&self) -> PhysicalAddress {
        self.base_address
    }

    #[inline]
    #[must_use]
    pub const fn page_count(&self) -> usize {
        self.page_count
    }

    #[inline]
    #[must_use]
    pub const fn chunk_count(&self) -> usize {
        self.page_count * 2
    }

    #[inline]
    #[must_use]
    pub const fn used_chunks(&self) -> usize {
        self.used_chunks
    }

    /// Pages not currently handed out.
    #[inline]
    #[must_use]
    pub const fn available(&self) -> usize {
        self.page_count - self.used_chunks / 2
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.available() == 0
    }

    /// Whether `address` lies inside this zone.
    #[must_use]
    pub fn contains(&self, address: PhysicalAddress) -> bool {
        address >= self.base_address
            && address.offset_from(self.base_address) < self.page_count as u64 * 2 * ZONE_CHUNK_SIZE
    }

    /// Number of free blocks currently on the free list of `order`.
    #[must_use]
    pub fn free_block_count(&self, order: usize) -> usize {
        self.buckets[order].free_blocks
    }

    #[inline]
    #[must_use]
    pub fn chunk_address(&self, index: ChunkIndex) -> PhysicalAddress {
        self.base_address + index as u64 * ZONE_CHUNK_SIZE
    }

    /// Chunk index of `address`, if the zone contains it.
    #[must_use]
    pub fn chunk_index(&self, address: PhysicalAddress) -> Option<ChunkIndex> {
        self.contains(address)
            .then(|| (address.offset_from(self.base_address) / ZONE_CHUNK_SIZE) as usize)
    }

    /// Allocates a block of `order`, splitting larger blocks as needed.
    ///
    /// Returns `None` when no block of `order` or above is free.
    ///
    /// # Panics
    /// Panics if `order` exceeds [`MAX_ORDER`], or if the buddy bookkeeping is
    /// found corrupted.
    pub fn allocate_block(&mut self, order: usize) -> Option<ChunkIndex> {
        assert!(order <= MAX_ORDER, "block order {order} exceeds {MAX_ORDER}");
        let index = self.allocate_block_impl(order)?;
        self.used_chunks += block_chunks(order);
        trace!(
            "zone {:?}: allocated order-{order} block at chunk {index}",
            self.base_address
        );
        Some(index)
    }

    fn allocate_block_impl(&mut self, order: usize) -> Option<ChunkIndex> {
        if let Some(index) = self.pop_free(order) {
            if order < MAX_ORDER {
                assert!(
                    self.buddy_bit(order, index),
                    "buddy zone corrupted: free order-{order} block {index} has a clear pair bit"
                );
                self.set_buddy_bit(order, index, false);
            }
            return Some(index);
        }

        if order == MAX_ORDER {
            return None;
        }

        let index = self.allocate_block_impl(order + 1)?;

        // Keep the lower half, hand out the upper one.
        assert!(
            !self.buddy_bit(order, index),
            "buddy zone corrupted: split order-{} block {index} has a set pair bit",
            order + 1
        );
        self.push_free(order, index);
        self.set_buddy_bit(order, index, true);
        Some(index + block_chunks(order))
    }

    /// Returns a block to the zone, coalescing it with free buddies.
    ///
    /// # Panics
    /// Panics if `order` exceeds [`MAX_ORDER`], if `index` is not a block of
    /// `order` inside this zone, if any part of the block (or a block
    /// containing it) is already free, or if the buddy bookkeeping is found corrupted.
    pub fn deallocate_block(&mut self, index: ChunkIndex, order: usize) {
        assert!(order <= MAX_ORDER, "block order {order} exceeds {MAX_ORDER}");
        assert!(
            index % block_chunks(order) == 0 && index + block_chunks(order) <= self.chunk_count(),
            "chunk {index} is not an order-{order} block of this zone"
        );
        assert!(
            self.used_chunks >= block_chunks(order),
            "freeing order-{order} block {index} exceeds the allocated amount"
        );
        for enclosing_order in order..=MAX_ORDER {
            let enclosing = index & !(block_chunks(enclosing_order) - 1);
            assert!(
                !self.is_free_block(enclosing, enclosing_order),
                "double free of order-{order} block {index}"
            );
        }
        let pages = index / 2..(index + block_chunks(order)) / 2;
        assert!(
            self.links[pages].iter().all(|link| link.free_order == NOT_FREE),
            "double free of order-{order} block {index}: part of it is already free"
        );

        self.deallocate_block_impl(index, order);
        self.used_chunks -= block_chunks(order);
        trace!(
            "zone {:?}: freed order-{order} block at chunk {index}",
            self.base_address
        );
    }

    fn deallocate_block_impl(&mut self, index: ChunkIndex, order: usize) {
        if order == MAX_ORDER {
            self.push_free(order, index);
            return;
        }

        if self.buddy_bit(order, index) {
            let buddy = index ^ block_chunks(order);
            self.remove_free(order, buddy);
            self.set_buddy_bit(order, index, false);
            self.deallocate_block_impl(index & !block_chunks(order), order + 1);
        } else {
            self.push_free(order, index);
            self.set_buddy_bit(order, index, true);
        }
    }

    /// [`allocate_block`](Self::allocate_block), returning the block's address.
    pub fn allocate_block_address(&mut self, order: usize) -> Option<PhysicalAddress> {
        self.allocate_block(order).map(|index| self.chunk_address(index))
    }

    /// [`deallocate_block`](Self::deallocate_block) by address.
    ///
    /// # Panics
    /// Panics if the zone does not contain `address`, plus everything
    /// [`deallocate_block`](Self::deallocate_block) panics on.
    pub fn deallocate_block_address(&mut self, address: PhysicalAddress, order: usize) {
        let Some(index) = self.chunk_index(address) else {
            panic!("{address:?} is not part of zone {:?}", self.base_address);
        };
        self.deallocate_block(index, order);
    }

    /// Checks every free list and pair bit against each other.
    ///
    /// # Panics
    /// Panics on the first inconsistency found.
    pub fn verify_integrity(&self) {
        let chunk_count = self.chunk_count();
        let mut covered = Bitmap::new(self.page_count);
        let mut free_chunks = 0;
        let mut listed_blocks = 0;

        for (order, bucket) in self.buckets.iter().enumerate() {
            let mut prev = NIL;
            let mut slot = bucket.freelist;
            let mut count = 0;
            while slot != NIL {
                let link = self.links[slot as usize];
                let index = slot as usize * 2;
                assert_eq!(
                    usize::from(link.free_order),
                    order,
                    "block {index} on the order-{order} list is marked with another order"
                );
                assert_eq!(link.prev, prev, "order-{order} list has a broken back link at {index}");
                assert!(
                    index % block_chunks(order) == 0 && index + block_chunks(order) <= chunk_count,
                    "misplaced order-{order} block {index}"
                );
                for page in slot as usize..(index + block_chunks(order)) / 2 {
                    assert!(!covered.get(page), "page {page} is free in more than one block");
                    covered.set(page, true);
                }
                count += 1;
                free_chunks += block_chunks(order);
                prev = slot;
                slot = link.next;
            }
            assert_eq!(count, bucket.free_blocks, "order-{order} free count is stale");
            listed_blocks += count;

            for pair in 0..bucket.bitmap.len() {
                let lower = pair * block_chunks(order + 1);
                let upper = lower + block_chunks(order);
                let expected = self.is_free_block(lower, order) != self.is_free_block(upper, order);
                assert_eq!(
                    bucket.bitmap.get(pair),
                    expected,
                    "order-{order} pair bit {pair} disagrees with the free lists"
                );
            }
        }

        let marked = self.links.iter().filter(|l| l.free_order != NOT_FREE).count();
        assert_eq!(marked, listed_blocks, "free-marked blocks missing from the free lists");
        assert_eq!(free_chunks + self.used_chunks, chunk_count, "used chunk counter drifted");
    }

    fn is_free_block(&self, index: ChunkIndex, order: usize) -> bool {
        index + block_chunks(order) <= self.chunk_count()
            && usize::from(self.links[index / 2].free_order) == order
    }

    #[inline]
    fn buddy_bit(&self, order: usize, index: ChunkIndex) -> bool {
        self.buckets[order].bitmap.get(index >> (order + 2))
    }

    #[inline]
    fn set_buddy_bit(&mut self, order: usize, index: ChunkIndex, value: bool) {
        self.buckets[order].bitmap.set(index >> (order + 2), value);
    }

    fn push_free(&mut self, order: usize, index: ChunkIndex) {
        let slot = index / 2;
        let head = self.buckets[order].freelist;
        self.links[slot] = Link {
            prev: NIL,
            next: head,
            free_order: order as u8,
        };
        if head != NIL {
            self.links[head as usize].prev = slot as u32;
        }
        self.buckets[order].freelist = slot as u32;
        self.buckets[order].free_blocks += 1;
    }

    fn pop_free(&mut self, order: usize) -> Option<ChunkIndex> {
        let head = self.buckets[order].freelist;
        if head == NIL {
            return None;
        }
        self.unlink(order, head as usize);
        Some(head as usize * 2)
    }

    fn remove_free(&mut self, order: usize, index: ChunkIndex) {
        assert!(
            self.is_free_block(index, order),
            "buddy zone corrupted: block {index} is not on the order-{order} free list"
        );
        self.unlink(order, index / 2);
    }

    fn unlink(&mut self, order: usize, slot: usize) {
        let Link { prev, next, .. } = self.links[slot];
        if prev == NIL {
            self.buckets[order].freelist = next;
        } else {
            self.links[prev as usize].next = next;
        }
        if next != NIL {
            self.links[next as usize].prev = prev;
        }
        self.links[slot] = UNLINKED;
        self.buckets[order].free_blocks -= 1;
    }
}
