//! Fixed-size block pools for small, frequent allocations.
//!
//! Each bucket owns one arena sliced into equal slots at initialization;
//! the free list is threaded through the unused slots themselves, so
//! allocation and release are O(1) pointer swaps. Buckets never split or
//! coalesce; internal waste for smaller requests is the accepted price.
//!
//! A pool is an alternate fast path, not a complete allocator: requests
//! it cannot service are *unhandled* rather than failed, and the caller
//! falls back to the heap engine.

use std::ptr::{self, NonNull};

use log::{debug, info, warn};

use crate::block::{ALIGN, align_up};
use crate::error::{AllocError, AllocResult};
use crate::system::Region;

/// One `(block_size, capacity)` size class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketConfig {
    /// Payload bytes every slot of this bucket offers.
    pub block_size: usize,
    /// Number of slots in the bucket's arena.
    pub capacity: usize,
}

/// Default bucket table: three small-object size classes.
pub const DEFAULT_BUCKETS: [BucketConfig; 3] = [
    BucketConfig { block_size: 32, capacity: 64 },
    BucketConfig { block_size: 64, capacity: 64 },
    BucketConfig { block_size: 128, capacity: 32 },
];

/// Sentinel stamped into every slot header at initialization.
const SLOT_TAG: u32 = 0x5107_FEED;

const SLOT_HEADER_SIZE: usize = size_of::<SlotHeader>();

/// Metadata in front of every slot payload.
#[repr(C)]
struct SlotHeader {
    next: *mut SlotHeader,
    tag: u32,
    _reserved: [u8; 4],
}

const _: () = assert!(size_of::<SlotHeader>() == 16);
const _: () = assert!(size_of::<SlotHeader>().is_multiple_of(ALIGN));

struct Bucket {
    block_size: usize,
    capacity: usize,
    /// `None` when the arena reservation failed; the bucket then serves
    /// nothing and every matching request falls through to the heap.
    arena: Option<Region>,
    free_head: *mut SlotHeader,
    free_count: usize,
}

impl Bucket {
    fn new(config: BucketConfig) -> Bucket {
        let block_size = align_up(config.block_size.max(1));
        let stride = SLOT_HEADER_SIZE + block_size;

        let arena = config
            .capacity
            .checked_mul(stride)
            .and_then(Region::reserve);
        let Some(arena) = arena else {
            warn!(
                "pool bucket ({} byte slots) degraded: arena reservation failed",
                block_size
            );
            return Bucket {
                block_size,
                capacity: config.capacity,
                arena: None,
                free_head: ptr::null_mut(),
                free_count: 0,
            };
        };

        // Thread every slot into the free list, lowest address first.
        let base = arena.base().as_ptr();
        let mut head: *mut SlotHeader = ptr::null_mut();
        for index in (0..config.capacity).rev() {
            // SAFETY: index * stride stays inside the arena reserved above
            let slot = unsafe { base.add(index * stride) }.cast::<SlotHeader>();
            // SAFETY: slot points at writable arena bytes owned here
            unsafe {
                ptr::write(
                    slot,
                    SlotHeader {
                        next: head,
                        tag: SLOT_TAG,
                        _reserved: [0; 4],
                    },
                );
            }
            head = slot;
        }

        Bucket {
            block_size,
            capacity: config.capacity,
            arena: Some(arena),
            free_head: head,
            free_count: config.capacity,
        }
    }

    #[inline(always)]
    fn stride(&self) -> usize {
        SLOT_HEADER_SIZE + self.block_size
    }

    fn pop(&mut self) -> Option<NonNull<u8>> {
        let slot = NonNull::new(self.free_head)?;
        // SAFETY: slots on the free list are live headers in this arena
        unsafe {
            self.free_head = (*slot.as_ptr()).next;
            (*slot.as_ptr()).next = ptr::null_mut();
        }
        self.free_count -= 1;
        // SAFETY: the payload follows the header inside the arena
        Some(unsafe { NonNull::new_unchecked(slot.as_ptr().cast::<u8>().add(SLOT_HEADER_SIZE)) })
    }

    fn push(&mut self, slot: NonNull<SlotHeader>) {
        // SAFETY: caller verified the slot belongs to this arena
        unsafe { (*slot.as_ptr()).next = self.free_head };
        self.free_head = slot.as_ptr();
        self.free_count += 1;
    }
}

/// Read-only view of one bucket, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketView {
    pub block_size: usize,
    pub capacity: usize,
    pub free_slots: usize,
}

/// A set of fixed-size buckets examined in ascending slot-size order.
pub struct PoolSet {
    buckets: Vec<Bucket>,
}

impl PoolSet {
    /// Reserves one arena per configured bucket. A failed reservation
    /// degrades that bucket to a permanent fallback instead of aborting
    /// the others.
    #[must_use]
    pub fn new(configs: &[BucketConfig]) -> PoolSet {
        let mut buckets: Vec<Bucket> = configs.iter().copied().map(Bucket::new).collect();
        buckets.sort_by_key(|b| b.block_size);

        info!(
            "pool ready: {} buckets, {} slots total",
            buckets.len(),
            buckets.iter().map(|b| b.free_count).sum::<usize>()
        );
        PoolSet { buckets }
    }

    /// Hands out a slot from the first bucket that fits `size`.
    ///
    /// `None` means *unhandled* (no bucket matches, or all matching
    /// buckets are exhausted) and the caller should use the heap
    /// engine instead. This is not a failure.
    pub fn allocate(&mut self, size: usize) -> Option<NonNull<u8>> {
        for bucket in &mut self.buckets {
            if size <= bucket.block_size
                && let Some(payload) = bucket.pop()
            {
                debug!(
                    "pool served {} bytes from the {}-byte bucket",
                    size, bucket.block_size
                );
                return Some(payload);
            }
        }
        None
    }

    /// Takes back a slot if `ptr` belongs to one of the arenas.
    ///
    /// Returns `Ok(false)` (*unhandled*) when the address is not pool
    /// memory, so the caller can retry the release against the heap.
    /// An address inside an arena that is not a valid slot is
    /// `InvalidArgument`.
    pub fn release(&mut self, ptr: NonNull<u8>) -> AllocResult<bool> {
        let slot_addr = (ptr.as_ptr() as usize).wrapping_sub(SLOT_HEADER_SIZE);

        for bucket in &mut self.buckets {
            let Some(arena) = bucket.arena.as_ref() else {
                continue;
            };
            if !arena.contains(slot_addr) {
                continue;
            }

            let offset = slot_addr - arena.base().as_ptr() as usize;
            if !offset.is_multiple_of(bucket.stride()) {
                warn!("rejecting pool release of 0x{:x}: not a slot boundary", ptr.as_ptr() as usize);
                return Err(AllocError::InvalidArgument(
                    "address is not a pool slot",
                ));
            }

            // SAFETY: containment and the stride check put a real slot
            // header behind this address
            let slot = unsafe { NonNull::new_unchecked(slot_addr as *mut SlotHeader) };
            if unsafe { (*slot.as_ptr()).tag } != SLOT_TAG {
                warn!(
                    "rejecting pool release of 0x{:x}: integrity tag mismatch",
                    ptr.as_ptr() as usize
                );
                return Err(AllocError::InvalidArgument(
                    "pool slot integrity check failed",
                ));
            }

            bucket.push(slot);
            debug!(
                "pool reclaimed a slot in the {}-byte bucket",
                bucket.block_size
            );
            return Ok(true);
        }
        Ok(false)
    }

    /// Read-only per-bucket counters, ascending by slot size.
    pub fn buckets(&self) -> impl Iterator<Item = BucketView> + '_ {
        self.buckets.iter().map(|b| BucketView {
            block_size: b.block_size,
            capacity: b.capacity,
            free_slots: b.free_count,
        })
    }

    /// Writes a per-bucket occupancy listing to the diagnostic stream.
    pub fn dump(&self) {
        info!("pool dump: {} buckets", self.buckets.len());
        for (index, bucket) in self.buckets.iter().enumerate() {
            info!(
                "  bucket {} | slot size {:>4} | free {:>3} of {:>3}{}",
                index,
                bucket.block_size,
                bucket.free_count,
                bucket.capacity,
                if bucket.arena.is_none() { " (degraded)" } else { "" }
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhaustion_after_capacity_slots() {
        let mut pool = PoolSet::new(&[BucketConfig {
            block_size: 16,
            capacity: 4,
        }]);

        let mut addrs = Vec::new();
        for _ in 0..4 {
            addrs.push(pool.allocate(16).expect("slot").as_ptr() as usize);
        }
        assert!(pool.allocate(16).is_none(), "fifth request is unhandled");

        // Pairwise distinct and non-overlapping.
        addrs.sort_unstable();
        assert!(addrs.windows(2).all(|w| w[1] - w[0] >= 16));
    }

    #[test]
    fn test_release_reuses_slot_lifo() {
        let mut pool = PoolSet::new(&[BucketConfig {
            block_size: 32,
            capacity: 8,
        }]);

        let first = pool.allocate(32).expect("slot");
        assert_eq!(pool.release(first), Ok(true));
        let second = pool.allocate(32).expect("slot");
        assert_eq!(first, second, "released slot is handed out next");
    }

    #[test]
    fn test_oversized_request_is_unhandled() {
        let mut pool = PoolSet::new(&DEFAULT_BUCKETS);
        assert!(pool.allocate(129).is_none());
        assert!(pool.allocate(4096).is_none());
    }

    #[test]
    fn test_request_routes_to_smallest_fitting_bucket() {
        let mut pool = PoolSet::new(&DEFAULT_BUCKETS);

        let ptr = pool.allocate(40).expect("slot");
        let counts: Vec<BucketView> = pool.buckets().collect();
        assert_eq!(counts[0].free_slots, counts[0].capacity, "32s untouched");
        assert_eq!(counts[1].free_slots, counts[1].capacity - 1, "64s served");
        assert_eq!(counts[2].free_slots, counts[2].capacity, "128s untouched");

        assert_eq!(pool.release(ptr), Ok(true));
        assert!(
            pool.buckets().all(|b| b.free_slots == b.capacity),
            "counts restored after release"
        );
    }

    #[test]
    fn test_exhausted_bucket_falls_through_to_larger() {
        let mut pool = PoolSet::new(&[
            BucketConfig { block_size: 32, capacity: 1 },
            BucketConfig { block_size: 64, capacity: 1 },
        ]);

        let _a = pool.allocate(32).expect("from the 32-byte bucket");
        let _b = pool.allocate(32).expect("from the 64-byte bucket");
        assert!(pool.allocate(32).is_none(), "both classes exhausted");
    }

    #[test]
    fn test_buckets_kept_in_ascending_order() {
        let pool = PoolSet::new(&[
            BucketConfig { block_size: 128, capacity: 1 },
            BucketConfig { block_size: 32, capacity: 1 },
            BucketConfig { block_size: 64, capacity: 1 },
        ]);

        let sizes: Vec<usize> = pool.buckets().map(|b| b.block_size).collect();
        assert_eq!(sizes, vec![32, 64, 128]);
    }

    #[test]
    fn test_foreign_address_is_unhandled() {
        let mut pool = PoolSet::new(&DEFAULT_BUCKETS);
        let mut local = 0u64;
        let foreign = NonNull::from(&mut local).cast::<u8>();

        assert_eq!(pool.release(foreign), Ok(false));
    }

    #[test]
    fn test_corrupted_slot_header_rejected() {
        let mut pool = PoolSet::new(&[BucketConfig {
            block_size: 32,
            capacity: 2,
        }]);
        let ptr = pool.allocate(32).expect("slot");

        // Scribble over the integrity tag sitting just before the payload.
        unsafe { ptr.as_ptr().sub(8).cast::<u32>().write(0) };

        assert!(matches!(
            pool.release(ptr),
            Err(AllocError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_overflowing_bucket_degrades_quietly() {
        let mut pool = PoolSet::new(&[
            BucketConfig { block_size: 8, capacity: usize::MAX / 2 },
            BucketConfig { block_size: 16, capacity: 2 },
        ]);

        // The impossible bucket serves nothing; the sane one still works.
        assert!(pool.allocate(8).is_some());
        let degraded = pool.buckets().find(|b| b.block_size == 8).expect("bucket");
        assert_eq!(degraded.free_slots, 0);
    }

    #[test]
    fn test_zero_capacity_bucket_serves_nothing() {
        let mut pool = PoolSet::new(&[BucketConfig {
            block_size: 32,
            capacity: 0,
        }]);
        assert!(pool.allocate(16).is_none());
    }
}
