//! The heap engine.
//!
//! Owns one contiguous region and maintains an address-ordered doubly
//! linked chain of block headers inside it. Placement is delegated to
//! [`Strategy`]; splitting and coalescing keep the chain equal to the
//! memory layout at all times.
//!
//! A `Heap` is an explicit context value, so several independent heaps can
//! coexist in one process. Dropping it releases the whole region in a
//! single call, invalidating every address handed out from it.

use std::ptr::NonNull;

use log::{debug, error, info, warn};

use crate::block::{ALIGN, BlockIter, BlockRef, HEADER_SIZE, MIN_PAYLOAD, align_up};
use crate::error::{AllocError, AllocResult};
use crate::strategy::Strategy;
use crate::system::Region;

/// Read-only view of one block, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockView {
    /// Address of the block header.
    pub addr: usize,
    /// Payload capacity in bytes.
    pub size: usize,
    pub free: bool,
}

/// Aggregate numbers over the whole block chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    /// Reserved region length, headers included.
    pub total_bytes: usize,
    /// Payload bytes of in-use blocks.
    pub used_bytes: usize,
    /// Payload bytes of free blocks.
    pub free_bytes: usize,
    pub block_count: usize,
    pub free_blocks: usize,
    /// Largest single free payload span; the upper bound on what
    /// `allocate` can currently satisfy.
    pub largest_free: usize,
}

pub struct Heap {
    region: Region,
    head: BlockRef,
    strategy: Strategy,
}

impl Heap {
    /// Reserves a region of `total_size` bytes (aligned up to 8) and
    /// installs one spanning free block.
    ///
    /// Fails with `OutOfMemory` when the OS refuses the reservation and
    /// with `InvalidArgument` when the size cannot hold even one block.
    pub fn new(total_size: usize) -> AllocResult<Heap> {
        let total = align_up(total_size);
        if total < HEADER_SIZE + MIN_PAYLOAD {
            return Err(AllocError::InvalidArgument(
                "heap size cannot hold a single block",
            ));
        }

        let Some(region) = Region::reserve(total) else {
            error!("heap init failed: cannot reserve {total} bytes");
            return Err(AllocError::OutOfMemory {
                requested: total,
                available: 0,
            });
        };

        // SAFETY: the region is freshly reserved, page-aligned and fully
        // owned by this heap
        let head = unsafe { BlockRef::init_at(region.base(), total - HEADER_SIZE, None, None) };

        info!(
            "heap ready: {} bytes at 0x{:x}, {} usable",
            total,
            head.addr(),
            head.size()
        );
        Ok(Heap {
            region,
            head,
            strategy: Strategy::default(),
        })
    }

    /// Swaps the placement policy. Takes effect on the next allocation.
    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.strategy = strategy;
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Reserved region length in bytes.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.region.len()
    }

    /// Whether `ptr` falls inside this heap's region. Used to route a
    /// release when several allocators share the process.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        self.region.contains(ptr.as_ptr() as usize)
    }

    /// Allocates `size` payload bytes and returns the address just past
    /// the block header.
    pub fn allocate(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        if size == 0 {
            return Err(AllocError::InvalidArgument("zero-sized allocation"));
        }
        let size = align_up(size);

        let Some(block) = self.strategy.select(self.iter(), size) else {
            let available = self.stats().largest_free;
            error!("heap exhausted: requested {size} bytes, largest free span {available}");
            return Err(AllocError::OutOfMemory {
                requested: size,
                available,
            });
        };

        // Carve off the remainder when it is worth a header of its own;
        // a smaller leftover stays attached as slack.
        block.try_split(size);
        block.set_free(false);
        block.stamp_tag();

        debug!(
            "allocated {} bytes at 0x{:x} ({})",
            block.size(),
            block.payload().as_ptr() as usize,
            self.strategy
        );
        Ok(block.payload())
    }

    /// Releases a payload address previously returned by [`allocate`](Heap::allocate).
    ///
    /// The header in front of the address is validated before anything is
    /// touched: an address outside the region or with a failing integrity
    /// tag is `InvalidArgument`, a block that is already free is
    /// `DoubleFree`. A rejected release modifies nothing.
    pub fn release(&mut self, ptr: NonNull<u8>) -> AllocResult<()> {
        let addr = ptr.as_ptr() as usize;
        if !self.plausible_payload(addr) {
            return Err(AllocError::InvalidArgument(
                "address was not issued by this heap",
            ));
        }

        // SAFETY: the range check above keeps the header read inside the
        // region; the tag check below tells real headers apart from
        // arbitrary payload bytes
        let block = unsafe { BlockRef::from_payload(ptr) };
        if !block.tag_ok() {
            warn!("rejecting release of 0x{addr:x}: integrity tag mismatch");
            return Err(AllocError::InvalidArgument("block integrity check failed"));
        }
        if block.is_free() {
            warn!("double free of 0x{addr:x}");
            return Err(AllocError::DoubleFree(addr));
        }

        block.set_free(true);
        debug!("released {} bytes at 0x{addr:x}", block.size());

        // Forward merge, then give the predecessor one forward merge of
        // its own; together that covers both directions of a release
        // between two free neighbors.
        self.coalesce_forward(block);
        if let Some(prev) = block.prev()
            && prev.is_free()
        {
            self.coalesce_forward(prev);
        }
        Ok(())
    }

    fn coalesce_forward(&mut self, block: BlockRef) {
        if let Some(next) = block.next()
            && next.is_free()
        {
            debug!(
                "coalescing 0x{:x} (+{}) with 0x{:x} (+{})",
                block.addr(),
                block.size(),
                next.addr(),
                next.size()
            );
            block.absorb_next();
        }
    }

    /// Read-only walk over the chain in address order.
    pub fn blocks(&self) -> impl Iterator<Item = BlockView> + '_ {
        self.iter().map(|b| BlockView {
            addr: b.addr(),
            size: b.size(),
            free: b.is_free(),
        })
    }

    /// Aggregates over one full chain scan.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            total_bytes: self.region.len(),
            ..HeapStats::default()
        };
        for block in self.iter() {
            stats.block_count += 1;
            if block.is_free() {
                stats.free_blocks += 1;
                stats.free_bytes += block.size();
                stats.largest_free = stats.largest_free.max(block.size());
            } else {
                stats.used_bytes += block.size();
            }
        }
        stats
    }

    /// Writes a human-readable listing of every block to the diagnostic
    /// stream. Read-only; for tooling and tests.
    pub fn dump(&self) {
        info!(
            "heap dump: {} bytes total, strategy {}",
            self.region.len(),
            self.strategy
        );
        for block in self.blocks() {
            info!(
                "  block 0x{:x} | size {:>8} | {}",
                block.addr,
                block.size,
                if block.free { "free" } else { "used" }
            );
        }
    }

    pub(crate) fn iter(&self) -> BlockIter {
        BlockIter::new(self.head)
    }

    pub(crate) fn head(&self) -> BlockRef {
        self.head
    }

    /// Whether `addr` could be a payload address of this heap: inside
    /// the region, aligned, and with room for a header in front of it.
    pub(crate) fn plausible_payload(&self, addr: usize) -> bool {
        let base = self.region.base().as_ptr() as usize;
        self.region.contains(addr) && addr >= base + HEADER_SIZE && addr.is_multiple_of(ALIGN)
    }
}
