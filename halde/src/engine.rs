//! Routing facade over the pool layer and the heap engine.
//!
//! One [`Engine`] is one address space: requests small enough for a
//! bucket take the O(1) pool path, everything else goes through the
//! heap; a release is routed back by address-range membership. The
//! collector only ever runs over the heap; pool slots are not subject
//! to collection.

use std::ptr::NonNull;

use crate::error::{AllocError, AllocResult};
use crate::gc::GcStats;
use crate::heap::Heap;
use crate::pool::{BucketConfig, DEFAULT_BUCKETS, PoolSet};
use crate::strategy::Strategy;

/// Construction parameters for an [`Engine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bytes reserved for the heap region.
    pub heap_size: usize,
    /// Initial placement policy; swappable later.
    pub strategy: Strategy,
    /// Pool size classes; an empty list disables the fast path.
    pub buckets: Vec<BucketConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            heap_size: 1024 * 1024,
            strategy: Strategy::default(),
            buckets: DEFAULT_BUCKETS.to_vec(),
        }
    }
}

/// The combined allocator: pool fast path in front of the heap engine.
pub struct Engine {
    heap: Heap,
    pools: PoolSet,
}

impl Engine {
    /// Brings up the heap region and all pool arenas.
    ///
    /// Heap reservation failure is fatal (`OutOfMemory`); a failed pool
    /// bucket merely degrades that size class to the heap path.
    pub fn new(config: EngineConfig) -> AllocResult<Engine> {
        let mut heap = Heap::new(config.heap_size)?;
        heap.set_strategy(config.strategy);
        let pools = PoolSet::new(&config.buckets);
        Ok(Engine { heap, pools })
    }

    /// Allocates `size` bytes from the pool layer when a bucket fits,
    /// falling back to the heap otherwise.
    pub fn allocate(&mut self, size: usize) -> AllocResult<NonNull<u8>> {
        if size == 0 {
            return Err(AllocError::InvalidArgument("zero-sized allocation"));
        }
        if let Some(ptr) = self.pools.allocate(size) {
            return Ok(ptr);
        }
        self.heap.allocate(size)
    }

    /// Releases `ptr`, routed by which allocator's address range owns it.
    pub fn release(&mut self, ptr: NonNull<u8>) -> AllocResult<()> {
        if self.pools.release(ptr)? {
            return Ok(());
        }
        self.heap.release(ptr)
    }

    /// Runs one mark-sweep pass over the heap. See [`Heap::collect`].
    pub fn collect(&mut self, roots: &[NonNull<u8>]) -> GcStats {
        self.heap.collect(roots)
    }

    /// Swaps the heap's placement policy at any time.
    pub fn set_strategy(&mut self, strategy: Strategy) {
        self.heap.set_strategy(strategy);
    }

    #[must_use]
    pub fn strategy(&self) -> Strategy {
        self.heap.strategy()
    }

    /// Read access to the heap for stats, views and dumps.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Read access to the pool layer.
    #[must_use]
    pub fn pools(&self) -> &PoolSet {
        &self.pools
    }

    /// Dumps both layers to the diagnostic stream.
    pub fn dump(&self) {
        self.heap.dump();
        self.pools.dump();
    }
}
