//! Root-set mark-sweep collection over the heap's block chain.
//!
//! This is deliberately not a tracing collector: payload bytes are never
//! inspected for embedded addresses. A block survives a pass only if its
//! own payload address appears in the caller-supplied root list; the
//! caller is responsible for enumerating every address it still needs.
//! In exchange the pass is a single deterministic walk.

use std::ptr::NonNull;

use log::{debug, info};

use crate::block::BlockRef;
use crate::heap::Heap;

/// Outcome of one collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcStats {
    /// In-use blocks whose address appeared in the root set.
    pub live_blocks: usize,
    /// Unreferenced blocks reclaimed by the sweep.
    pub reclaimed_blocks: usize,
    /// Payload bytes those blocks held.
    pub reclaimed_bytes: usize,
}

impl Heap {
    /// Runs one mark-sweep pass. `roots` is consumed once and not stored.
    ///
    /// Roots pointing outside the region, at bytes that are not a block
    /// header, or at an already-free block are skipped, not an error.
    /// After the pass every mark flag is clear again and adjacent free
    /// blocks across the whole chain are coalesced.
    pub fn collect(&mut self, roots: &[NonNull<u8>]) -> GcStats {
        // Mark: flag every in-use block named by a root.
        for &root in roots {
            if !self.plausible_payload(root.as_ptr() as usize) {
                continue;
            }
            // SAFETY: plausible_payload keeps the header read inside the
            // region; the tag check rejects non-header bytes
            let block = unsafe { BlockRef::from_payload(root) };
            if !block.tag_ok() || block.is_free() {
                continue;
            }
            block.set_marked(true);
        }

        // Sweep: reclaim unmarked in-use blocks, reset every mark.
        let mut stats = GcStats::default();
        for block in self.iter() {
            if block.is_marked() {
                stats.live_blocks += 1;
            } else if !block.is_free() {
                stats.reclaimed_blocks += 1;
                stats.reclaimed_bytes += block.size();
                debug!(
                    "sweeping unreachable block 0x{:x} ({} bytes)",
                    block.addr(),
                    block.size()
                );
                block.set_free(true);
            }
            block.set_marked(false);
        }

        // One coalescing walk over the whole chain.
        let mut current = Some(self.head());
        while let Some(block) = current {
            match block.next() {
                Some(next) if block.is_free() && next.is_free() => block.absorb_next(),
                _ => current = block.next(),
            }
        }

        info!(
            "collection: {} live, {} reclaimed ({} bytes)",
            stats.live_blocks, stats.reclaimed_blocks, stats.reclaimed_bytes
        );
        stats
    }
}
