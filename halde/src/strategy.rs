//! Placement strategies for the heap engine.
//!
//! Selection is stateless: each policy is one scan over the block chain.
//! There is no free-list index; the FREE flag on each header is the
//! sole source of truth, so every policy walks the full chain.

use crate::block::{BlockIter, BlockRef};

/// Policy for choosing which free block satisfies a request.
///
/// Swappable at any time via [`Heap::set_strategy`](crate::Heap::set_strategy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// First block, in address order, that is free and large enough.
    /// Cheapest selection; tends to fragment low addresses.
    #[default]
    FirstFit,
    /// Free-and-sufficient block with the smallest capacity; ties keep
    /// the first encountered. Minimizes waste at full-scan cost.
    BestFit,
    /// Free-and-sufficient block with the largest capacity; ties keep
    /// the first encountered. Leaves large remainders for later requests.
    WorstFit,
}

impl Strategy {
    /// Scans `blocks` for a free block of at least `size` payload bytes.
    /// `None` means no candidate exists; the heap reports that as
    /// out-of-memory.
    pub(crate) fn select(self, blocks: BlockIter, size: usize) -> Option<BlockRef> {
        let mut candidates = blocks.filter(|b| b.is_free() && b.size() >= size);

        match self {
            Strategy::FirstFit => candidates.next(),
            Strategy::BestFit => {
                let mut best: Option<BlockRef> = None;
                for block in candidates {
                    match best {
                        // strictly smaller wins; equal keeps the earlier one
                        Some(current) if block.size() >= current.size() => {}
                        _ => best = Some(block),
                    }
                }
                best
            }
            Strategy::WorstFit => {
                let mut worst: Option<BlockRef> = None;
                for block in candidates {
                    match worst {
                        Some(current) if block.size() <= current.size() => {}
                        _ => worst = Some(block),
                    }
                }
                worst
            }
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::FirstFit => write!(f, "first-fit"),
            Strategy::BestFit => write!(f, "best-fit"),
            Strategy::WorstFit => write!(f, "worst-fit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::Heap;

    /// Builds a heap whose free blocks are exactly 48, 16 and 32 payload
    /// bytes, in address order, separated by used guard blocks so they
    /// cannot coalesce. Returns the three payload addresses.
    fn fragmented_heap() -> (Heap, [usize; 3]) {
        let mut heap = Heap::new(4096).expect("heap");

        let a = heap.allocate(48).expect("a");
        let _g1 = heap.allocate(8).expect("g1");
        let b = heap.allocate(16).expect("b");
        let _g2 = heap.allocate(8).expect("g2");
        let c = heap.allocate(32).expect("c");
        let _g3 = heap.allocate(8).expect("g3");

        // Swallow the tail so the only free blocks are a, b and c.
        let tail = heap
            .blocks()
            .filter(|b| b.free)
            .map(|b| b.size)
            .max()
            .expect("tail block");
        let _plug = heap.allocate(tail).expect("plug");
        assert!(heap.blocks().all(|b| !b.free), "heap fully occupied");

        for ptr in [a, b, c] {
            heap.release(ptr).expect("carve out free block");
        }
        (heap, [a, b, c].map(|p| p.as_ptr() as usize))
    }

    fn alloc_addr(heap: &mut Heap, size: usize) -> usize {
        heap.allocate(size).expect("allocate").as_ptr() as usize
    }

    #[test]
    fn test_first_fit_takes_lowest_address() {
        let (mut heap, [a, _b, _c]) = fragmented_heap();
        heap.set_strategy(Strategy::FirstFit);
        assert_eq!(alloc_addr(&mut heap, 16), a, "first sufficient block wins");
    }

    #[test]
    fn test_best_fit_takes_exact_match() {
        let (mut heap, [_a, b, _c]) = fragmented_heap();
        heap.set_strategy(Strategy::BestFit);
        assert_eq!(alloc_addr(&mut heap, 16), b, "smallest sufficient block wins");
    }

    #[test]
    fn test_worst_fit_takes_largest() {
        let (mut heap, [a, _b, _c]) = fragmented_heap();
        heap.set_strategy(Strategy::WorstFit);
        assert_eq!(alloc_addr(&mut heap, 16), a, "largest block wins");
    }

    #[test]
    fn test_best_fit_tie_keeps_first_encountered() {
        let mut heap = Heap::new(4096).expect("heap");

        let a = heap.allocate(32).expect("a");
        let _g1 = heap.allocate(8).expect("g1");
        let b = heap.allocate(32).expect("b");
        let _g2 = heap.allocate(8).expect("g2");
        let tail = heap
            .blocks()
            .filter(|b| b.free)
            .map(|b| b.size)
            .max()
            .expect("tail");
        let _plug = heap.allocate(tail).expect("plug");

        heap.release(a).expect("free a");
        heap.release(b).expect("free b");

        heap.set_strategy(Strategy::BestFit);
        assert_eq!(alloc_addr(&mut heap, 32), a.as_ptr() as usize);
    }

    #[test]
    fn test_no_candidate_for_oversized_request() {
        let (mut heap, _) = fragmented_heap();
        for strategy in [Strategy::FirstFit, Strategy::BestFit, Strategy::WorstFit] {
            heap.set_strategy(strategy);
            assert!(
                heap.allocate(4096).is_err(),
                "{strategy} must report out-of-memory"
            );
        }
    }

    #[test]
    fn test_default_is_first_fit() {
        assert_eq!(Strategy::default(), Strategy::FirstFit);
    }
}
