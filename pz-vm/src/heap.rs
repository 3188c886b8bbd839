//! The mark/sweep heap.
//!
//! A non-moving, conservative, block-structured collector. Memory comes from
//! OS-mapped chunks: a BOP chunk carved into fixed-size blocks (each block
//! dedicated to a single cell size) and a fit chunk reserved for large
//! objects. Candidate roots are machine words; the collector masks their low
//! tag bits, snaps interior pointers to cell starts through the per-block
//! bitmaps, and scans reached cells word by word.

mod block;
mod chunk;
mod scope;

pub use scope::{GcCapability, GcMode, HeapRoot, NoGcScope, ScopedRoots, Tracer};

use crate::consts::*;
use block::CellBits;
use chunk::Chunk;

use std::io;
use std::ptr::NonNull;

/// Construction-time heap switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapOptions {
    /// Collect before every allocation while the heap is non-empty. A
    /// development switch that shakes out missing roots.
    pub zealous: bool,
}

/// The runtime heap: one BOP chunk, one reserved fit chunk, and the
/// collection counter.
#[derive(Debug)]
pub struct Heap {
    bop: Chunk,
    fit: Chunk,
    collections: usize,
    zealous: bool,
}

impl Heap {
    /// Map the chunks and return an empty heap.
    pub fn new(options: HeapOptions) -> io::Result<Self> {
        Ok(Heap {
            bop: Chunk::new()?,
            fit: Chunk::new()?,
            collections: usize::default(),
            zealous: options.zealous,
        })
    }

    /// Allocate `words` machine words, collecting and retrying on
    /// exhaustion if the capability chain permits it. On a second failure
    /// the capability's OOM policy decides: the default policy is fatal,
    /// while a [`NoGcScope`] records the failure and returns `None`.
    pub fn alloc(&mut self, words: usize, cap: &dyn GcCapability) -> Option<NonNull<u8>> {
        if self.zealous && !self.is_empty() && cap.can_gc() {
            self.collect(cap);
        }

        if let Some(addr) = self.try_alloc(words) {
            return NonNull::new(addr as *mut u8);
        }

        if cap.can_gc() {
            self.collect(cap);
            if let Some(addr) = self.try_alloc(words) {
                return NonNull::new(addr as *mut u8);
            }
        }

        cap.report_oom(words);
        None
    }

    /// Allocate at least `bytes` bytes, rounded up to whole words.
    pub fn alloc_bytes(&mut self, bytes: usize, cap: &dyn GcCapability) -> Option<NonNull<u8>> {
        let words = bytes.div_ceil(WORD_SIZE).max(1);
        self.alloc(words, cap)
    }

    /// Trace from the capability chain's roots, then sweep every block.
    pub fn collect(&mut self, cap: &dyn GcCapability) {
        assert!(cap.can_gc(), "collection requested inside a no-GC region");

        let mut marker = Marker {
            bop: &mut self.bop,
            worklist: Vec::new(),
        };

        // The innermost tracer delegates to its ancestors.
        let mut node: Option<&dyn GcCapability> = Some(cap);
        while let Some(c) = node {
            if let Some(tracer) = c.tracer() {
                tracer.do_trace(&mut marker);
                break;
            }
            node = c.parent();
        }

        let mut live = 0;
        let mut freed = 0;
        for block in self.bop.blocks_mut() {
            let (block_live, block_freed) = block.sweep();
            live += block_live;
            freed += block_freed;
        }

        self.collections += 1;
        tracing::debug!(live, freed, collection = self.collections, "collected");
    }

    fn try_alloc(&mut self, words: usize) -> Option<usize> {
        if words > GC_MAX_CELL_WORDS {
            return None;
        }
        let cell_words = words.next_power_of_two().max(GC_MIN_CELL_WORDS);

        // Smallest fit among blocks that still have a cell to give.
        let candidate = self
            .bop
            .blocks_mut()
            .iter_mut()
            .filter(|block| block.cell_words() >= cell_words && block.has_space())
            .min_by_key(|block| block.cell_words());

        if let Some(block) = candidate {
            return block.try_alloc();
        }

        self.bop
            .new_block(cell_words)
            .and_then(|block| block.try_alloc())
    }

    /// Number of collections performed so far.
    pub const fn collections(&self) -> usize {
        self.collections
    }

    /// Words currently allocated across all blocks.
    pub fn usage_words(&self) -> usize {
        self.bop
            .blocks()
            .iter()
            .map(|block| block.allocated_cells() * block.cell_words())
            .sum()
    }

    /// Whether nothing is currently allocated.
    pub fn is_empty(&self) -> bool {
        self.bop
            .blocks()
            .iter()
            .all(|block| block.allocated_cells() == 0)
    }

    /// Bytes reserved for the fit chunk. Large-object allocation from it is
    /// not wired up yet.
    pub fn fit_reserved_bytes(&self) -> usize {
        self.fit.reserved_bytes()
    }

    /// Verify the bitmap/free-list invariants of every block. Used by
    /// tests; failure indicates collector corruption.
    pub fn check_bits(&self) -> Result<(), String> {
        for (index, block) in self.bop.blocks().iter().enumerate() {
            block
                .check_bits()
                .map_err(|detail| format!("block {index}: {detail}"))?;
        }
        Ok(())
    }
}

/// Mark-phase state handed to tracers.
pub struct Marker<'h> {
    bop: &'h mut Chunk,
    worklist: Vec<usize>,
}

impl Marker<'_> {
    /// Mark the object a candidate root word refers to, along with
    /// everything transitively reachable from it.
    ///
    /// Accepts arbitrary words: tag bits are masked off, interior pointers
    /// snap to their cell start, and words that do not refer to a live cell
    /// are ignored.
    pub fn mark_root(&mut self, word: usize) {
        self.worklist.push(word & !TAG_MASK);

        while let Some(addr) = self.worklist.pop() {
            let Some(block_index) = self.bop.block_of(addr) else {
                continue;
            };
            let block = &mut self.bop.blocks_mut()[block_index];
            let Some(cell) = block.cell_index(addr) else {
                continue;
            };

            let bits = block.bits(cell);
            if !bits.contains(CellBits::VALID | CellBits::ALLOCATED)
                || bits.contains(CellBits::MARKED)
            {
                continue;
            }
            block.set_mark(cell);

            let base = block.cell_addr(cell);
            for index in 0..block.cell_words() {
                let word = unsafe { std::ptr::read((base + index * WORD_SIZE) as *const usize) };
                self.worklist.push(word & !TAG_MASK);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::new(HeapOptions::default()).expect("mapping chunks")
    }

    #[test]
    fn alloc_returns_distinct_zeroed_cells() {
        let mut heap = heap();
        let root = HeapRoot;
        let scope = NoGcScope::new(&root);

        let a = heap.alloc(4, &scope).unwrap().as_ptr() as usize;
        let b = heap.alloc(4, &scope).unwrap().as_ptr() as usize;

        assert_ne!(a, b);
        for offset in 0..4 {
            assert_eq!(
                unsafe { std::ptr::read((a + offset * WORD_SIZE) as *const usize) },
                0
            );
        }
        assert!(!scope.is_oom());
    }

    #[test]
    fn collection_frees_unrooted_cells_only() {
        let mut heap = heap();
        let root = HeapRoot;
        let roots = ScopedRoots::new(&root);

        let kept: usize = heap.alloc(4, &roots).unwrap().as_ptr() as usize;
        let _dropped: usize = heap.alloc(4, &roots).unwrap().as_ptr() as usize;

        let slot = &kept as *const usize;
        roots.add_root(slot);

        let before = heap.usage_words();
        heap.collect(&roots);

        assert_eq!(heap.collections(), 1);
        assert!(heap.usage_words() < before);
        assert!(heap.usage_words() > 0);
        heap.check_bits().unwrap();

        // The kept cell's slot can be reused without disturbing `kept`.
        let again = heap.alloc(4, &roots).unwrap().as_ptr() as usize;
        assert_ne!(again, kept);

        roots.remove_root(slot);
    }

    #[test]
    fn interior_and_tagged_pointers_keep_cells_alive() {
        let mut heap = heap();
        let root = HeapRoot;
        let roots = ScopedRoots::new(&root);

        let cell = heap.alloc(4, &roots).unwrap().as_ptr() as usize;
        let interior: usize = cell + 2 * WORD_SIZE + 1;

        let slot = &interior as *const usize;
        roots.add_root(slot);
        heap.collect(&roots);
        roots.remove_root(slot);

        assert!(heap.usage_words() > 0, "interior pointer lost the cell");
        heap.check_bits().unwrap();
    }

    #[test]
    fn reachability_is_transitive_through_cell_words() {
        let mut heap = heap();
        let root = HeapRoot;
        let roots = ScopedRoots::new(&root);

        let inner = heap.alloc(2, &roots).unwrap().as_ptr() as usize;
        let outer = heap.alloc(2, &roots).unwrap().as_ptr() as usize;
        unsafe { std::ptr::write(outer as *mut usize, inner) };

        let slot = &outer as *const usize;
        roots.add_root(slot);
        let before = heap.usage_words();
        heap.collect(&roots);
        roots.remove_root(slot);

        assert_eq!(heap.usage_words(), before);
    }

    #[test]
    fn no_gc_scope_records_oversized_requests() {
        let mut heap = heap();
        let root = HeapRoot;
        let scope = NoGcScope::new(&root);

        assert!(heap.alloc(GC_MAX_CELL_WORDS + 1, &scope).is_none());
        assert!(scope.is_oom());
        assert_eq!(heap.collections(), 0);
    }

    #[test]
    fn no_gc_scope_forbids_collection() {
        let root = HeapRoot;
        let roots = ScopedRoots::new(&root);
        let scope = NoGcScope::new(&roots);

        assert!(roots.can_gc());
        assert!(!scope.can_gc());
        scope.is_oom();
    }

    #[test]
    #[should_panic(expected = "stack order")]
    fn root_removal_is_stack_disciplined() {
        let root = HeapRoot;
        let roots = ScopedRoots::new(&root);

        let a: usize = 0;
        let b: usize = 0;
        roots.add_root(&a);
        roots.add_root(&b);
        roots.remove_root(&a);
    }
}
