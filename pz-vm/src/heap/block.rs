use crate::consts::*;

use bitflags::bitflags;

use std::ptr;

bitflags! {
    /// Per-cell allocation state.
    ///
    /// A live cell carries `VALID | ALLOCATED`; a cell on the free list
    /// carries `VALID` alone; a cell that has never been formed out of the
    /// wilderness carries no bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CellBits: u8 {
        /// The cell has been formed and starts at this index.
        const VALID = 0b001;
        /// The cell is currently allocated.
        const ALLOCATED = 0b010;
        /// The cell was reached by the current mark phase.
        const MARKED = 0b100;
    }
}

/// Sentinel terminating a block's intrusive free list.
const FREE_LIST_END: usize = usize::MAX;

#[cfg(debug_assertions)]
const POISON_WORD: usize = 0x5a5a_5a5a_5a5a_5a5a_u64 as usize;

/// One fixed-size region of a BOP chunk, dedicated to a single cell size.
///
/// The payload lives inside the chunk mapping; this record keeps the
/// metadata: the bitmap, the bump (wilderness) index and the free-list head.
/// Free cells store the index of the next free cell in their first word.
#[derive(Debug)]
pub(crate) struct Block {
    base: usize,
    cell_words: usize,
    num_cells: usize,
    wilderness: usize,
    free_head: usize,
    bitmap: Vec<CellBits>,
}

impl Block {
    pub(crate) fn new(base: usize, cell_words: usize) -> Self {
        debug_assert!(cell_words.is_power_of_two());
        debug_assert!((GC_MIN_CELL_WORDS..=GC_MAX_CELL_WORDS).contains(&cell_words));

        let num_cells = GC_BLOCK_SIZE / (cell_words * WORD_SIZE);

        Block {
            base,
            cell_words,
            num_cells,
            wilderness: 0,
            free_head: FREE_LIST_END,
            bitmap: vec![CellBits::empty(); num_cells],
        }
    }

    pub(crate) const fn cell_words(&self) -> usize {
        self.cell_words
    }

    pub(crate) fn cell_addr(&self, index: usize) -> usize {
        debug_assert!(index < self.num_cells);
        self.base + index * self.cell_words * WORD_SIZE
    }

    /// Snap an interior address to the index of its containing cell.
    ///
    /// The address must already have its tag bits masked off. Returns `None`
    /// for addresses outside the formed part of the block.
    pub(crate) fn cell_index(&self, addr: usize) -> Option<usize> {
        if addr < self.base || addr % WORD_SIZE != 0 {
            return None;
        }

        let index = (addr - self.base) / (self.cell_words * WORD_SIZE);
        (index < self.wilderness).then_some(index)
    }

    pub(crate) fn bits(&self, index: usize) -> CellBits {
        self.bitmap[index]
    }

    pub(crate) fn set_mark(&mut self, index: usize) {
        self.bitmap[index].insert(CellBits::MARKED);
    }

    pub(crate) fn has_space(&self) -> bool {
        self.free_head != FREE_LIST_END || self.wilderness < self.num_cells
    }

    /// Hand out one cell: free list first, then the wilderness bump pointer.
    pub(crate) fn try_alloc(&mut self) -> Option<usize> {
        let index = if self.free_head != FREE_LIST_END {
            let index = self.free_head;
            debug_assert_eq!(self.bitmap[index], CellBits::VALID);

            // Unlink: the next-free index lives in the cell's first word.
            self.free_head = unsafe { ptr::read(self.cell_addr(index) as *const usize) };
            index
        } else if self.wilderness < self.num_cells {
            let index = self.wilderness;
            self.wilderness += 1;
            index
        } else {
            return None;
        };

        self.bitmap[index] = CellBits::VALID | CellBits::ALLOCATED;

        let addr = self.cell_addr(index);
        unsafe {
            ptr::write_bytes(addr as *mut u8, 0, self.cell_words * WORD_SIZE);
        }

        Some(addr)
    }

    /// Sweep every formed cell: clear marks on survivors, return the rest to
    /// the free list. Returns `(live, freed)` cell counts.
    pub(crate) fn sweep(&mut self) -> (usize, usize) {
        let mut live = 0;
        let mut freed = 0;

        for index in 0..self.wilderness {
            let bits = self.bitmap[index];

            if bits.contains(CellBits::MARKED) {
                self.bitmap[index].remove(CellBits::MARKED);
                live += 1;
            } else if bits.contains(CellBits::ALLOCATED) {
                self.bitmap[index] = CellBits::VALID;
                freed += 1;

                let addr = self.cell_addr(index);
                unsafe {
                    #[cfg(debug_assertions)]
                    for word in 1..self.cell_words {
                        ptr::write((addr + word * WORD_SIZE) as *mut usize, POISON_WORD);
                    }

                    ptr::write(addr as *mut usize, self.free_head);
                }
                self.free_head = index;
            }
        }

        (live, freed)
    }

    pub(crate) fn allocated_cells(&self) -> usize {
        self.bitmap
            .iter()
            .filter(|bits| bits.contains(CellBits::ALLOCATED))
            .count()
    }

    /// Verify the bitmap/free-list consistency documented on [`CellBits`].
    pub(crate) fn check_bits(&self) -> Result<(), String> {
        let mut on_free_list = vec![false; self.num_cells];
        let mut cursor = self.free_head;
        let mut seen = 0;

        while cursor != FREE_LIST_END {
            if cursor >= self.wilderness || seen > self.num_cells {
                return Err(format!("free list escapes the formed area at {cursor}"));
            }
            if on_free_list[cursor] {
                return Err(format!("free list cycles through cell {cursor}"));
            }
            on_free_list[cursor] = true;
            seen += 1;
            cursor = unsafe { ptr::read(self.cell_addr(cursor) as *const usize) };
        }

        for (index, bits) in self.bitmap.iter().enumerate() {
            if bits.contains(CellBits::MARKED) {
                return Err(format!("cell {index} still marked outside a collection"));
            }

            let expected = match (index < self.wilderness, on_free_list[index]) {
                (false, _) => CellBits::empty(),
                (true, true) => CellBits::VALID,
                (true, false) => CellBits::VALID | CellBits::ALLOCATED,
            };

            if *bits != expected {
                return Err(format!(
                    "cell {index} has bits {bits:?}, expected {expected:?}"
                ));
            }
        }

        Ok(())
    }
}
