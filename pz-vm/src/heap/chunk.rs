use super::block::Block;
use crate::consts::*;

use memmap2::MmapMut;

use std::io;

/// One OS-mapped arena. A BOP chunk is carved into fixed-size blocks on
/// demand, each dedicated to a single cell size.
#[derive(Debug)]
pub(crate) struct Chunk {
    map: MmapMut,
    base: usize,
    blocks: Vec<Block>,
}

impl Chunk {
    pub(crate) fn new() -> io::Result<Self> {
        let mut map = MmapMut::map_anon(GC_CHUNK_SIZE)?;
        let base = map.as_mut_ptr() as usize;

        Ok(Chunk {
            map,
            base,
            blocks: Vec::new(),
        })
    }

    pub(crate) fn reserved_bytes(&self) -> usize {
        self.map.len()
    }

    pub(crate) fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }

    /// Carve a new block for the given cell size, if the chunk has room.
    pub(crate) fn new_block(&mut self, cell_words: usize) -> Option<&mut Block> {
        let offset = self.blocks.len() * GC_BLOCK_SIZE;
        if offset + GC_BLOCK_SIZE > GC_CHUNK_SIZE {
            return None;
        }

        self.blocks.push(Block::new(self.base + offset, cell_words));
        self.blocks.last_mut()
    }

    /// Map an already-masked candidate address to its block, if it points
    /// into a carved block of this chunk.
    pub(crate) fn block_of(&self, addr: usize) -> Option<usize> {
        if addr < self.base {
            return None;
        }

        let index = (addr - self.base) / GC_BLOCK_SIZE;
        (index < self.blocks.len()).then_some(index)
    }
}
