//! Runtime parameters.

use std::mem;

/* MEMORY */

/// Length of a machine word, in bytes.
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// Size of one OS-mapped garbage collector chunk, in bytes.
pub const GC_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Size of one block within a BOP chunk, in bytes. Every block holds cells
/// of a single size.
pub const GC_BLOCK_SIZE: usize = 8 * 1024;

/// Smallest cell size handed out by a block, in words.
pub const GC_MIN_CELL_WORDS: usize = 2;

/// Largest cell size a block can hold, in words (one cell per block).
pub const GC_MAX_CELL_WORDS: usize = GC_BLOCK_SIZE / WORD_SIZE;

/// Low pointer bits that may carry a tag and are masked off before a
/// candidate root is looked up in the heap.
#[cfg(target_pointer_width = "64")]
pub const TAG_MASK: usize = 0x7;

/// Low pointer bits that may carry a tag and are masked off before a
/// candidate root is looked up in the heap.
#[cfg(target_pointer_width = "32")]
pub const TAG_MASK: usize = 0x3;

/* INTERPRETER */

/// Initial capacity of the expression stack, in slots.
pub const STACK_INITIAL_SLOTS: usize = 1024;

/// Hard limit on call depth.
pub const MAX_CALL_DEPTH: usize = 16 * 1024;

/// Name of the pseudo-module that exports the native builtins.
pub const BUILTIN_MODULE: &str = "Builtin";
