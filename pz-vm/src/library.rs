//! Loaded-module structures.
//!
//! A [`LibraryLoading`] accumulates a module's pieces in file order while
//! the loader runs inside its no-GC region; [`freeze`](LibraryLoading::freeze)
//! turns it into the immutable [`Library`] the interpreter executes from.

use crate::consts::WORD_SIZE;
use crate::heap::{GcCapability, Heap, Marker};

use pz_asm::{EntrySignature, Width};

use std::collections::HashMap;

/// A struct's materialised layout: per-field byte offsets computed with
/// platform word sizes, and the total byte size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructLayout {
    widths: Vec<Width>,
    offsets: Vec<usize>,
    total_size: usize,
}

impl StructLayout {
    /// Lay out the given field widths in order, naturally aligned.
    pub fn layout(widths: Vec<Width>) -> Self {
        let mut offsets = Vec::with_capacity(widths.len());
        let mut offset = 0usize;

        for width in &widths {
            let size = width.size();
            let align = size.min(WORD_SIZE);
            offset = offset.div_ceil(align) * align;
            offsets.push(offset);
            offset += size;
        }

        StructLayout {
            widths,
            offsets,
            total_size: offset,
        }
    }

    /// Number of fields.
    pub fn num_fields(&self) -> usize {
        self.widths.len()
    }

    /// Width of one field.
    pub fn field_width(&self, field: usize) -> Width {
        self.widths[field]
    }

    /// Byte offset of one field.
    pub fn field_offset(&self, field: usize) -> usize {
        self.offsets[field]
    }

    /// Total byte size of the struct.
    pub const fn total_size(&self) -> usize {
        self.total_size
    }
}

/// A code pointer paired with its environment. Lives in the GC heap; the
/// interpreter enters `code` with `env` as the current environment.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Closure {
    /// Entry address within a proc's code buffer.
    pub code: *const u8,
    /// Environment pointer, possibly null.
    pub env: *mut u8,
}

/// A resolved source position attached to a code offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrcPoint {
    /// Source file name.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
}

/// A loaded procedure: its code buffer and, when debug tracing was enabled
/// at load time, a table mapping code offsets to source positions.
///
/// Code is stored in 8-byte backing so the buffer start is aligned for the
/// widest immediate; immediates inside it are aligned relative to that
/// start.
#[derive(Debug)]
pub struct Proc {
    name: String,
    code: Vec<u64>,
    code_bytes: usize,
    contexts: Vec<(usize, Option<SrcPoint>)>,
}

impl Proc {
    /// Create a proc with a zeroed code buffer of the given size. The
    /// buffer address is stable from this point on; the loader's second
    /// pass fills it in place.
    pub fn new(name: String, code_bytes: usize) -> Self {
        Proc {
            name,
            code: vec![0; code_bytes.div_ceil(std::mem::size_of::<u64>())],
            code_bytes,
            contexts: Vec::new(),
        }
    }

    /// The proc's name, as spelled in the module's name table.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The loaded code buffer.
    pub fn code(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.code.as_ptr() as *const u8, self.code_bytes) }
    }

    pub(crate) fn code_mut(&mut self) -> &mut [u8] {
        unsafe {
            std::slice::from_raw_parts_mut(self.code.as_mut_ptr() as *mut u8, self.code_bytes)
        }
    }

    /// Absolute address of the first instruction.
    pub fn code_addr(&self) -> usize {
        self.code.as_ptr() as usize
    }

    /// Attach a source position to a code offset.
    pub fn add_context(&mut self, offset: usize, src: Option<SrcPoint>) {
        if self.contexts.last().map(|(_, s)| s) != Some(&src) {
            self.contexts.push((offset, src));
        }
    }

    /// The source position governing a code offset, if one was loaded.
    pub fn context_for(&self, offset: usize) -> Option<&SrcPoint> {
        self.contexts
            .iter()
            .rev()
            .find(|(start, _)| *start <= offset)
            .and_then(|(_, src)| src.as_ref())
    }
}

/// An exported closure.
#[derive(Debug, Clone, Copy)]
pub struct Export {
    /// The closure's local id in its module.
    pub closure_id: u32,
    /// The closure itself.
    pub closure: *mut Closure,
}

/// A program's entry point.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    /// How the closure expects to be called.
    pub signature: EntrySignature,
    /// The closure to run.
    pub closure: *mut Closure,
}

/// An import resolved against a previously-loaded library.
#[derive(Debug, Clone, Copy)]
pub struct Import {
    /// The imported closure.
    pub closure: *mut Closure,
    /// The closure's id in the exporting module.
    pub exported_id: u32,
}

/// A fully-loaded module.
#[derive(Debug, Default)]
pub struct Library {
    structs: Vec<StructLayout>,
    datas: Vec<*mut u8>,
    procs: Vec<Proc>,
    closures: Vec<*mut Closure>,
    symbols: HashMap<String, Export>,
    entry: Option<Entry>,
}

impl Library {
    /// Look up an exported symbol by unqualified name.
    pub fn export(&self, symbol: &str) -> Option<&Export> {
        self.symbols.get(symbol)
    }

    /// Iterate the export table.
    pub fn exports(&self) -> impl Iterator<Item = (&str, &Export)> {
        self.symbols.iter().map(|(name, e)| (name.as_str(), e))
    }

    /// The entry closure, when this module is a program.
    pub const fn entry(&self) -> Option<&Entry> {
        self.entry.as_ref()
    }

    /// A struct layout by local id.
    pub fn struct_layout(&self, id: u32) -> Option<&StructLayout> {
        self.structs.get(id as usize)
    }

    /// A data pointer by local id.
    pub fn data(&self, id: u32) -> Option<*mut u8> {
        self.datas.get(id as usize).copied()
    }

    /// A proc by local id.
    pub fn proc(&self, id: u32) -> Option<&Proc> {
        self.procs.get(id as usize)
    }

    /// A closure by local id.
    pub fn closure(&self, id: u32) -> Option<*mut Closure> {
        self.closures.get(id as usize).copied()
    }

    /// Number of loaded procs.
    pub fn num_procs(&self) -> usize {
        self.procs.len()
    }

    /// Mark every object this library keeps alive: its data blobs and its
    /// closures. Whatever they reference is reached through the
    /// conservative scan.
    pub fn trace_roots(&self, marker: &mut Marker<'_>) {
        for &data in &self.datas {
            marker.mark_root(data as usize);
        }
        for &closure in &self.closures {
            marker.mark_root(closure as usize);
        }
    }
}

/// A module under construction, slots populated in file order.
#[derive(Debug)]
pub struct LibraryLoading {
    pub(crate) structs: Vec<StructLayout>,
    pub(crate) imports: Vec<Import>,
    pub(crate) datas: Vec<*mut u8>,
    pub(crate) procs: Vec<Proc>,
    pub(crate) closures: Vec<*mut Closure>,
    symbols: HashMap<String, Export>,
}

impl LibraryLoading {
    /// Reserve the module's tables. Closure cells are allocated up front
    /// because data slots may reference them by id before the closure
    /// records themselves are read. Returns `None` on OOM; the caller's
    /// no-GC scope has recorded it.
    pub fn new(
        heap: &mut Heap,
        cap: &dyn GcCapability,
        num_structs: u32,
        num_datas: u32,
        num_procs: u32,
        num_closures: u32,
    ) -> Option<Self> {
        let mut closures = Vec::with_capacity(num_closures as usize);
        for _ in 0..num_closures {
            let cell = heap.alloc_bytes(std::mem::size_of::<Closure>(), cap)?;
            closures.push(cell.as_ptr() as *mut Closure);
        }

        Some(LibraryLoading {
            structs: Vec::with_capacity(num_structs as usize),
            imports: Vec::new(),
            datas: Vec::with_capacity(num_datas as usize),
            procs: Vec::with_capacity(num_procs as usize),
            closures,
            symbols: HashMap::new(),
        })
    }

    /// Record an export under its unqualified symbol name.
    pub fn add_export(&mut self, symbol: String, closure_id: u32, closure: *mut Closure) {
        self.symbols.insert(
            symbol,
            Export {
                closure_id,
                closure,
            },
        );
    }

    /// Publish the finished library.
    pub fn freeze(self, entry: Option<Entry>) -> Library {
        tracing::debug!(
            structs = self.structs.len(),
            datas = self.datas.len(),
            procs = self.procs.len(),
            closures = self.closures.len(),
            exports = self.symbols.len(),
            "library frozen"
        );

        Library {
            structs: self.structs,
            datas: self.datas,
            procs: self.procs,
            closures: self.closures,
            symbols: self.symbols,
            entry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_packs_with_natural_alignment() {
        let layout = StructLayout::layout(vec![Width::W8, Width::W32, Width::W8, Width::Ptr]);

        assert_eq!(layout.field_offset(0), 0);
        assert_eq!(layout.field_offset(1), 4);
        assert_eq!(layout.field_offset(2), 8);
        assert_eq!(layout.field_offset(3), WORD_SIZE * 2);
        assert_eq!(layout.total_size(), WORD_SIZE * 3);
    }

    #[test]
    fn fast_fields_are_32_bit() {
        let layout = StructLayout::layout(vec![Width::Fast, Width::Fast]);

        assert_eq!(layout.field_offset(1), 4);
        assert_eq!(layout.total_size(), 8);
    }

    #[test]
    fn context_lookup_returns_the_governing_entry() {
        let mut proc = Proc::new("p".into(), 16);
        proc.add_context(
            0,
            Some(SrcPoint {
                file: "a.p".into(),
                line: 1,
            }),
        );
        proc.add_context(
            8,
            Some(SrcPoint {
                file: "a.p".into(),
                line: 2,
            }),
        );
        proc.add_context(12, None);

        assert_eq!(proc.context_for(0).unwrap().line, 1);
        assert_eq!(proc.context_for(7).unwrap().line, 1);
        assert_eq!(proc.context_for(9).unwrap().line, 2);
        assert!(proc.context_for(12).is_none());
    }
}
