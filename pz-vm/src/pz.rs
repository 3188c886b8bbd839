//! The runtime object: one heap, the loaded libraries, and entry dispatch.

use crate::binary::BinaryReader;
use crate::error::{LoadError, RuntimeError};
use crate::heap::{GcCapability, GcMode, Heap, HeapOptions, HeapRoot, Marker, NoGcScope, Tracer};
use crate::interpreter::{builtin_table, make_builtin_library, Interpreter, StackValue};
use crate::library::{Entry, Library};
use crate::loader::{self, LoadOptions};
use crate::consts::{BUILTIN_MODULE, WORD_SIZE};

use pz_asm::EntrySignature;

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::Path;

/// The capability every loaded library's objects are rooted through. Data
/// blobs and closures are marked directly; everything they reference is
/// reached by the conservative scan.
struct LibraryRoots<'a> {
    libraries: &'a HashMap<String, Library>,
    parent: &'a dyn GcCapability,
}

impl Tracer for LibraryRoots<'_> {
    fn do_trace(&self, marker: &mut Marker<'_>) {
        for library in self.libraries.values() {
            library.trace_roots(marker);
        }

        if let Some(tracer) = self.parent.tracer() {
            tracer.do_trace(marker);
        }
    }
}

impl GcCapability for LibraryRoots<'_> {
    fn mode(&self) -> GcMode {
        GcMode::CanGc
    }

    fn parent(&self) -> Option<&dyn GcCapability> {
        Some(self.parent)
    }

    fn tracer(&self) -> Option<&dyn Tracer> {
        Some(self)
    }

    fn as_capability(&self) -> &dyn GcCapability {
        self
    }
}

/// A Plasma runtime instance.
pub struct Pz {
    root: HeapRoot,
    heap: Heap,
    libraries: HashMap<String, Library>,
    entry_module: Option<String>,
    load_options: LoadOptions,
}

impl Pz {
    /// Map the heap and register the `Builtin` pseudo-module.
    pub fn new(heap_options: HeapOptions, load_options: LoadOptions) -> io::Result<Self> {
        let root = HeapRoot;
        let mut heap = Heap::new(heap_options)?;
        let builtin = make_builtin_library(&mut heap, &root);

        let mut libraries = HashMap::new();
        libraries.insert(BUILTIN_MODULE.to_string(), builtin);

        Ok(Pz {
            root,
            heap,
            libraries,
            entry_module: None,
            load_options,
        })
    }

    /// Load a module from a file, registering it under its own name (name
    /// table index 0). A failed load leaves the runtime unchanged.
    pub fn load(&mut self, path: &Path) -> Result<String, LoadError> {
        let filename = path.display().to_string();

        let file = File::open(path).map_err(|e| LoadError {
            filename: filename.clone(),
            source: e.into(),
        })?;
        let mut reader = BinaryReader::new(BufReader::new(file));

        let Pz {
            root,
            heap,
            libraries,
            load_options,
            ..
        } = self;
        let roots = LibraryRoots {
            libraries,
            parent: root,
        };

        let (library, names) = loader::read(&mut reader, heap, &roots, libraries, *load_options)
            .map_err(|source| LoadError {
                filename: filename.clone(),
                source,
            })?;

        let module = names.first().cloned().unwrap_or(filename);
        if library.entry().is_some() {
            self.entry_module = Some(module.clone());
        }
        self.libraries.insert(module.clone(), library);

        tracing::debug!(module = %module, "module available");
        Ok(module)
    }

    /// Run the loaded program's entry closure. An `argv` entry receives
    /// `(argv: ptr, argc: fast)` on the stack; a plain one receives
    /// nothing. Returns the program's exit value.
    pub fn run(&mut self, args: &[String], output: &mut dyn Write) -> Result<i32, RuntimeError> {
        let entry_module = self
            .entry_module
            .clone()
            .ok_or(RuntimeError::NoEntryClosure)?;

        let Pz {
            root,
            heap,
            libraries,
            ..
        } = self;

        let entry: Entry = *libraries
            .get(&entry_module)
            .and_then(Library::entry)
            .ok_or(RuntimeError::NoEntryClosure)?;
        let roots = LibraryRoots {
            libraries,
            parent: root,
        };

        // Argv is built before the machine exists; the pointers become
        // reachable the moment they are pushed, and nothing can collect in
        // between.
        let argv = match entry.signature {
            EntrySignature::Plain => None,
            EntrySignature::Argv => Some(build_argv(heap, &roots, args)?),
        };

        let builtins = builtin_table();
        let mut interp = Interpreter::new(heap, &roots, builtins, output);

        if let Some(argv) = argv {
            interp.push(StackValue::from_raw(argv as u64));
            interp.push(StackValue::from_raw(args.len() as u64));
        }

        interp.run(entry.closure)
    }

    /// The runtime's heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// A loaded library by module name.
    pub fn library(&self, module: &str) -> Option<&Library> {
        self.libraries.get(module)
    }
}

/// Allocate the argument vector: one NUL-terminated string per argument
/// and a pointer array over them.
fn build_argv(
    heap: &mut Heap,
    parent: &dyn GcCapability,
    args: &[String],
) -> Result<usize, RuntimeError> {
    let scope = NoGcScope::new(parent);

    let Some(vector) = heap.alloc_bytes((args.len() * WORD_SIZE).max(1), &scope) else {
        scope.is_oom();
        return Err(RuntimeError::OutOfMemory);
    };
    let vector = vector.as_ptr() as *mut usize;

    for (index, arg) in args.iter().enumerate() {
        let bytes = arg.as_bytes();
        let Some(cell) = heap.alloc_bytes(bytes.len() + 1, &scope) else {
            scope.is_oom();
            return Err(RuntimeError::OutOfMemory);
        };
        let cell = cell.as_ptr();

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), cell, bytes.len());
            std::ptr::write(cell.add(bytes.len()), 0);
            std::ptr::write(vector.add(index), cell as usize);
        }
    }

    if scope.is_oom() {
        return Err(RuntimeError::OutOfMemory);
    }
    Ok(vector as usize)
}
