//! The two-pass PZ module reader.
//!
//! A module is processed strictly in file order (options, names, counts,
//! imports, structs, data, code, closures, exports) because every reference
//! resolves backward: data slots may only name lower data ids, closures name
//! procs whose buffers the first code pass has already sized, and exports
//! name closures that exist by the time they are read.
//!
//! The whole load runs inside one no-GC region. Nothing the loader allocates
//! is reachable from any root until the library is published, so a
//! collection at any point mid-load would sweep the half-built module out
//! from under us.

mod data;
mod code;

use crate::binary::BinaryReader;
use crate::error::LoadErrorKind;
use crate::heap::{GcCapability, Heap, NoGcScope};
use crate::library::{Entry, Import, Library, LibraryLoading, StructLayout};

use pz_asm::{
    EntrySignature, OptionType, Width, MAGIC_DESC_LIBRARY, MAGIC_DESC_PROGRAM, MAGIC_LIBRARY,
    MAGIC_OBJECT, MAGIC_PROGRAM, PZ_FORMAT_VERSION,
};

use std::collections::HashMap;
use std::io::{Read, Seek};

/// Closure environment id meaning "no environment".
pub const NO_ENVIRONMENT: u32 = u32::MAX;

const ENTRY_OPTION_LEN: u16 = 5;

/// Loader switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Attach file/line contexts from meta-items to loaded code.
    pub debug_contexts: bool,
}

/// Module variant, from the magic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Variant {
    Program,
    Library,
}

/// Read one module. `loaded` holds the previously-loaded libraries imports
/// resolve against. On success returns the library and its name table; on
/// failure the partially-loaded library is dropped and the module is not
/// available.
pub fn read<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
    heap: &mut Heap,
    parent: &dyn GcCapability,
    loaded: &HashMap<String, Library>,
    options: LoadOptions,
) -> Result<(Library, Vec<String>), LoadErrorKind> {
    // Header.
    let magic = reader.read_u32()?;
    let variant = match magic {
        MAGIC_PROGRAM => Variant::Program,
        MAGIC_LIBRARY => Variant::Library,
        MAGIC_OBJECT => return Err(LoadErrorKind::ObjectNotRunnable),
        other => return Err(LoadErrorKind::BadMagic(other)),
    };

    let desc = reader.read_len_string()?;
    let desc_prefix = match variant {
        Variant::Program => MAGIC_DESC_PROGRAM,
        Variant::Library => MAGIC_DESC_LIBRARY,
    };
    if !desc.starts_with(desc_prefix) {
        return Err(LoadErrorKind::BadDescription(desc));
    }

    let version = reader.read_u16()?;
    if version != PZ_FORMAT_VERSION {
        return Err(LoadErrorKind::VersionMismatch {
            found: version,
            expected: PZ_FORMAT_VERSION,
        });
    }

    // Options.
    let entry_opt = read_options(reader)?;

    // Name table. The module's own name sits at index 0 by convention.
    let num_names = reader.read_u32()?;
    let mut names = Vec::with_capacity(num_names as usize);
    for _ in 0..num_names {
        names.push(reader.read_len_string()?);
    }
    let module_name = names.first().cloned().unwrap_or_default();

    // Entity counts.
    let num_imports = reader.read_u32()?;
    let num_structs = reader.read_u32()?;
    let num_datas = reader.read_u32()?;
    let num_procs = reader.read_u32()?;
    let num_closures = reader.read_u32()?;
    let num_exports = reader.read_u32()?;

    tracing::debug!(
        module = %module_name,
        num_imports,
        num_structs,
        num_datas,
        num_procs,
        num_closures,
        num_exports,
        "loading module"
    );

    let scope = NoGcScope::new(parent);

    let mut lib =
        match LibraryLoading::new(heap, &scope, num_structs, num_datas, num_procs, num_closures) {
            Some(lib) => lib,
            None => {
                scope.is_oom();
                return Err(LoadErrorKind::OutOfMemory { phase: "tables" });
            }
        };

    // Imports, resolved against already-loaded libraries.
    for _ in 0..num_imports {
        let module = reader.read_len_string()?;
        let symbol = reader.read_len_string()?;

        let exporter = loaded
            .get(&module)
            .ok_or_else(|| LoadErrorKind::MissingModule(module.clone()))?;
        let qualified = format!("{module}.{symbol}");
        let export = exporter
            .export(&qualified)
            .ok_or(LoadErrorKind::MissingSymbol { module, symbol })?;

        lib.imports.push(Import {
            closure: export.closure,
            exported_id: export.closure_id,
        });
    }

    // Structs: field widths in, materialised layouts out.
    for _ in 0..num_structs {
        let num_fields = reader.read_u32()?;
        let mut widths = Vec::with_capacity(num_fields as usize);
        for _ in 0..num_fields {
            let code = reader.read_u8()?;
            let offset = reader.tell();
            widths.push(Width::try_from(code).map_err(|tag| LoadErrorKind::BadTag {
                what: "width",
                tag,
                offset,
            })?);
        }
        lib.structs.push(StructLayout::layout(widths));
    }

    // Data.
    for id in 0..num_datas {
        data::read_data(reader, heap, &scope, &mut lib, id)?;
    }
    if scope.is_oom() {
        return Err(LoadErrorKind::OutOfMemory { phase: "data" });
    }

    // Code, sized then read.
    code::read_procs(reader, &mut lib, num_procs, options.debug_contexts)?;

    // Closures bind a proc's code to an environment datum.
    for id in 0..num_closures {
        let proc_id = reader.read_u32()?;
        let data_id = reader.read_u32()?;

        let code = lib
            .procs
            .get(proc_id as usize)
            .ok_or(LoadErrorKind::BadId {
                what: "proc",
                id: proc_id,
            })?
            .code()
            .as_ptr();
        let env = if data_id == NO_ENVIRONMENT {
            std::ptr::null_mut()
        } else {
            *lib.datas
                .get(data_id as usize)
                .ok_or(LoadErrorKind::BadId {
                    what: "data",
                    id: data_id,
                })?
        };

        unsafe {
            *lib.closures[id as usize] = crate::library::Closure { code, env };
        }
    }

    // Exports, published under fully-qualified names.
    for _ in 0..num_exports {
        let symbol = reader.read_len_string()?;
        let closure_id = reader.read_u32()?;
        let closure = lib
            .closures
            .get(closure_id as usize)
            .copied()
            .ok_or(LoadErrorKind::BadId {
                what: "closure",
                id: closure_id,
            })?;

        lib.add_export(format!("{module_name}.{symbol}"), closure_id, closure);
    }

    // Anything after the last export is junk.
    if !reader.is_at_eof()? {
        return Err(LoadErrorKind::JunkAtEnd {
            offset: reader.tell(),
        });
    }

    let entry = match (variant, entry_opt) {
        (Variant::Program, Some((signature, closure_id))) => Some(Entry {
            signature,
            closure: lib
                .closures
                .get(closure_id as usize)
                .copied()
                .ok_or(LoadErrorKind::BadId {
                    what: "closure",
                    id: closure_id,
                })?,
        }),
        _ => None,
    };

    if scope.is_oom() {
        return Err(LoadErrorKind::OutOfMemory { phase: "freeze" });
    }

    Ok((lib.freeze(entry), names))
}

/// Read the option records, recognising the entry closure and skipping
/// unknown types by their length.
fn read_options<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
) -> Result<Option<(EntrySignature, u32)>, LoadErrorKind> {
    let num_opts = reader.read_u16()?;
    let mut entry = None;

    for _ in 0..num_opts {
        let opt_type = reader.read_u16()?;
        let opt_len = reader.read_u16()?;

        match OptionType::try_from(opt_type) {
            Ok(OptionType::EntryClosure) => {
                if opt_len != ENTRY_OPTION_LEN {
                    let offset = reader.tell();
                    return Err(LoadErrorKind::BadTag {
                        what: "entry option length",
                        tag: opt_len as u8,
                        offset,
                    });
                }

                let sig_byte = reader.read_u8()?;
                let offset = reader.tell();
                let signature =
                    EntrySignature::try_from(sig_byte).map_err(|tag| LoadErrorKind::BadTag {
                        what: "entry signature",
                        tag,
                        offset,
                    })?;
                let closure_id = reader.read_u32()?;

                entry = Some((signature, closure_id));
            }
            Err(_) => {
                reader.seek_cur(opt_len as i64)?;
            }
        }
    }

    Ok(entry)
}
