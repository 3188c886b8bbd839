//! Proc code, sized by the first pass and emitted by the second.
//!
//! Label and call immediates encode absolute byte addresses in the loaded
//! buffer, but the buffer's size depends on per-instruction operand widths.
//! The first pass scans every item to compute each proc's total size and
//! per-block offsets; the second pass seeks back and writes the resolved
//! instruction stream into the buffers allocated in between.

use crate::binary::BinaryReader;
use crate::consts::WORD_SIZE;
use crate::error::LoadErrorKind;
use crate::library::{LibraryLoading, Proc, SrcPoint};

use pz_asm::{instruction_info, CodeItemTag, ImmediateKind, Opcode, Width};

use std::ffi::CStr;
use std::io::{Read, Seek};

/// How one immediate is encoded in the file and laid out in loaded code.
struct ImmLayout {
    loaded_bytes: usize,
    align: usize,
}

/// Immediate layout for an instruction, or `None` if it has no immediate.
///
/// Both passes derive sizes from this single function; the two passes
/// cannot disagree on an instruction's footprint.
fn immediate_layout(op: Opcode, kind: ImmediateKind, width1: Option<Width>) -> Option<ImmLayout> {
    use ImmediateKind as Imm;

    let (loaded_bytes, align) = match kind {
        Imm::None => return None,
        Imm::U8 => (1, 1),
        Imm::U16 => (2, 2),
        // A load-immediate stores its value at the instruction's width.
        Imm::U32 if op == Opcode::LoadImmediate => {
            let size = width1.map_or(4, Width::size);
            (size, size)
        }
        Imm::U32 => (4, 4),
        Imm::U64 => (8, 8),
        Imm::ClosureRef | Imm::ProcRef | Imm::LabelRef | Imm::ImportClosureRef => {
            (WORD_SIZE, WORD_SIZE)
        }
        Imm::ImportRef | Imm::StructRef | Imm::StructRefField => (4, 4),
    };

    Some(ImmLayout {
        loaded_bytes,
        align,
    })
}

/// Bytes the immediate occupies in the file.
fn immediate_file_bytes(kind: ImmediateKind) -> i64 {
    use ImmediateKind as Imm;

    match kind {
        Imm::None => 0,
        Imm::U8 => 1,
        Imm::U16 => 2,
        Imm::U64 => 8,
        Imm::StructRefField => 8,
        _ => 4,
    }
}

const fn align_to(offset: usize, align: usize) -> usize {
    (offset + align - 1) / align * align
}

/// Read every proc: first pass sizes, second pass emits.
pub(super) fn read_procs<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
    lib: &mut LibraryLoading,
    num_procs: u32,
    debug_contexts: bool,
) -> Result<(), LoadErrorKind> {
    let code_start = reader.tell();

    let mut all_block_offsets = Vec::with_capacity(num_procs as usize);
    for _ in 0..num_procs {
        let name = reader.read_len_string()?;
        let num_blocks = reader.read_u32()?;

        let mut block_offsets = Vec::with_capacity(num_blocks as usize);
        let mut size = 0usize;
        for _ in 0..num_blocks {
            block_offsets.push(size);
            let num_items = reader.read_u32()?;
            for _ in 0..num_items {
                scan_item(reader, &mut size)?;
            }
        }

        all_block_offsets.push(block_offsets);
        lib.procs.push(Proc::new(name, size));
    }

    reader.seek_set(code_start)?;

    for proc_index in 0..num_procs as usize {
        let _name = reader.read_len_string()?;
        let num_blocks = reader.read_u32()?;

        let mut offset = 0usize;
        let mut current_file = None;
        for _ in 0..num_blocks {
            let num_items = reader.read_u32()?;
            for _ in 0..num_items {
                emit_item(
                    reader,
                    lib,
                    proc_index,
                    &all_block_offsets[proc_index],
                    &mut offset,
                    &mut current_file,
                    debug_contexts,
                )?;
            }
        }

        debug_assert_eq!(offset, lib.procs[proc_index].code().len());
    }

    Ok(())
}

fn read_item_tag<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
) -> Result<CodeItemTag, LoadErrorKind> {
    let byte = reader.read_u8()?;
    let offset = reader.tell();
    CodeItemTag::try_from(byte).map_err(|tag| LoadErrorKind::BadTag {
        what: "code item",
        tag,
        offset,
    })
}

fn read_opcode<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Opcode, LoadErrorKind> {
    let byte = reader.read_u8()?;
    let offset = reader.tell();
    Opcode::try_from(byte).map_err(|tag| LoadErrorKind::BadTag {
        what: "opcode",
        tag,
        offset,
    })
}

fn read_width<R: Read + Seek>(reader: &mut BinaryReader<R>) -> Result<Width, LoadErrorKind> {
    let byte = reader.read_u8()?;
    let offset = reader.tell();
    Width::try_from(byte).map_err(|tag| LoadErrorKind::BadTag {
        what: "width",
        tag,
        offset,
    })
}

/// First pass: advance past one item, growing the proc's size.
fn scan_item<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
    size: &mut usize,
) -> Result<(), LoadErrorKind> {
    match read_item_tag(reader)? {
        CodeItemTag::Instr => {
            let op = read_opcode(reader)?;
            let info = instruction_info(op);

            *size += 1;
            let mut width1 = None;
            for index in 0..info.num_width_bytes {
                let width = read_width(reader)?;
                if index == 0 {
                    width1 = Some(width);
                }
                *size += 1;
            }

            if let Some(layout) = immediate_layout(op, info.immediate, width1) {
                reader.seek_cur(immediate_file_bytes(info.immediate))?;
                *size = align_to(*size, layout.align) + layout.loaded_bytes;
            }
        }
        CodeItemTag::MetaContext => reader.seek_cur(8)?,
        CodeItemTag::MetaContextShort => reader.seek_cur(4)?,
        CodeItemTag::MetaContextNil => {}
    }

    Ok(())
}

/// Second pass: re-read one item and write its resolved form.
fn emit_item<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
    lib: &mut LibraryLoading,
    proc_index: usize,
    block_offsets: &[usize],
    offset: &mut usize,
    current_file: &mut Option<String>,
    debug_contexts: bool,
) -> Result<(), LoadErrorKind> {
    match read_item_tag(reader)? {
        CodeItemTag::Instr => {
            let op = read_opcode(reader)?;
            let info = instruction_info(op);

            write_code(lib, proc_index, *offset, op as u64, 1);
            *offset += 1;

            let mut width1 = None;
            for index in 0..info.num_width_bytes {
                let width = read_width(reader)?;
                if index == 0 {
                    width1 = Some(width);
                }
                write_code(lib, proc_index, *offset, width as u8 as u64, 1);
                *offset += 1;
            }

            if let Some(layout) = immediate_layout(op, info.immediate, width1) {
                let value = resolve_immediate(
                    reader,
                    lib,
                    proc_index,
                    block_offsets,
                    info.immediate,
                    layout.loaded_bytes,
                )?;

                *offset = align_to(*offset, layout.align);
                write_code(lib, proc_index, *offset, value, layout.loaded_bytes);
                *offset += layout.loaded_bytes;
            }
        }

        CodeItemTag::MetaContext => {
            let data_id = reader.read_u32()?;
            let line = reader.read_u32()?;

            if debug_contexts {
                let file = string_from_data(lib, data_id)?;
                *current_file = Some(file.clone());
                lib.procs[proc_index].add_context(*offset, Some(SrcPoint { file, line }));
            }
        }

        CodeItemTag::MetaContextShort => {
            let line = reader.read_u32()?;

            if debug_contexts {
                if let Some(file) = current_file.clone() {
                    lib.procs[proc_index].add_context(*offset, Some(SrcPoint { file, line }));
                }
            }
        }

        CodeItemTag::MetaContextNil => {
            if debug_contexts {
                lib.procs[proc_index].add_context(*offset, None);
            }
        }
    }

    Ok(())
}

/// Read a symbolic or raw immediate and produce the value to store.
fn resolve_immediate<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
    lib: &LibraryLoading,
    proc_index: usize,
    block_offsets: &[usize],
    kind: ImmediateKind,
    loaded_bytes: usize,
) -> Result<u64, LoadErrorKind> {
    use ImmediateKind as Imm;

    Ok(match kind {
        Imm::None => unreachable!("no immediate to resolve"),
        Imm::U8 => reader.read_u8()? as u64,
        Imm::U16 => reader.read_u16()? as u64,
        Imm::U64 => reader.read_u64()?,

        Imm::U32 => {
            let raw = reader.read_u32()?;
            // Wider loads sign-extend the 32-bit encoded value.
            if loaded_bytes > 4 {
                raw as i32 as i64 as u64
            } else {
                raw as u64
            }
        }

        Imm::ClosureRef => {
            let id = reader.read_u32()?;
            let closure = lib
                .closures
                .get(id as usize)
                .copied()
                .ok_or(LoadErrorKind::BadId { what: "closure", id })?;
            closure as u64
        }

        Imm::ProcRef => {
            let id = reader.read_u32()?;
            lib.procs
                .get(id as usize)
                .ok_or(LoadErrorKind::BadId { what: "proc", id })?
                .code_addr() as u64
        }

        Imm::LabelRef => {
            let id = reader.read_u32()?;
            let block_offset = block_offsets
                .get(id as usize)
                .copied()
                .ok_or(LoadErrorKind::BadId { what: "label", id })?;
            (lib.procs[proc_index].code_addr() + block_offset) as u64
        }

        Imm::ImportClosureRef => {
            let id = reader.read_u32()?;
            lib.imports
                .get(id as usize)
                .ok_or(LoadErrorKind::BadId { what: "import", id })?
                .closure as u64
        }

        Imm::ImportRef => {
            let id = reader.read_u32()?;
            if id as usize >= lib.imports.len() {
                return Err(LoadErrorKind::BadId { what: "import", id });
            }
            (id as usize * WORD_SIZE) as u64
        }

        Imm::StructRef => {
            let id = reader.read_u32()?;
            lib.structs
                .get(id as usize)
                .ok_or(LoadErrorKind::BadId { what: "struct", id })?
                .total_size() as u64
        }

        Imm::StructRefField => {
            let id = reader.read_u32()?;
            let field = reader.read_u32()?;
            let layout = lib
                .structs
                .get(id as usize)
                .ok_or(LoadErrorKind::BadId { what: "struct", id })?;
            if field as usize >= layout.num_fields() {
                return Err(LoadErrorKind::BadId {
                    what: "field",
                    id: field,
                });
            }
            layout.field_offset(field as usize) as u64
        }
    })
}

/// Read a NUL-terminated filename out of a string data blob.
fn string_from_data(lib: &LibraryLoading, data_id: u32) -> Result<String, LoadErrorKind> {
    let data = lib
        .datas
        .get(data_id as usize)
        .copied()
        .ok_or(LoadErrorKind::BadId {
            what: "data",
            id: data_id,
        })?;

    let cstr = unsafe { CStr::from_ptr(data as *const std::ffi::c_char) };
    Ok(cstr.to_string_lossy().into_owned())
}

/// Store the low `size` bytes of `value`, little-endian, into the proc's
/// code buffer.
fn write_code(lib: &mut LibraryLoading, proc_index: usize, offset: usize, value: u64, size: usize) {
    let bytes = value.to_le_bytes();
    lib.procs[proc_index].code_mut()[offset..offset + size].copy_from_slice(&bytes[..size]);
}
