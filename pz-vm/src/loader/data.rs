//! Data entries: arrays, structs and strings of tagged slots.

use crate::binary::BinaryReader;
use crate::error::LoadErrorKind;
use crate::heap::{Heap, NoGcScope};
use crate::library::LibraryLoading;

use pz_asm::{DataEnc, DataKind, Width};

use std::io::{Read, Seek};
use std::ptr;

/// Read one data entry and append its payload pointer to the library.
pub(super) fn read_data<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
    heap: &mut Heap,
    scope: &NoGcScope<'_>,
    lib: &mut LibraryLoading,
    id: u32,
) -> Result<(), LoadErrorKind> {
    let kind_byte = reader.read_u8()?;
    let offset = reader.tell();
    let kind = DataKind::try_from(kind_byte).map_err(|tag| LoadErrorKind::BadTag {
        what: "data kind",
        tag,
        offset,
    })?;

    let payload = match kind {
        DataKind::Array | DataKind::String => {
            let num_elements = reader.read_u16()? as usize;
            let width_byte = reader.read_u8()?;
            let offset = reader.tell();
            let width = Width::try_from(width_byte).map_err(|tag| LoadErrorKind::BadTag {
                what: "width",
                tag,
                offset,
            })?;

            // Strings get a trailing NUL so builtins can consume them as
            // flat narrow buffers; the UTF-8 remains undecoded.
            let extra = usize::from(kind == DataKind::String);
            let size = num_elements * width.size() + extra;
            let Some(payload) = heap.alloc_bytes(size.max(1), scope) else {
                scope.is_oom();
                return Err(LoadErrorKind::OutOfMemory { phase: "data" });
            };
            let payload = payload.as_ptr();

            for element in 0..num_elements {
                let dest = unsafe { payload.add(element * width.size()) };
                read_slot(reader, lib, id, dest, width)?;
            }

            payload
        }

        DataKind::Struct => {
            let struct_id = reader.read_u32()?;
            let layout = lib
                .structs
                .get(struct_id as usize)
                .ok_or(LoadErrorKind::BadId {
                    what: "struct",
                    id: struct_id,
                })?
                .clone();

            let Some(payload) = heap.alloc_bytes(layout.total_size().max(1), scope) else {
                scope.is_oom();
                return Err(LoadErrorKind::OutOfMemory { phase: "data" });
            };
            let payload = payload.as_ptr();

            for field in 0..layout.num_fields() {
                let dest = unsafe { payload.add(layout.field_offset(field)) };
                read_slot(reader, lib, id, dest, layout.field_width(field))?;
            }

            payload
        }
    };

    lib.datas.push(payload);
    Ok(())
}

/// Read one `(enc_type:4, enc_bytes:4)` slot and write its value at the
/// target width.
fn read_slot<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
    lib: &LibraryLoading,
    referrer: u32,
    dest: *mut u8,
    width: Width,
) -> Result<(), LoadErrorKind> {
    let tag = reader.read_u8()?;
    let offset = reader.tell();
    let (enc, enc_bytes) = DataEnc::split_tag(tag).map_err(|tag| LoadErrorKind::BadTag {
        what: "data encoding",
        tag,
        offset,
    })?;

    match enc {
        DataEnc::Normal => {
            let value = read_sized(reader, enc_bytes)?;
            write_bytes(dest, value, width.size());
        }

        DataEnc::Fast => {
            // 32-bit encoded, sign-extended to the fast register width.
            let value = reader.read_u32()? as i32 as i64 as u64;
            write_bytes(dest, value, Width::Fast.size());
        }

        DataEnc::Wptr => {
            let value = reader.read_u32()? as i32 as isize as usize;
            write_bytes(dest, value as u64, Width::Ptr.size());
        }

        DataEnc::Data => {
            let referent = reader.read_u32()?;
            // Only backward references resolve; lib.datas holds exactly the
            // entries below `referrer` at this point.
            if referent >= referrer {
                return Err(LoadErrorKind::ForwardDataReference { referrer, referent });
            }
            let target = lib.datas[referent as usize];
            write_bytes(dest, target as u64, Width::Ptr.size());
        }

        DataEnc::Import => {
            let import_id = reader.read_u32()?;
            let import = lib
                .imports
                .get(import_id as usize)
                .ok_or(LoadErrorKind::BadId {
                    what: "import",
                    id: import_id,
                })?;
            write_bytes(dest, import.closure as u64, Width::Ptr.size());
        }

        DataEnc::Closure => {
            let closure_id = reader.read_u32()?;
            let closure = lib
                .closures
                .get(closure_id as usize)
                .copied()
                .ok_or(LoadErrorKind::BadId {
                    what: "closure",
                    id: closure_id,
                })?;
            write_bytes(dest, closure as u64, Width::Ptr.size());
        }
    }

    Ok(())
}

fn read_sized<R: Read + Seek>(
    reader: &mut BinaryReader<R>,
    enc_bytes: u8,
) -> Result<u64, LoadErrorKind> {
    match enc_bytes {
        1 => Ok(reader.read_u8()? as u64),
        2 => Ok(reader.read_u16()? as u64),
        4 => Ok(reader.read_u32()? as u64),
        8 => Ok(reader.read_u64()?),
        tag => {
            let offset = reader.tell();
            Err(LoadErrorKind::BadTag {
                what: "slot size",
                tag,
                offset,
            })
        }
    }
}

/// Write the low `size` bytes of `value`, little-endian, at `dest`.
fn write_bytes(dest: *mut u8, value: u64, size: usize) {
    let bytes = value.to_le_bytes();
    unsafe {
        ptr::copy_nonoverlapping(bytes.as_ptr(), dest, size);
    }
}
