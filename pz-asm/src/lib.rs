#![warn(missing_docs)]

//! Atomic types of the PZ bytecode format.
//!
//! This crate is pure data: magic numbers, operand widths, data-slot
//! encodings and the instruction set, together with the static
//! [`instruction_info`] table that drives both the loader passes and the
//! interpreter dispatch. It performs no I/O; the runtime crate layers the
//! actual reader on top of these definitions.

mod format;
mod opcode;
mod width;

pub use format::{
    CodeItemTag, DataKind, EntrySignature, OptionType, MAGIC_DESC_LIBRARY, MAGIC_DESC_PROGRAM,
    MAGIC_LIBRARY, MAGIC_OBJECT, MAGIC_PROGRAM, PZ_FORMAT_VERSION,
};
pub use opcode::{instruction_info, ImmediateKind, InstructionInfo, Opcode};
pub use width::Width;

/// Tag byte of a data slot: high nibble is the encoding kind, low nibble the
/// encoded byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataEnc {
    /// Inline integer of the slot's exact width.
    Normal = 0x00,
    /// 32-bit encoded integer stored at the fast width.
    Fast = 0x10,
    /// Signed 32-bit encoded integer stored at pointer width.
    Wptr = 0x20,
    /// 32-bit local data id, stored as a data pointer.
    Data = 0x30,
    /// 32-bit local import id, stored as a closure pointer.
    Import = 0x40,
    /// 32-bit local closure id, stored as a closure pointer.
    Closure = 0x50,
}

impl DataEnc {
    /// Split a slot tag byte into its encoding kind and byte count.
    pub fn split_tag(tag: u8) -> Result<(DataEnc, u8), u8> {
        let enc = match tag & 0xf0 {
            0x00 => DataEnc::Normal,
            0x10 => DataEnc::Fast,
            0x20 => DataEnc::Wptr,
            0x30 => DataEnc::Data,
            0x40 => DataEnc::Import,
            0x50 => DataEnc::Closure,
            _ => return Err(tag),
        };

        Ok((enc, tag & 0x0f))
    }

    /// Join an encoding kind and byte count back into a slot tag byte.
    pub const fn make_tag(self, num_bytes: u8) -> u8 {
        self as u8 | (num_bytes & 0x0f)
    }
}
