//! File-level constants of the PZ container: magic numbers, the format
//! version, option records and code-item tags.

/// Magic number of a directly runnable program file.
pub const MAGIC_PROGRAM: u32 = 0x505A_5000;

/// Magic number of a library file (exports only).
pub const MAGIC_LIBRARY: u32 = 0x505A_4C00;

/// Magic number of an object file. Objects cannot be executed and are
/// rejected by the runtime loader.
pub const MAGIC_OBJECT: u32 = 0x505A_4F00;

/// Prefix of the description string following the magic in program files.
pub const MAGIC_DESC_PROGRAM: &str = "Plasma program";

/// Prefix of the description string following the magic in library files.
pub const MAGIC_DESC_LIBRARY: &str = "Plasma library";

/// Supported format version. Readers require an exact match; there is no
/// backward compatibility.
pub const PZ_FORMAT_VERSION: u16 = 1;

/// Recognised option record types. Unknown types are skipped by length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum OptionType {
    /// `(signature:u8, closure_id:u32)` naming the entry closure.
    EntryClosure = 0,
}

impl TryFrom<u16> for OptionType {
    type Error = u16;

    fn try_from(n: u16) -> Result<Self, u16> {
        match n {
            0 => Ok(Self::EntryClosure),
            _ => Err(n),
        }
    }
}

/// Calling signature of a program's entry closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EntrySignature {
    /// No arguments; returns an exit code.
    Plain = 0,
    /// Receives the command-line argument vector.
    Argv = 1,
}

impl TryFrom<u8> for EntrySignature {
    type Error = u8;

    fn try_from(n: u8) -> Result<Self, u8> {
        match n {
            0 => Ok(Self::Plain),
            1 => Ok(Self::Argv),
            _ => Err(n),
        }
    }
}

/// Leading byte of a data entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DataKind {
    /// `(num_elements:u16, element_width:u8, element*)`.
    Array = 0,
    /// `(struct_id:u32, field*)` with fields in struct order.
    Struct = 1,
    /// A flat narrow-character buffer, encoded like an array of 1-byte
    /// elements.
    String = 2,
}

impl TryFrom<u8> for DataKind {
    type Error = u8;

    fn try_from(n: u8) -> Result<Self, u8> {
        match n {
            0 => Ok(Self::Array),
            1 => Ok(Self::Struct),
            2 => Ok(Self::String),
            _ => Err(n),
        }
    }
}

/// Leading byte of an item within a code block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CodeItemTag {
    /// An instruction follows.
    Instr = 0,
    /// `context(data_id:u32, line:u32)`: full source context, with the
    /// filename given as a data id.
    MetaContext = 1,
    /// `context_short(line:u32)`: the filename is unchanged.
    MetaContextShort = 2,
    /// Clears the current source context.
    MetaContextNil = 3,
}

impl TryFrom<u8> for CodeItemTag {
    type Error = u8;

    fn try_from(n: u8) -> Result<Self, u8> {
        match n {
            0 => Ok(Self::Instr),
            1 => Ok(Self::MetaContext),
            2 => Ok(Self::MetaContextShort),
            3 => Ok(Self::MetaContextNil),
            _ => Err(n),
        }
    }
}
