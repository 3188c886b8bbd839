//! Runtime error types.

use std::io;

use thiserror::Error;

/// A module failed to load. Wraps the failure with the file it came from;
/// the partially-loaded library has already been discarded by the time this
/// surfaces.
#[derive(Debug, Error)]
#[error("{filename}: {source}")]
pub struct LoadError {
    /// The file being loaded.
    pub filename: String,
    /// What went wrong.
    #[source]
    pub source: LoadErrorKind,
}

/// Format and resolution failures raised while reading a PZ file.
#[derive(Debug, Error)]
pub enum LoadErrorKind {
    /// The magic number matches no known module variant.
    #[error("not a PZ file (magic 0x{0:08x})")]
    BadMagic(u32),

    /// Object files hold unlinked code and cannot be executed.
    #[error("object files cannot be executed")]
    ObjectNotRunnable,

    /// The description string does not match the module variant.
    #[error("bad module description {0:?}")]
    BadDescription(String),

    /// The format version is not the one this reader supports.
    #[error("format version {found}, expected {expected}")]
    VersionMismatch {
        /// Version found in the file.
        found: u16,
        /// Version this reader supports.
        expected: u16,
    },

    /// The file ended in the middle of a record.
    #[error("truncated record at offset {offset}")]
    Truncated {
        /// File offset of the failed read.
        offset: u64,
    },

    /// A string field held invalid UTF-8.
    #[error("invalid string at offset {offset}")]
    BadString {
        /// File offset of the string's length prefix.
        offset: u64,
    },

    /// Input remained after the last export record.
    #[error("junk at end of file at offset {offset}")]
    JunkAtEnd {
        /// Offset of the first stray byte.
        offset: u64,
    },

    /// An unknown tag byte in a context that has no skip length.
    #[error("unknown {what} tag 0x{tag:02x} at offset {offset}")]
    BadTag {
        /// What was being decoded.
        what: &'static str,
        /// The offending byte.
        tag: u8,
        /// File offset of the byte.
        offset: u64,
    },

    /// A local id pointed outside its table.
    #[error("{what} id {id} out of range")]
    BadId {
        /// The table the id indexes.
        what: &'static str,
        /// The offending id.
        id: u32,
    },

    /// A data slot referenced a data entry at or above its own id.
    /// References only resolve backward.
    #[error("forward reference from data {referrer} to data {referent}")]
    ForwardDataReference {
        /// The entry holding the slot.
        referrer: u32,
        /// The entry it tried to reference.
        referent: u32,
    },

    /// An imported module has not been loaded.
    #[error("imported module {0:?} is not loaded")]
    MissingModule(String),

    /// An imported symbol is not exported by its module.
    #[error("symbol {symbol:?} not found in module {module:?}")]
    MissingSymbol {
        /// The module searched.
        module: String,
        /// The missing symbol.
        symbol: String,
    },

    /// The heap could not satisfy the loader inside its no-GC region.
    #[error("out of memory while loading ({phase})")]
    OutOfMemory {
        /// The load phase that failed.
        phase: &'static str,
    },

    /// An I/O failure other than a short read.
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Interpreter faults. These abort execution of the current program.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The program has no entry closure to run.
    #[error("module has no entry closure")]
    NoEntryClosure,

    /// An instruction popped more values than the stack held.
    #[error("expression stack underflow")]
    StackUnderflow,

    /// The call stack outgrew its hard limit.
    #[error("call depth exceeded")]
    CallDepthExceeded,

    /// Integer division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,

    /// The instruction stream held a byte that is not an opcode.
    #[error("invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),

    /// A `ccall` named a builtin ordinal that is not bound.
    #[error("unknown builtin ordinal {0}")]
    UnknownBuiltin(u32),

    /// The program called `Builtin.die`.
    #[error("die: {0}")]
    Died(String),

    /// The heap was exhausted during execution.
    #[error("out of memory")]
    OutOfMemory,

    /// A builtin failed writing to the output sink.
    #[error(transparent)]
    Io(#[from] io::Error),
}
