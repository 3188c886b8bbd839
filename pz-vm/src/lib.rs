//! The Plasma runtime.
//!
//! Three subsystems do the real work here: the two-pass [`loader`] that
//! resolves a PZ module's symbolic references while code sizes are still
//! being computed, the conservative mark/sweep [`heap`] with its capability
//! chain and no-GC regions, and the closure-aware [`interpreter`]. The
//! [`pz::Pz`] facade owns all three.

pub mod binary;
pub mod consts;
pub mod error;
pub mod heap;
pub mod interpreter;
pub mod library;
pub mod loader;
pub mod pz;

pub mod prelude {
    //! Re-exports of the types most callers need.

    pub use pz_asm::{EntrySignature, Opcode, Width};

    pub use crate::error::{LoadError, LoadErrorKind, RuntimeError};
    pub use crate::heap::{Heap, HeapOptions, HeapRoot, NoGcScope, ScopedRoots};
    pub use crate::interpreter::Interpreter;
    pub use crate::library::{Closure, Library, Proc, StructLayout};
    pub use crate::loader::LoadOptions;
    pub use crate::pz::Pz;
}
