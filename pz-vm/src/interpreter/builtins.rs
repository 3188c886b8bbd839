//! Native builtin bindings.
//!
//! Builtins are ordinary closures exported by the `Builtin` pseudo-module;
//! each one's proc is a synthesized `ccall <ordinal>; ret` sequence, so the
//! interpreter reaches natives through the same call machinery as any other
//! closure. Strings cross the boundary as NUL-terminated narrow buffers.

use super::{Interpreter, StackValue};
use crate::consts::BUILTIN_MODULE;
use crate::error::RuntimeError;
use crate::heap::{GcCapability, Heap, NoGcScope};
use crate::library::{Closure, Library, LibraryLoading, Proc};

use pz_asm::Opcode;

use std::ffi::CStr;
use std::io::Write;

/// A native bound behind a `ccall` ordinal.
pub type BuiltinFn = fn(&mut Interpreter<'_>) -> Result<(), RuntimeError>;

/// Builtin names, in ordinal order. The table below and the pseudo-module's
/// exports are both indexed by position here.
pub const BUILTIN_NAMES: &[&str] = &["print", "int_to_string", "string_concat", "die"];

/// The dispatch table `ccall` indexes.
pub fn builtin_table() -> &'static [BuiltinFn] {
    const TABLE: [BuiltinFn; 4] = [print, int_to_string, string_concat, die];
    &TABLE
}

unsafe fn string_arg(value: StackValue) -> &'static [u8] {
    CStr::from_ptr(value.word as *const std::ffi::c_char).to_bytes()
}

/// `print(s)`: write a string to the program's output.
fn print(interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
    let s = unsafe { string_arg(interp.pop()?) };
    interp.output().write_all(s)?;
    Ok(())
}

/// `int_to_string(n)`: format a fast integer, pushing a fresh string.
fn int_to_string(interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
    let n = unsafe { interp.pop()?.u64 } as u32 as i32;
    push_string(interp, n.to_string().as_bytes())
}

/// `string_concat(a, b)`: concatenate two strings, pushing a fresh one.
fn string_concat(interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
    let b = unsafe { string_arg(interp.pop()?) };
    let a = unsafe { string_arg(interp.pop()?) };

    // Copy both out before allocating: a collection inside the allocation
    // can no longer see the popped pointers on the stack.
    let mut joined = Vec::with_capacity(a.len() + b.len());
    joined.extend_from_slice(a);
    joined.extend_from_slice(b);

    push_string(interp, &joined)
}

/// `die(s)`: abort execution with a message.
fn die(interp: &mut Interpreter<'_>) -> Result<(), RuntimeError> {
    let s = unsafe { string_arg(interp.pop()?) };
    Err(RuntimeError::Died(
        String::from_utf8_lossy(s).into_owned(),
    ))
}

fn push_string(interp: &mut Interpreter<'_>, bytes: &[u8]) -> Result<(), RuntimeError> {
    let cell = interp.alloc_bytes(bytes.len() + 1)?;
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), cell.as_ptr(), bytes.len());
        std::ptr::write(cell.as_ptr().add(bytes.len()), 0);
    }
    interp.push(StackValue::from_raw(cell.as_ptr() as u64));
    Ok(())
}

/// Build the `Builtin` pseudo-module: one `ccall <ordinal>; ret` proc and
/// one environment-less closure per builtin, exported under its name.
pub fn make_builtin_library(heap: &mut Heap, parent: &dyn GcCapability) -> Library {
    let scope = NoGcScope::new(parent);
    let count = BUILTIN_NAMES.len() as u32;

    let mut lib = LibraryLoading::new(heap, &scope, 0, 0, count, count)
        .unwrap_or_else(|| {
            scope.abort_if_oom("builtin module");
            unreachable!()
        });

    for (ordinal, name) in BUILTIN_NAMES.iter().enumerate() {
        // ccall at 0, its u32 ordinal aligned to 4, ret after it.
        let mut proc = Proc::new((*name).to_string(), 9);
        let code = proc.code_mut();
        code[0] = Opcode::CCall as u8;
        code[4..8].copy_from_slice(&(ordinal as u32).to_le_bytes());
        code[8] = Opcode::Ret as u8;
        lib.procs.push(proc);

        let closure = lib.closures[ordinal];
        unsafe {
            *closure = Closure {
                code: lib.procs[ordinal].code().as_ptr(),
                env: std::ptr::null_mut(),
            };
        }

        lib.add_export(
            format!("{BUILTIN_MODULE}.{name}"),
            ordinal as u32,
            closure,
        );
    }

    scope.abort_if_oom("builtin module");
    lib.freeze(None)
}
