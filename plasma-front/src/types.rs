//! Source-level types.

use std::collections::BTreeSet;
use std::fmt;

/// A source position carried on constraints for error reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context {
    /// Source file name.
    pub file: String,
    /// 1-based line number.
    pub line: u32,
}

impl Context {
    /// A context at a file and line.
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Context {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// The builtin types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinType {
    /// Machine integers.
    Int,
    /// Immutable strings.
    String,
    /// A single Unicode code point.
    Codepoint,
    /// A position within a string.
    StringPos,
}

impl fmt::Display for BuiltinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuiltinType::Int => "Int",
            BuiltinType::String => "String",
            BuiltinType::Codepoint => "Codepoint",
            BuiltinType::StringPos => "StringPos",
        };
        f.write_str(name)
    }
}

/// Index of a user-defined type in the module environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeId(pub u32);

/// A resource name. Resource sets on function types are unioned during
/// unification.
pub type Resource = String;

/// A function type with its used and observed resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FuncType {
    /// Input types, in order.
    pub inputs: Vec<Type>,
    /// Output types, in order.
    pub outputs: Vec<Type>,
    /// Resources the function uses (may modify).
    pub uses: BTreeSet<Resource>,
    /// Resources the function only observes.
    pub observes: BTreeSet<Resource>,
}

/// A source type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    /// One of the builtins.
    Builtin(BuiltinType),
    /// A type variable, scoped to its declaration.
    Var(String),
    /// A reference to a user type, applied to arguments.
    Ref(TypeId, Vec<Type>),
    /// A function type.
    Func(FuncType),
}

impl Type {
    /// Shorthand for an unapplied user type.
    pub fn ref0(id: TypeId) -> Self {
        Type::Ref(id, Vec::new())
    }
}
