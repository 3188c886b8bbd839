//! The ANF-normalised core expressions the checker consumes, and the module
//! environment of function signatures and constructors they refer to.

use crate::types::{Context, Resource, Type, TypeId};

use std::collections::BTreeSet;

/// Index of a function in the module environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// Index of a constructor in the module environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CtorId(pub u32);

/// A function's declared signature.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    /// Type parameter names, scoped to this declaration.
    pub type_params: Vec<String>,
    /// Input types.
    pub inputs: Vec<Type>,
    /// Output types.
    pub outputs: Vec<Type>,
    /// Types of the variables a closure over this function captures.
    pub captures: Vec<Type>,
    /// Resources used.
    pub uses: BTreeSet<Resource>,
    /// Resources observed.
    pub observes: BTreeSet<Resource>,
}

/// One constructor of a user type.
#[derive(Debug, Clone)]
pub struct Constructor {
    /// Constructor name; several constructors may share one, which is what
    /// makes candidate sets non-singleton.
    pub name: String,
    /// The user type this constructor builds.
    pub type_id: TypeId,
    /// The owning type's parameter names, in declaration order.
    pub type_params: Vec<String>,
    /// Field types, possibly mentioning the type parameters.
    pub fields: Vec<Type>,
}

/// A user-defined type.
#[derive(Debug, Clone)]
pub struct UserType {
    /// Type name.
    pub name: String,
    /// Type parameter names.
    pub params: Vec<String>,
    /// Its constructors.
    pub ctors: Vec<CtorId>,
}

/// Everything the checker needs to know about the enclosing module.
#[derive(Debug, Clone, Default)]
pub struct ModuleEnv {
    /// Functions by id: name and signature.
    pub funcs: Vec<(String, Signature)>,
    /// User types by id.
    pub types: Vec<UserType>,
    /// Constructors by id.
    pub ctors: Vec<Constructor>,
}

impl ModuleEnv {
    /// A function's signature.
    pub fn func(&self, id: FuncId) -> &Signature {
        &self.funcs[id.0 as usize].1
    }

    /// A constructor.
    pub fn ctor(&self, id: CtorId) -> &Constructor {
        &self.ctors[id.0 as usize]
    }

    /// All constructors sharing a name: the candidate set a pattern or
    /// construction disjoins over.
    pub fn ctors_named(&self, name: &str) -> Vec<CtorId> {
        self.ctors
            .iter()
            .enumerate()
            .filter(|(_, c)| c.name == name)
            .map(|(i, _)| CtorId(i as u32))
            .collect()
    }
}

/// An expression, with the source context its constraints will carry.
#[derive(Debug, Clone)]
pub struct Expr {
    /// What it is.
    pub kind: ExprKind,
    /// Where it came from.
    pub context: Context,
}

impl Expr {
    /// An expression at a context.
    pub fn new(kind: ExprKind, context: Context) -> Self {
        Expr { kind, context }
    }
}

/// Expression kinds. Arguments of calls and constructions are variables;
/// the lowering that feeds the checker has already normalised to ANF.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// A variable reference.
    Var(String),
    /// An integer literal.
    Num(i64),
    /// A string literal. One-codepoint literals are ambiguous between
    /// `String` and `Codepoint`.
    Str(String),
    /// A reference to a top-level function as a value.
    FuncRef(FuncId),
    /// Multiple results.
    Tuple(Vec<Expr>),
    /// A single-variable binding.
    Let {
        /// The bound variable.
        var: String,
        /// Its value.
        value: Box<Expr>,
        /// The expression it scopes over.
        body: Box<Expr>,
    },
    /// A first-order call.
    Call {
        /// The callee.
        func: FuncId,
        /// Argument variables.
        args: Vec<String>,
    },
    /// A call through a variable of function type.
    HoCall {
        /// The variable holding the callee.
        callee: String,
        /// Argument variables.
        args: Vec<String>,
        /// How many results the call produces in its position.
        num_results: usize,
    },
    /// A case analysis.
    Match {
        /// The scrutinised variable.
        var: String,
        /// The cases, in order.
        cases: Vec<Case>,
    },
    /// Building a constructor application.
    Construction {
        /// Candidate constructors sharing the spelled name.
        ctors: Vec<CtorId>,
        /// Field argument variables.
        args: Vec<String>,
    },
    /// A closure over a function and its captured variables.
    Closure {
        /// The function.
        func: FuncId,
        /// The captured variables, matching the signature's capture types.
        captured: Vec<String>,
    },
}

/// One arm of a match.
#[derive(Debug, Clone)]
pub struct Case {
    /// The pattern.
    pub pattern: Pattern,
    /// The arm's body.
    pub body: Expr,
}

/// Patterns.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Bind the scrutinee to a variable.
    Var(String),
    /// Deconstruct a constructor application, binding its fields.
    Ctor {
        /// Candidate constructors sharing the spelled name.
        ctors: Vec<CtorId>,
        /// Field binding variables.
        binds: Vec<String>,
    },
}
