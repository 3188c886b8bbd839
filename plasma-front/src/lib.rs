//! The Plasma compiler front-end slice: source types, core expressions, the
//! type-constraint solver and the type-check driver.
//!
//! Type checking is constraint propagation over Herbrand-style domains. The
//! driver walks ANF-normalised expressions posting constraints, the
//! constraints flatten to CNF clauses, and the solver iterates the clauses
//! with a delay queue until either every named variable is ground or no
//! further progress is possible.

pub mod error;
pub mod expr;
pub mod solver;
pub mod typecheck;
pub mod types;

pub mod prelude {
    //! Re-exports of the types most callers need.

    pub use crate::error::TypeError;
    pub use crate::expr::{Case, Expr, ExprKind, ModuleEnv, Pattern, Signature};
    pub use crate::solver::{Problem, Solution};
    pub use crate::typecheck::{check_function, Checked};
    pub use crate::types::{BuiltinType, Context, FuncType, Type, TypeId};
}
