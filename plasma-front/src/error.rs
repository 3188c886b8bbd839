//! Type-checking errors.

use crate::types::Context;

use thiserror::Error;

/// A type error surfaced to the user. Collected rather than thrown one at a
/// time; the driver returns everything it found.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    /// Two constraints demanded incompatible types.
    #[error("{context}: type mismatch: {detail}")]
    Mismatch {
        /// Source position of the offending constraint.
        context: Context,
        /// What failed to unify.
        detail: String,
    },

    /// More than one alternative of a disjunction held with nothing left to
    /// tell them apart.
    #[error("{context}: ambiguous type")]
    Ambiguous {
        /// Source position of the offending constraint.
        context: Context,
    },

    /// The solver stopped making progress while named variables were still
    /// unbound.
    #[error("cannot infer types for {}: {outstanding} constraints outstanding", vars.join(", "))]
    Floundered {
        /// The named variables that never became ground.
        vars: Vec<String>,
        /// How many clauses were still queued.
        outstanding: usize,
    },
}
