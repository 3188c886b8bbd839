//! The type-constraint solver.
//!
//! Constraints arrive as trees of literals, conjunctions and disjunctions;
//! they are normalised to CNF clauses and iterated with a delay queue.
//! A round runs every outstanding clause once. Progress means the clause
//! count strictly decreased or some domain was narrowed; when a round makes
//! no progress the solver either accepts (every named variable ground) or
//! reports floundering.
//!
//! Disjunctions are single-answer: a write is only ever committed for the
//! sole surviving alternative, so no clause can commit a store write that a
//! later clause would have to undo.

mod domain;

pub use domain::{unify_domains, unify_resources, Domain, Resources, UnifyStatus};

use crate::error::TypeError;
use crate::types::{BuiltinType, Context, FuncType, Resource, Type, TypeId};

use itertools::Itertools;

use std::collections::{BTreeSet, HashMap};

/// A solver variable. Ordered by allocation; the order is used to
/// canonicalise `v = v` literals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Var(u32);

/// What a solver variable stands for. Only named variables must be ground
/// for a solution to be accepted, and only they appear in the substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
enum VarKind {
    /// A program variable.
    Named(String),
    /// An intermediate result.
    Anon,
    /// A source type variable, interned through the scoped mapping.
    TypeVar,
}

/// An atomic constraint with its source context.
#[derive(Debug, Clone)]
pub struct Literal {
    /// The relation.
    pub kind: LiteralKind,
    /// Where it came from.
    pub context: Context,
}

/// Atomic constraint kinds.
#[derive(Debug, Clone)]
pub enum LiteralKind {
    /// Trivially true.
    True,
    /// `v = builtin`.
    Builtin(Var, BuiltinType),
    /// `v = usertype(id, args)` with argument variables.
    UserType {
        /// The constrained variable.
        var: Var,
        /// The user type.
        type_id: TypeId,
        /// Argument variables, unified point-wise with the type's
        /// arguments.
        args: Vec<Var>,
    },
    /// `v = func(inputs, outputs)`, with resources either declared or
    /// unknown.
    Func {
        /// The constrained variable.
        var: Var,
        /// Input variables.
        inputs: Vec<Var>,
        /// Output variables.
        outputs: Vec<Var>,
        /// `(used, observed)` when declared; `None` posts an unknown
        /// resource set that later unifications fill in.
        resources: Option<(BTreeSet<Resource>, BTreeSet<Resource>)>,
    },
    /// `v = free_type_var(name)`: the variable is the rigid type variable
    /// `name` of the enclosing declaration.
    FreeTypeVar(Var, String),
    /// `v = w`.
    VarVar(Var, Var),
}

/// A constraint tree as posted by the driver.
#[derive(Debug, Clone)]
pub enum Constraint {
    /// A literal.
    Lit(Literal),
    /// All of.
    Conj(Vec<Constraint>),
    /// Exactly one of.
    Disj(Vec<Constraint>),
}

/// A CNF clause.
#[derive(Debug, Clone)]
enum Clause {
    Single(Literal),
    Disj(Vec<Literal>),
}

impl Clause {
    fn context(&self) -> &Context {
        match self {
            Clause::Single(lit) => &lit.context,
            Clause::Disj(lits) => &lits[0].context,
        }
    }
}

/// `v = v` collapses to true; `v = w` puts the lower-ordered variable on
/// the left.
fn simplify_literal(mut lit: Literal) -> Literal {
    if let LiteralKind::VarVar(a, b) = lit.kind {
        if a == b {
            lit.kind = LiteralKind::True;
        } else if a > b {
            lit.kind = LiteralKind::VarVar(b, a);
        }
    }
    lit
}

fn is_true(lit: &Literal) -> bool {
    matches!(lit.kind, LiteralKind::True)
}

/// Flatten a constraint tree into clauses: conjunctions concatenate,
/// disjunctions distribute over each other's clause lists (Cartesian
/// product).
fn to_cnf(constraint: Constraint, out: &mut Vec<Clause>) {
    match constraint {
        Constraint::Lit(lit) => {
            let lit = simplify_literal(lit);
            if !is_true(&lit) {
                out.push(Clause::Single(lit));
            }
        }

        Constraint::Conj(children) => {
            for child in children {
                to_cnf(child, out);
            }
        }

        Constraint::Disj(children) => {
            let lists: Vec<Vec<Clause>> = children
                .into_iter()
                .map(|child| {
                    let mut clauses = Vec::new();
                    to_cnf(child, &mut clauses);
                    clauses
                })
                .collect();

            // An alternative that simplified away entirely is true, and a
            // true alternative makes the whole disjunction true.
            if lists.iter().any(Vec::is_empty) {
                return;
            }

            let mut acc: Vec<Vec<Literal>> = vec![Vec::new()];
            for list in lists {
                let mut next = Vec::new();
                for prefix in &acc {
                    for clause in &list {
                        let mut merged = prefix.clone();
                        match clause {
                            Clause::Single(lit) => merged.push(lit.clone()),
                            Clause::Disj(lits) => merged.extend(lits.iter().cloned()),
                        }
                        next.push(merged);
                    }
                }
                acc = next;
            }

            for mut lits in acc {
                if lits.len() == 1 {
                    out.push(Clause::Single(lits.remove(0)));
                } else {
                    out.push(Clause::Disj(lits));
                }
            }
        }
    }
}

enum LitOutcome {
    Success { updated: bool },
    Delayed { updated: bool },
}

enum ClauseOutcome {
    Success { updated: bool },
    Delayed { updated: bool },
}

fn write_if_changed(store: &mut [Domain], var: Var, domain: Domain) -> bool {
    if store[var.0 as usize] != domain {
        store[var.0 as usize] = domain;
        true
    } else {
        false
    }
}

/// A literal only counts as decided once its unification neither delayed
/// nor left holes: a structural literal over still-free arguments stays in
/// the queue so later narrowings keep flowing through it.
fn outcome(status: UnifyStatus, domain: &Domain, updated: bool) -> LitOutcome {
    if status == UnifyStatus::Delayed || !domain.is_ground() {
        LitOutcome::Delayed { updated }
    } else {
        LitOutcome::Success { updated }
    }
}

/// Execute one literal against the store.
fn run_literal(lit: &Literal, store: &mut [Domain]) -> Result<LitOutcome, String> {
    match &lit.kind {
        LiteralKind::True => Ok(LitOutcome::Success { updated: false }),

        LiteralKind::Builtin(var, builtin) => {
            let (domain, status) =
                unify_domains(&store[var.0 as usize], &Domain::Builtin(*builtin))?;
            let updated = write_if_changed(store, *var, domain);
            Ok(outcome(status, &store[var.0 as usize], updated))
        }

        LiteralKind::FreeTypeVar(var, name) => {
            let (domain, status) =
                unify_domains(&store[var.0 as usize], &Domain::UnivVar(name.clone()))?;
            let updated = write_if_changed(store, *var, domain);
            Ok(outcome(status, &store[var.0 as usize], updated))
        }

        LiteralKind::VarVar(a, b) => {
            let (domain, status) =
                unify_domains(&store[a.0 as usize], &store[b.0 as usize])?;
            let mut updated = write_if_changed(store, *a, domain.clone());
            updated |= write_if_changed(store, *b, domain);
            Ok(outcome(status, &store[a.0 as usize], updated))
        }

        LiteralKind::UserType { var, type_id, args } => {
            let candidate = Domain::Type(
                *type_id,
                args.iter().map(|a| store[a.0 as usize].clone()).collect(),
            );
            let (domain, status) = unify_domains(&store[var.0 as usize], &candidate)?;

            let mut updated = write_if_changed(store, *var, domain.clone());
            if let Domain::Type(_, arg_domains) = domain {
                for (arg_var, arg_domain) in args.iter().zip_eq(arg_domains) {
                    updated |= write_if_changed(store, *arg_var, arg_domain);
                }
            }
            Ok(outcome(status, &store[var.0 as usize], updated))
        }

        LiteralKind::Func {
            var,
            inputs,
            outputs,
            resources,
        } => {
            let candidate = Domain::Func {
                inputs: inputs.iter().map(|v| store[v.0 as usize].clone()).collect(),
                outputs: outputs
                    .iter()
                    .map(|v| store[v.0 as usize].clone())
                    .collect(),
                resources: match resources {
                    Some((used, observed)) => Resources::Known {
                        used: used.clone(),
                        observed: observed.clone(),
                    },
                    None => Resources::Unknown,
                },
            };
            let (domain, status) = unify_domains(&store[var.0 as usize], &candidate)?;

            let mut updated = write_if_changed(store, *var, domain.clone());
            if let Domain::Func {
                inputs: in_domains,
                outputs: out_domains,
                ..
            } = domain
            {
                for (v, d) in inputs.iter().zip_eq(in_domains) {
                    updated |= write_if_changed(store, *v, d);
                }
                for (v, d) in outputs.iter().zip_eq(out_domains) {
                    updated |= write_if_changed(store, *v, d);
                }
            }
            Ok(outcome(status, &store[var.0 as usize], updated))
        }
    }
}

/// Execute one clause. Disjunctions probe every alternative against a
/// scratch copy of the store; only a sole survivor's writes are committed.
fn run_clause(clause: &Clause, store: &mut Vec<Domain>) -> Result<ClauseOutcome, TypeError> {
    match clause {
        Clause::Single(lit) => match run_literal(lit, store) {
            Ok(LitOutcome::Success { updated }) => Ok(ClauseOutcome::Success { updated }),
            Ok(LitOutcome::Delayed { updated }) => Ok(ClauseOutcome::Delayed { updated }),
            Err(detail) => Err(TypeError::Mismatch {
                context: lit.context.clone(),
                detail,
            }),
        },

        Clause::Disj(lits) => {
            enum Probe {
                Fail(String),
                Quiet,
                Writes,
                Delay,
            }

            let probes: Vec<Probe> = lits
                .iter()
                .map(|lit| {
                    let mut scratch = store.clone();
                    match run_literal(lit, &mut scratch) {
                        Ok(LitOutcome::Success { updated: false }) => Probe::Quiet,
                        Ok(LitOutcome::Success { updated: true })
                        | Ok(LitOutcome::Delayed { updated: true }) => Probe::Writes,
                        Ok(LitOutcome::Delayed { updated: false }) => Probe::Delay,
                        Err(detail) => Probe::Fail(detail),
                    }
                })
                .collect();

            let alive = probes
                .iter()
                .filter(|p| !matches!(p, Probe::Fail(_)))
                .count();
            let quiet = probes.iter().filter(|p| matches!(p, Probe::Quiet)).count();

            if alive == 0 {
                let reasons = probes
                    .iter()
                    .filter_map(|p| match p {
                        Probe::Fail(detail) => Some(detail.as_str()),
                        _ => None,
                    })
                    .join("; ");
                return Err(TypeError::Mismatch {
                    context: clause.context().clone(),
                    detail: format!("no alternative applies: {reasons}"),
                });
            }

            if alive == 1 {
                let (index, probe) = probes
                    .iter()
                    .enumerate()
                    .find(|(_, p)| !matches!(p, Probe::Fail(_)))
                    .expect("one alternative is alive");

                return match probe {
                    Probe::Quiet => Ok(ClauseOutcome::Success { updated: false }),
                    Probe::Writes => {
                        // Sole survivor: its writes are finally applied. A
                        // still-delayed literal keeps the clause queued so
                        // later narrowings flow through its writes too.
                        match run_literal(&lits[index], store) {
                            Ok(LitOutcome::Success { updated }) => {
                                Ok(ClauseOutcome::Success { updated })
                            }
                            Ok(LitOutcome::Delayed { updated }) => {
                                Ok(ClauseOutcome::Delayed { updated })
                            }
                            Err(detail) => Err(TypeError::Mismatch {
                                context: lits[index].context.clone(),
                                detail,
                            }),
                        }
                    }
                    Probe::Delay => Ok(ClauseOutcome::Delayed { updated: false }),
                    Probe::Fail(_) => unreachable!("filtered above"),
                };
            }

            // Several alternatives hold outright: nothing left to tell
            // them apart.
            if quiet >= 2 {
                return Err(TypeError::Ambiguous {
                    context: clause.context().clone(),
                });
            }

            // More than one alternative could still apply; committing any
            // write now might have to be undone later.
            Ok(ClauseOutcome::Delayed { updated: false })
        }
    }
}

/// A constraint problem under construction.
#[derive(Debug, Default)]
pub struct Problem {
    kinds: Vec<VarKind>,
    named: HashMap<String, Var>,
    constraints: Vec<Constraint>,
}

impl Problem {
    /// An empty problem.
    pub fn new() -> Self {
        Problem::default()
    }

    fn fresh(&mut self, kind: VarKind) -> Var {
        let var = Var(self.kinds.len() as u32);
        self.kinds.push(kind);
        var
    }

    /// The variable for a program variable, interned by name.
    pub fn named_var(&mut self, name: &str) -> Var {
        if let Some(&var) = self.named.get(name) {
            return var;
        }
        let var = self.fresh(VarKind::Named(name.to_string()));
        self.named.insert(name.to_string(), var);
        var
    }

    /// A fresh anonymous variable.
    pub fn anon_var(&mut self) -> Var {
        self.fresh(VarKind::Anon)
    }

    /// A fresh solver variable for a source type variable.
    pub fn type_var(&mut self) -> Var {
        self.fresh(VarKind::TypeVar)
    }

    /// Post a constraint.
    pub fn post(&mut self, constraint: Constraint) {
        self.constraints.push(constraint);
    }

    /// Run the clauses to a solution or an error.
    pub fn solve(self) -> Result<Solution, TypeError> {
        let Problem {
            kinds,
            named,
            constraints,
        } = self;

        let mut queue = Vec::new();
        for constraint in constraints {
            to_cnf(constraint, &mut queue);
        }

        let mut store = vec![Domain::Free; kinds.len()];

        loop {
            if queue.is_empty() {
                break;
            }

            let before = queue.len();
            let mut delays = Vec::new();
            let mut updated_any = false;

            for clause in queue.drain(..) {
                match run_clause(&clause, &mut store)? {
                    ClauseOutcome::Success { updated } => updated_any |= updated,
                    ClauseOutcome::Delayed { updated } => {
                        updated_any |= updated;
                        delays.push(clause);
                    }
                }
            }

            tracing::trace!(
                before,
                outstanding = delays.len(),
                updated_any,
                "solver round"
            );

            let progress = delays.len() < before || updated_any;
            if !progress {
                let non_ground: Vec<String> = kinds
                    .iter()
                    .zip(&store)
                    .filter_map(|(kind, domain)| match kind {
                        VarKind::Named(name) if !domain.is_ground() => Some(name.clone()),
                        _ => None,
                    })
                    .collect();

                if non_ground.is_empty() {
                    // Whatever is still queued constrains only anonymous
                    // or type variables; the solution is complete.
                    break;
                }
                return Err(TypeError::Floundered {
                    vars: non_ground,
                    outstanding: delays.len(),
                });
            }

            queue = delays;
        }

        Ok(Solution {
            kinds,
            named,
            store,
        })
    }
}

/// An accepted solution.
#[derive(Debug)]
pub struct Solution {
    kinds: Vec<VarKind>,
    named: HashMap<String, Var>,
    store: Vec<Domain>,
}

impl Solution {
    /// The substitution over named variables. Every named variable is
    /// ground by acceptance; anonymous and type variables are dropped.
    pub fn substitution(&self) -> HashMap<String, Type> {
        self.named
            .iter()
            .map(|(name, var)| (name.clone(), domain_to_type(&self.store[var.0 as usize])))
            .collect()
    }

    /// The solved type of a named variable.
    pub fn type_of(&self, name: &str) -> Option<Type> {
        let var = self.named.get(name)?;
        self.var_type(*var)
    }

    /// The solved type of any variable, if it became ground.
    pub fn var_type(&self, var: Var) -> Option<Type> {
        let domain = &self.store[var.0 as usize];
        domain.is_ground().then(|| domain_to_type(domain))
    }
}

/// Convert a solved domain to a source type. A `free` leaking through
/// acceptance is a solver bug.
fn domain_to_type(domain: &Domain) -> Type {
    match domain {
        Domain::Free => unreachable!("free domain survived solving"),
        Domain::Builtin(b) => Type::Builtin(*b),
        Domain::UnivVar(name) => Type::Var(name.clone()),
        Domain::Type(id, args) => Type::Ref(*id, args.iter().map(domain_to_type).collect()),
        Domain::Func {
            inputs,
            outputs,
            resources,
        } => {
            let (uses, observes) = match resources {
                Resources::Known { used, observed } => (used.clone(), observed.clone()),
                Resources::Unknown => (BTreeSet::new(), BTreeSet::new()),
            };
            Type::Func(FuncType {
                inputs: inputs.iter().map(domain_to_type).collect(),
                outputs: outputs.iter().map(domain_to_type).collect(),
                uses,
                observes,
            })
        }
    }
}
