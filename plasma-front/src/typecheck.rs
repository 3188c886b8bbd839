//! The type-check driver.
//!
//! Walks a function's ANF-normalised body posting constraints for every
//! expression, runs the solver, and returns the substitution over program
//! variables together with the solved output types.
//!
//! Source type variables go through a scoped mapping: `T` in one signature
//! and `T` in another are different solver variables, and every call site
//! instantiates its callee's signature in a fresh scope. Within the body of
//! the function being checked its own type parameters are rigid.

use crate::error::TypeError;
use crate::expr::{CtorId, Expr, ExprKind, FuncId, ModuleEnv, Pattern, Signature};
use crate::solver::{Constraint, Literal, LiteralKind, Problem, Solution, Var};
use crate::types::{BuiltinType, Context, FuncType, Type};

use std::collections::HashMap;

/// Scoped interning of source type-variable names.
///
/// `start_mapping` opens a scope; `get_or_make` interns names into it;
/// `end_mapping` restores whatever the outer scope saw.
#[derive(Debug, Default)]
struct TypeVarMap {
    map: HashMap<String, Var>,
    scopes: Vec<Vec<(String, Option<Var>)>>,
}

impl TypeVarMap {
    fn start_mapping(&mut self) {
        self.scopes.push(Vec::new());
    }

    fn get_or_make(&mut self, problem: &mut Problem, name: &str) -> Var {
        if let Some(&var) = self.map.get(name) {
            return var;
        }

        let var = problem.type_var();
        let shadowed = self.map.insert(name.to_string(), var);
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name.to_string(), shadowed));
        }
        var
    }

    fn end_mapping(&mut self) {
        let scope = self.scopes.pop().expect("unbalanced type-var scopes");
        for (name, shadowed) in scope.into_iter().rev() {
            match shadowed {
                Some(var) => {
                    self.map.insert(name, var);
                }
                None => {
                    self.map.remove(&name);
                }
            }
        }
    }
}

/// Whether a signature's type variables stand for themselves or for
/// instantiable unknowns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rigidity {
    /// The declaration being checked: its type variables are universal.
    Rigid,
    /// A callee's signature: fresh variables per instantiation.
    Flexible,
}

/// Result of checking one function.
#[derive(Debug)]
pub struct Checked {
    /// Solved types of the program variables.
    pub substitution: HashMap<String, Type>,
    /// Solved output types, in declaration order.
    pub outputs: Vec<Type>,
    /// The full solution, for annotating the caller's IR.
    pub solution: Solution,
}

fn output_name(index: usize) -> String {
    format!("out#{index}")
}

/// Type-check one function body against its declared signature.
pub fn check_function(
    env: &ModuleEnv,
    func: FuncId,
    params: &[String],
    body: &Expr,
) -> Result<Checked, Vec<TypeError>> {
    let sig = env.func(func).clone();
    assert_eq!(
        params.len(),
        sig.inputs.len(),
        "parameter list does not match the signature"
    );

    let mut ck = Checker {
        env,
        problem: Problem::new(),
        tvars: TypeVarMap::default(),
    };

    ck.tvars.start_mapping();
    for (name, ty) in params.iter().zip(&sig.inputs) {
        let var = ck.problem.named_var(name);
        let constraint = ck.constrain_var_type(var, ty, Rigidity::Rigid, &body.context);
        ck.problem.post(constraint);
    }

    let mut out_vars = Vec::with_capacity(sig.outputs.len());
    for (index, ty) in sig.outputs.iter().enumerate() {
        let var = ck.problem.named_var(&output_name(index));
        let constraint = ck.constrain_var_type(var, ty, Rigidity::Rigid, &body.context);
        ck.problem.post(constraint);
        out_vars.push(var);
    }

    let results = ck.check_expr(body);
    assert_eq!(
        results.len(),
        out_vars.len(),
        "body results do not match the declared outputs"
    );
    for (result, out) in results.iter().zip(&out_vars) {
        ck.problem
            .post(mk(LiteralKind::VarVar(*result, *out), &body.context));
    }
    ck.tvars.end_mapping();

    let solution = ck.problem.solve().map_err(|e| vec![e])?;

    let outputs = (0..sig.outputs.len())
        .map(|index| {
            solution
                .type_of(&output_name(index))
                .expect("outputs are named and therefore ground")
        })
        .collect();
    let mut substitution = solution.substitution();
    substitution.retain(|name, _| !name.starts_with("out#"));

    Ok(Checked {
        substitution,
        outputs,
        solution,
    })
}

fn mk(kind: LiteralKind, context: &Context) -> Constraint {
    Constraint::Lit(Literal {
        kind,
        context: context.clone(),
    })
}

struct Checker<'e> {
    env: &'e ModuleEnv,
    problem: Problem,
    tvars: TypeVarMap,
}

impl Checker<'_> {
    /// Constrain `var` to a declared type, descending user types and
    /// function types.
    fn constrain_var_type(
        &mut self,
        var: Var,
        ty: &Type,
        rigidity: Rigidity,
        context: &Context,
    ) -> Constraint {
        match ty {
            Type::Builtin(b) => mk(LiteralKind::Builtin(var, *b), context),

            Type::Var(name) => match rigidity {
                Rigidity::Rigid => mk(LiteralKind::FreeTypeVar(var, name.clone()), context),
                Rigidity::Flexible => {
                    let tv = self.tvars.get_or_make(&mut self.problem, name);
                    mk(LiteralKind::VarVar(var, tv), context)
                }
            },

            Type::Ref(id, args) => {
                let mut parts = Vec::with_capacity(args.len() + 1);
                let arg_vars = args
                    .iter()
                    .map(|arg| {
                        let av = self.problem.anon_var();
                        parts.push(self.constrain_var_type(av, arg, rigidity, context));
                        av
                    })
                    .collect();
                parts.push(mk(
                    LiteralKind::UserType {
                        var,
                        type_id: *id,
                        args: arg_vars,
                    },
                    context,
                ));
                Constraint::Conj(parts)
            }

            Type::Func(func) => {
                let mut parts = Vec::new();
                let mut bind = |ck: &mut Self, parts: &mut Vec<Constraint>, tys: &[Type]| {
                    tys.iter()
                        .map(|ty| {
                            let v = ck.problem.anon_var();
                            parts.push(ck.constrain_var_type(v, ty, rigidity, context));
                            v
                        })
                        .collect::<Vec<_>>()
                };
                let inputs = bind(self, &mut parts, &func.inputs);
                let outputs = bind(self, &mut parts, &func.outputs);

                parts.push(mk(
                    LiteralKind::Func {
                        var,
                        inputs,
                        outputs,
                        resources: Some((func.uses.clone(), func.observes.clone())),
                    },
                    context,
                ));
                Constraint::Conj(parts)
            }
        }
    }

    /// Post constraints for one expression; returns its result variables.
    fn check_expr(&mut self, expr: &Expr) -> Vec<Var> {
        let context = &expr.context;

        match &expr.kind {
            ExprKind::Var(name) => vec![self.problem.named_var(name)],

            ExprKind::Num(_) => {
                let r = self.problem.anon_var();
                let c = mk(LiteralKind::Builtin(r, BuiltinType::Int), context);
                self.problem.post(c);
                vec![r]
            }

            ExprKind::Str(s) => {
                let r = self.problem.anon_var();
                // A one-codepoint literal could be either a string or a
                // codepoint; the context decides.
                let c = if s.chars().count() == 1 {
                    Constraint::Disj(vec![
                        mk(LiteralKind::Builtin(r, BuiltinType::String), context),
                        mk(LiteralKind::Builtin(r, BuiltinType::Codepoint), context),
                    ])
                } else {
                    mk(LiteralKind::Builtin(r, BuiltinType::String), context)
                };
                self.problem.post(c);
                vec![r]
            }

            ExprKind::FuncRef(func) => {
                let r = self.problem.anon_var();
                let sig = self.env.func(*func).clone();

                self.tvars.start_mapping();
                let c = self.constrain_var_type(
                    r,
                    &Type::Func(signature_type(&sig)),
                    Rigidity::Flexible,
                    context,
                );
                self.tvars.end_mapping();

                self.problem.post(c);
                vec![r]
            }

            ExprKind::Tuple(exprs) => exprs
                .iter()
                .flat_map(|e| self.check_expr(e))
                .collect(),

            ExprKind::Let { var, value, body } => {
                let values = self.check_expr(value);
                assert_eq!(values.len(), 1, "a let binds exactly one result");

                let bound = self.problem.named_var(var);
                let c = mk(LiteralKind::VarVar(bound, values[0]), &value.context);
                self.problem.post(c);

                self.check_expr(body)
            }

            ExprKind::Call { func, args } => {
                let sig = self.env.func(*func).clone();
                assert_eq!(args.len(), sig.inputs.len(), "call arity mismatch");

                self.tvars.start_mapping();
                for (arg, ty) in args.iter().zip(&sig.inputs) {
                    let av = self.problem.named_var(arg);
                    let c = self.constrain_var_type(av, ty, Rigidity::Flexible, context);
                    self.problem.post(c);
                }

                let results = sig
                    .outputs
                    .iter()
                    .map(|ty| {
                        let r = self.problem.anon_var();
                        let c = self.constrain_var_type(r, ty, Rigidity::Flexible, context);
                        self.problem.post(c);
                        r
                    })
                    .collect();
                self.tvars.end_mapping();

                results
            }

            ExprKind::HoCall {
                callee,
                args,
                num_results,
            } => {
                let cv = self.problem.named_var(callee);
                let inputs = args.iter().map(|a| self.problem.named_var(a)).collect();
                let outputs: Vec<Var> =
                    (0..*num_results).map(|_| self.problem.anon_var()).collect();

                let c = mk(
                    LiteralKind::Func {
                        var: cv,
                        inputs,
                        outputs: outputs.clone(),
                        resources: None,
                    },
                    context,
                );
                self.problem.post(c);

                outputs
            }

            ExprKind::Match { var, cases } => {
                let scrutinee = self.problem.named_var(var);
                assert!(!cases.is_empty(), "match with no cases");

                let mut case_results = Vec::with_capacity(cases.len());
                for case in cases {
                    let c = self.pattern_constraint(scrutinee, &case.pattern, context);
                    self.problem.post(c);
                    case_results.push(self.check_expr(&case.body));
                }

                let arity = case_results[0].len();
                let results: Vec<Var> =
                    (0..arity).map(|_| self.problem.anon_var()).collect();
                for rs in &case_results {
                    assert_eq!(rs.len(), arity, "case result arity mismatch");
                    for (case_r, r) in rs.iter().zip(&results) {
                        let c = mk(LiteralKind::VarVar(*case_r, *r), context);
                        self.problem.post(c);
                    }
                }

                results
            }

            ExprKind::Construction { ctors, args } => {
                let r = self.problem.anon_var();
                let field_vars: Vec<Var> =
                    args.iter().map(|a| self.problem.named_var(a)).collect();

                let c = self.ctor_disjunction(r, ctors, &field_vars, context);
                self.problem.post(c);
                vec![r]
            }

            ExprKind::Closure { func, captured } => {
                let r = self.problem.anon_var();
                let sig = self.env.func(*func).clone();
                assert_eq!(
                    captured.len(),
                    sig.captures.len(),
                    "captured variables do not match the signature"
                );

                self.tvars.start_mapping();
                let c = self.constrain_var_type(
                    r,
                    &Type::Func(signature_type(&sig)),
                    Rigidity::Flexible,
                    context,
                );
                self.problem.post(c);

                for (name, ty) in captured.iter().zip(&sig.captures) {
                    let cv = self.problem.named_var(name);
                    let c = self.constrain_var_type(cv, ty, Rigidity::Flexible, context);
                    self.problem.post(c);
                }
                self.tvars.end_mapping();

                vec![r]
            }
        }
    }

    /// A disjunction over the candidate constructors of a pattern or
    /// construction.
    fn ctor_disjunction(
        &mut self,
        value: Var,
        ctors: &[CtorId],
        field_vars: &[Var],
        context: &Context,
    ) -> Constraint {
        assert!(!ctors.is_empty(), "no candidate constructors");

        let mut alternatives: Vec<Constraint> = ctors
            .iter()
            .map(|c| self.ctor_alternative(value, *c, field_vars, context))
            .collect();

        if alternatives.len() == 1 {
            alternatives.remove(0)
        } else {
            Constraint::Disj(alternatives)
        }
    }

    /// One candidate: the value is the constructor's owning type, and each
    /// field variable matches the field's declared type with the owning
    /// type's parameters substituted.
    fn ctor_alternative(
        &mut self,
        value: Var,
        ctor_id: CtorId,
        field_vars: &[Var],
        context: &Context,
    ) -> Constraint {
        let ctor = self.env.ctor(ctor_id).clone();
        assert_eq!(
            field_vars.len(),
            ctor.fields.len(),
            "constructor field arity mismatch"
        );

        let param_vars: HashMap<String, Var> = ctor
            .type_params
            .iter()
            .map(|p| (p.clone(), self.problem.type_var()))
            .collect();

        let mut parts = vec![mk(
            LiteralKind::UserType {
                var: value,
                type_id: ctor.type_id,
                args: ctor.type_params.iter().map(|p| param_vars[p]).collect(),
            },
            context,
        )];

        for (fv, fty) in field_vars.iter().zip(&ctor.fields) {
            parts.push(self.ctor_field_constraint(*fv, fty, &param_vars, context));
        }

        Constraint::Conj(parts)
    }

    /// Constrain a field against its declared type with single-level
    /// type-variable substitution. Variables nested inside function types
    /// are beyond that level and fall back to fresh flexible variables.
    fn ctor_field_constraint(
        &mut self,
        var: Var,
        ty: &Type,
        params: &HashMap<String, Var>,
        context: &Context,
    ) -> Constraint {
        match ty {
            Type::Var(name) => match params.get(name) {
                Some(&pv) => mk(LiteralKind::VarVar(var, pv), context),
                None => {
                    let tv = self.tvars.get_or_make(&mut self.problem, name);
                    mk(LiteralKind::VarVar(var, tv), context)
                }
            },

            Type::Builtin(b) => mk(LiteralKind::Builtin(var, *b), context),

            Type::Ref(id, args) => {
                let mut parts = Vec::with_capacity(args.len() + 1);
                let arg_vars = args
                    .iter()
                    .map(|arg| {
                        let av = self.problem.anon_var();
                        parts.push(self.ctor_field_constraint(av, arg, params, context));
                        av
                    })
                    .collect();
                parts.push(mk(
                    LiteralKind::UserType {
                        var,
                        type_id: *id,
                        args: arg_vars,
                    },
                    context,
                ));
                Constraint::Conj(parts)
            }

            Type::Func(_) => self.constrain_var_type(var, ty, Rigidity::Flexible, context),
        }
    }
}

/// A signature as a function type.
fn signature_type(sig: &Signature) -> FuncType {
    FuncType {
        inputs: sig.inputs.clone(),
        outputs: sig.outputs.clone(),
        uses: sig.uses.clone(),
        observes: sig.observes.clone(),
    }
}
