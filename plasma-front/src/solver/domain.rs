//! Herbrand domains and their unification.

use crate::types::{BuiltinType, Resource, TypeId};

use itertools::Itertools;

use std::collections::BTreeSet;
use std::fmt;

/// The resource component of a function domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resources {
    /// Not yet known; unifies with anything.
    Unknown,
    /// Known used/observed sets.
    Known {
        /// Resources used.
        used: BTreeSet<Resource>,
        /// Resources observed.
        observed: BTreeSet<Resource>,
    },
}

/// How a unification left the store.
///
/// `NewDomain` dominates `Delayed`, which dominates `OldDomain`: a compound
/// unification reports the strongest status among its parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UnifyStatus {
    /// Nothing changed.
    OldDomain,
    /// The result is not final; revisit once more is known.
    Delayed,
    /// The domain was narrowed.
    NewDomain,
}

impl UnifyStatus {
    /// The stronger of two statuses.
    pub fn strongest(self, other: UnifyStatus) -> UnifyStatus {
        self.max(other)
    }
}

/// Unify two resource sets: `unknown` is the identity, and two known sets
/// union their used and observed resources.
pub fn unify_resources(a: &Resources, b: &Resources) -> (Resources, UnifyStatus) {
    match (a, b) {
        (Resources::Unknown, Resources::Unknown) => (Resources::Unknown, UnifyStatus::OldDomain),
        (Resources::Unknown, known) => (known.clone(), UnifyStatus::NewDomain),
        (known, Resources::Unknown) => (known.clone(), UnifyStatus::NewDomain),
        (
            Resources::Known { used: u1, observed: o1 },
            Resources::Known { used: u2, observed: o2 },
        ) => {
            let used: BTreeSet<_> = u1.union(u2).cloned().collect();
            let observed: BTreeSet<_> = o1.union(o2).cloned().collect();

            let status = if &used == u1 && &used == u2 && &observed == o1 && &observed == o2 {
                UnifyStatus::OldDomain
            } else {
                UnifyStatus::NewDomain
            };

            (Resources::Known { used, observed }, status)
        }
    }
}

/// A solver variable's domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Domain {
    /// Unconstrained.
    Free,
    /// A builtin type.
    Builtin(BuiltinType),
    /// A user type applied to argument domains.
    Type(TypeId, Vec<Domain>),
    /// A function shape.
    Func {
        /// Input domains.
        inputs: Vec<Domain>,
        /// Output domains.
        outputs: Vec<Domain>,
        /// Resource component.
        resources: Resources,
    },
    /// A universally-quantified type variable, rigid within its
    /// declaration.
    UnivVar(String),
}

impl Domain {
    /// Whether no `free` occurs anywhere in the domain.
    pub fn is_ground(&self) -> bool {
        match self {
            Domain::Free => false,
            Domain::Builtin(_) | Domain::UnivVar(_) => true,
            Domain::Type(_, args) => args.iter().all(Domain::is_ground),
            Domain::Func {
                inputs, outputs, ..
            } => inputs.iter().chain(outputs).all(Domain::is_ground),
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::Free => f.write_str("_"),
            Domain::Builtin(b) => write!(f, "{b}"),
            Domain::UnivVar(name) => write!(f, "{name}"),
            Domain::Type(id, args) if args.is_empty() => write!(f, "type#{}", id.0),
            Domain::Type(id, args) => {
                write!(f, "type#{}({})", id.0, args.iter().format(", "))
            }
            Domain::Func {
                inputs, outputs, ..
            } => write!(
                f,
                "func({}) -> ({})",
                inputs.iter().format(", "),
                outputs.iter().format(", ")
            ),
        }
    }
}

/// Unify two domains into the narrowest domain consistent with both, or
/// fail with a reason for the type error.
pub fn unify_domains(a: &Domain, b: &Domain) -> Result<(Domain, UnifyStatus), String> {
    match (a, b) {
        (Domain::Free, Domain::Free) => Ok((Domain::Free, UnifyStatus::Delayed)),
        (Domain::Free, other) => Ok((other.clone(), UnifyStatus::NewDomain)),
        (other, Domain::Free) => Ok((other.clone(), UnifyStatus::NewDomain)),

        (Domain::Builtin(x), Domain::Builtin(y)) => {
            if x == y {
                Ok((Domain::Builtin(*x), UnifyStatus::OldDomain))
            } else {
                Err(format!("{x} with {y}"))
            }
        }

        (Domain::UnivVar(x), Domain::UnivVar(y)) => {
            if x == y {
                Ok((Domain::UnivVar(x.clone()), UnifyStatus::OldDomain))
            } else {
                Err(format!("type variable {x} with type variable {y}"))
            }
        }

        (Domain::Type(id1, args1), Domain::Type(id2, args2)) => {
            if id1 != id2 || args1.len() != args2.len() {
                return Err(format!("{a} with {b}"));
            }

            let (args, status) = unify_all(args1, args2)?;
            Ok((Domain::Type(*id1, args), status))
        }

        (
            Domain::Func {
                inputs: in1,
                outputs: out1,
                resources: res1,
            },
            Domain::Func {
                inputs: in2,
                outputs: out2,
                resources: res2,
            },
        ) => {
            if in1.len() != in2.len() || out1.len() != out2.len() {
                return Err(format!("{a} with {b}"));
            }

            let (inputs, in_status) = unify_all(in1, in2)?;
            let (outputs, out_status) = unify_all(out1, out2)?;
            let (resources, res_status) = unify_resources(res1, res2);

            // Function domains always propagate with delay: a higher-order
            // call's resource signature may only become known late, and a
            // premature commitment here could not be undone.
            let status = in_status
                .strongest(out_status)
                .strongest(res_status)
                .strongest(UnifyStatus::Delayed);

            Ok((
                Domain::Func {
                    inputs,
                    outputs,
                    resources,
                },
                status,
            ))
        }

        _ => Err(format!("{a} with {b}")),
    }
}

/// Point-wise unification; the aggregate status is the strongest among the
/// arguments.
fn unify_all(
    xs: &[Domain],
    ys: &[Domain],
) -> Result<(Vec<Domain>, UnifyStatus), String> {
    let mut out = Vec::with_capacity(xs.len());
    let mut status = UnifyStatus::OldDomain;

    for (x, y) in xs.iter().zip_eq(ys) {
        let (domain, arg_status) = unify_domains(x, y)?;
        out.push(domain);
        status = status.strongest(arg_status);
    }

    Ok((out, status))
}

#[cfg(test)]
mod tests {
    use super::*;

    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    fn known(used: &[&str], observed: &[&str]) -> Resources {
        Resources::Known {
            used: used.iter().map(|s| s.to_string()).collect(),
            observed: observed.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn free_yields_to_anything() {
        let (d, status) = unify_domains(&Domain::Free, &Domain::Builtin(BuiltinType::Int)).unwrap();
        assert_eq!(d, Domain::Builtin(BuiltinType::Int));
        assert_eq!(status, UnifyStatus::NewDomain);

        let (d, status) = unify_domains(&Domain::Free, &Domain::Free).unwrap();
        assert_eq!(d, Domain::Free);
        assert_eq!(status, UnifyStatus::Delayed);
    }

    #[test]
    fn builtins_unify_only_with_themselves() {
        let int = Domain::Builtin(BuiltinType::Int);
        let string = Domain::Builtin(BuiltinType::String);

        assert_eq!(
            unify_domains(&int, &int).unwrap(),
            (int.clone(), UnifyStatus::OldDomain)
        );
        assert!(unify_domains(&int, &string).is_err());
    }

    #[test]
    fn type_arguments_unify_pointwise() {
        let list_free = Domain::Type(TypeId(0), vec![Domain::Free]);
        let list_int = Domain::Type(TypeId(0), vec![Domain::Builtin(BuiltinType::Int)]);

        let (d, status) = unify_domains(&list_free, &list_int).unwrap();
        assert_eq!(d, list_int);
        assert_eq!(status, UnifyStatus::NewDomain);

        let other = Domain::Type(TypeId(1), vec![Domain::Free]);
        assert!(unify_domains(&list_free, &other).is_err());
    }

    #[test]
    fn func_unification_is_always_delayed() {
        let f = Domain::Func {
            inputs: vec![Domain::Builtin(BuiltinType::Int)],
            outputs: vec![Domain::Builtin(BuiltinType::Int)],
            resources: Resources::Unknown,
        };

        let (_, status) = unify_domains(&f, &f).unwrap();
        assert_eq!(status, UnifyStatus::Delayed);
    }

    #[test]
    fn func_resources_union() {
        let f = |resources: Resources| Domain::Func {
            inputs: vec![],
            outputs: vec![],
            resources,
        };

        let (d, _) = unify_domains(&f(known(&["io"], &[])), &f(known(&["env"], &["clock"])))
            .unwrap();
        match d {
            Domain::Func { resources, .. } => {
                assert_eq!(resources, known(&["io", "env"], &["clock"]))
            }
            _ => panic!("expected a function domain"),
        }
    }

    #[test]
    fn unknown_resources_are_identity() {
        let r = known(&["io"], &[]);

        let (left, status) = unify_resources(&Resources::Unknown, &r);
        assert_eq!(left, r);
        assert_eq!(status, UnifyStatus::NewDomain);

        let (right, _) = unify_resources(&r, &Resources::Unknown);
        assert_eq!(right, r);
    }

    // Bounded generator: two type ids, two resource names, depth-limited
    // recursion.
    impl Arbitrary for Domain {
        fn arbitrary(g: &mut Gen) -> Domain {
            arbitrary_domain(g, 2)
        }
    }

    fn arbitrary_resources(g: &mut Gen) -> Resources {
        if bool::arbitrary(g) {
            Resources::Unknown
        } else {
            let pick = |g: &mut Gen| -> BTreeSet<String> {
                ["io", "env"]
                    .iter()
                    .filter(|_| bool::arbitrary(g))
                    .map(|s| s.to_string())
                    .collect()
            };
            Resources::Known {
                used: pick(g),
                observed: pick(g),
            }
        }
    }

    fn arbitrary_domain(g: &mut Gen, depth: usize) -> Domain {
        let max: usize = if depth == 0 { 3 } else { 5 };
        match usize::arbitrary(g) % max {
            0 => Domain::Free,
            1 => Domain::Builtin(
                *g.choose(&[
                    BuiltinType::Int,
                    BuiltinType::String,
                    BuiltinType::Codepoint,
                    BuiltinType::StringPos,
                ])
                .unwrap(),
            ),
            2 => Domain::UnivVar(g.choose(&["a", "b"]).unwrap().to_string()),
            3 => {
                let arity = usize::arbitrary(g) % 2 + 1;
                Domain::Type(
                    TypeId(u32::arbitrary(g) % 2),
                    (0..arity).map(|_| arbitrary_domain(g, depth - 1)).collect(),
                )
            }
            _ => Domain::Func {
                inputs: (0..usize::arbitrary(g) % 2)
                    .map(|_| arbitrary_domain(g, depth - 1))
                    .collect(),
                outputs: vec![arbitrary_domain(g, depth - 1)],
                resources: arbitrary_resources(g),
            },
        }
    }

    #[quickcheck]
    fn unification_is_symmetric(a: Domain, b: Domain) -> bool {
        match (unify_domains(&a, &b), unify_domains(&b, &a)) {
            (Ok((d1, s1)), Ok((d2, s2))) => d1 == d2 && s1 == s2,
            (Err(_), Err(_)) => true,
            _ => false,
        }
    }

    #[quickcheck]
    fn unification_with_self_succeeds(a: Domain) -> bool {
        match unify_domains(&a, &a) {
            Ok((d, _)) => d == a,
            Err(_) => false,
        }
    }

    #[quickcheck]
    fn resource_union_is_commutative(a: Domain, b: Domain) -> bool {
        // Restricted to the resource component.
        let (ra, rb) = match (&a, &b) {
            (
                Domain::Func { resources: ra, .. },
                Domain::Func { resources: rb, .. },
            ) => (ra.clone(), rb.clone()),
            _ => return true,
        };

        unify_resources(&ra, &rb).0 == unify_resources(&rb, &ra).0
    }
}
