//! The implication kernel: `implies` as a bootstrapped generic function.
//!
//! `implies(s1, s2)` answers whether every argument matched by `s1` is also
//! matched by `s2` — s1 is at least as specific. The kernel is itself a
//! generic function dispatched by this crate's own engine, so new signature
//! forms are added by registering rules on it, not by changing the engine.
//!
//! The self-reference is broken in two steps: the base rules below are
//! installed at pairwise-distinct signatures (so no combine, and therefore no
//! implication query, runs while they land), and once they are in place the
//! kernel's registry is snapshotted as its engine's static cache seed. Every
//! later cache regeneration starts from that seed, so the tuple, class, and
//! boolean lookups the engine itself needs always hit without a fold.

use once_cell::sync::Lazy;
use tracing::warn;

use crate::class::{ClassId, Object, is_subclass};
use crate::function::{GenericFn, rules_for, when};
use crate::sig;
use crate::signature::TupleSig;
use crate::value::Value;

static IMPLIES: Lazy<GenericFn> = Lazy::new(build_kernel);

fn build_kernel() -> GenericFn {
    // The original body is the identity rule: equal signatures imply each
    // other. It is seeded as the default rule like any other function's.
    let gf = GenericFn::new("implies", 2, |args: &[Value]| {
        Ok(Value::new(args[0] == args[1]))
    });

    // Tuple vs tuple: a longer tuple cannot be implied; otherwise pointwise,
    // with extra elements of s1 unconstrained. The empty tuple is implied by
    // everything.
    when(&gf, sig![TupleSig, TupleSig], |args: &[Value]| {
        let s1 = args[0].expect_ref::<TupleSig>()?;
        let s2 = args[1].expect_ref::<TupleSig>()?;
        if s2.len() > s1.len() {
            return Ok(Value::new(false));
        }
        for (c1, c2) in s1.classes().iter().zip(s2.classes().iter()) {
            if !implies(&Value::new(*c1), &Value::new(*c2)) {
                return Ok(Value::new(false));
            }
        }
        Ok(Value::new(true))
    })
    .expect("kernel base rules land at distinct signatures");

    // Class vs class: the declared subclass relation.
    when(&gf, sig![ClassId, ClassId], |args: &[Value]| {
        let c1 = *args[0].expect_ref::<ClassId>()?;
        let c2 = *args[1].expect_ref::<ClassId>()?;
        Ok(Value::new(is_subclass(c1, c2)))
    })
    .expect("kernel base rules land at distinct signatures");

    // Booleans as trivial predicates.
    when(&gf, sig![bool, bool], |args: &[Value]| {
        let c1 = *args[0].expect_ref::<bool>()?;
        let c2 = *args[1].expect_ref::<bool>()?;
        Ok(Value::new(c2 || !c1))
    })
    .expect("kernel base rules land at distinct signatures");
    when(&gf, sig![bool, Object], |args: &[Value]| {
        Ok(Value::new(!*args[0].expect_ref::<bool>()?))
    })
    .expect("kernel base rules land at distinct signatures");
    when(&gf, sig![Object, bool], |args: &[Value]| {
        Ok(Value::new(*args[1].expect_ref::<bool>()?))
    })
    .expect("kernel base rules land at distinct signatures");

    // Freeze the registry as the static dispatch seed.
    rules_for(&gf).engine.snapshot_static();
    gf
}

/// Is `s2` always true when `s1` is true (s1 at least as specific as s2)?
///
/// Kernel dispatch failures are reported and treated as "no implication";
/// the identity default rule makes them unreachable for well-formed
/// signature values.
pub fn implies(s1: &Value, s2: &Value) -> bool {
    match IMPLIES.call(&[s1.clone(), s2.clone()]) {
        Ok(v) => match v.downcast_ref::<bool>() {
            Some(b) => *b,
            None => {
                warn!(result = ?v, "implication rule returned a non-boolean");
                false
            }
        },
        Err(err) => {
            warn!(%err, "implication dispatch failed");
            false
        }
    }
}

/// The `implies` generic function, for registering new signature forms.
pub fn implies_fn() -> &'static GenericFn {
    &IMPLIES
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{class_of, derives, object};

    struct Animal;
    struct Mammal;
    struct Dog;

    fn hierarchy() {
        derives::<Dog, Mammal>();
        derives::<Mammal, Animal>();
    }

    #[test]
    fn implication_is_reflexive() {
        let s = sig![i64, String];
        assert!(implies(&s, &s));
        assert!(implies(&sig![], &sig![]));
    }

    #[test]
    fn empty_signature_is_implied_by_everything() {
        assert!(implies(&sig![i64], &sig![]));
        assert!(implies(&sig![i64, String, bool], &sig![]));
        assert!(!implies(&sig![], &sig![i64]));
    }

    #[test]
    fn longer_tuples_are_not_implied() {
        assert!(!implies(&sig![i64], &sig![i64, i64]));
        // Extra elements of the more specific side are unconstrained.
        assert!(implies(&sig![i64, String], &sig![i64]));
    }

    #[test]
    fn pointwise_subclassing() {
        hierarchy();
        assert!(implies(&sig![Dog], &sig![Animal]));
        assert!(implies(&sig![Dog, i64], &sig![Mammal, i64]));
        assert!(!implies(&sig![Animal], &sig![Dog]));
        assert!(!implies(&sig![Dog, i64], &sig![Mammal, String]));
    }

    #[test]
    fn tuple_implication_is_transitive() {
        hierarchy();
        let s1 = sig![Dog];
        let s2 = sig![Mammal];
        let s3 = sig![Animal];
        assert!(implies(&s1, &s2));
        assert!(implies(&s2, &s3));
        assert!(implies(&s1, &s3));
    }

    #[test]
    fn class_values_compare_by_subclass() {
        hierarchy();
        let dog = Value::new(class_of::<Dog>());
        let animal = Value::new(class_of::<Animal>());
        let root = Value::new(object());
        assert!(implies(&dog, &animal));
        assert!(!implies(&animal, &dog));
        assert!(implies(&dog, &root));
    }

    #[test]
    fn boolean_trivial_predicates() {
        let t = Value::new(true);
        let f = Value::new(false);
        let x = sig![i64];
        assert!(implies(&t, &t));
        assert!(implies(&f, &t));
        assert!(implies(&f, &f));
        assert!(!implies(&t, &f));
        // false implies anything; anything implies true.
        assert!(implies(&f, &x));
        assert!(implies(&x, &t));
        assert!(!implies(&t, &x));
        assert!(!implies(&x, &f));
    }

    #[test]
    fn identity_default_covers_unknown_forms() {
        let a = Value::new("custom-predicate".to_string());
        let b = Value::new("custom-predicate".to_string());
        let c = Value::new("different".to_string());
        assert!(implies(&a, &b));
        assert!(!implies(&a, &c));
    }

    #[test]
    fn kernel_engine_is_statically_seeded() {
        // Force initialization, then verify the seed is present.
        assert!(implies(&sig![], &sig![]));
        let engine = &rules_for(implies_fn()).engine;
        assert!(engine.registry_len() >= 6);
        assert!(engine.cache_len() >= 4);
    }
}
