//! End-to-end integration tests for the polyphony dispatcher.
//!
//! These tests exercise the full pipeline from rule registration through
//! method combination and cached dispatch, validating that the rule sets,
//! the implication kernel, and the engine all work together.

use std::sync::Arc;

use parking_lot::Mutex;

use polyphony::{
    Disjunction, DispatchError, GenericFn, Value, after, args, around, before, derives,
    implies_fn, remove_rule, rules_for, sig, when, when_chained,
};

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

#[derive(Debug, PartialEq)]
struct Duck;
#[derive(Debug, PartialEq)]
struct Goose;
#[derive(Debug, PartialEq)]
struct Bird;

fn bird_hierarchy() {
    derives::<Duck, Bird>();
    derives::<Goose, Bird>();
}

#[test]
fn single_specific_override() {
    init_tracing();
    let greet = GenericFn::new("it_greet", 1, |_| Ok(Value::new("any")));
    when(&greet, sig![String], |_| Ok(Value::new("str"))).unwrap();

    let out = greet.call(&args![3_i64]).unwrap();
    assert_eq!(out.downcast_ref::<&str>(), Some(&"any"));
    let out = greet.call(&args!["hi".to_string()]).unwrap();
    assert_eq!(out.downcast_ref::<&str>(), Some(&"str"));
}

#[test]
fn chainable_next_method() {
    let f = GenericFn::new("it_chain", 1, |_| Ok(Value::new(10_i64)));
    when_chained(&f, sig![i64], |next, args| {
        let below = next.call(args)?;
        Ok(Value::new(below.expect_ref::<i64>()? + 1))
    })
    .unwrap();

    let out = f.call(&args![0_i64]).unwrap();
    assert_eq!(out.expect_ref::<i64>().unwrap(), &11);
}

#[test]
fn incomparable_rules_raise_ambiguous() {
    bird_hierarchy();
    let f = GenericFn::new_abstract("it_ambiguous", 2);
    when(&f, sig![Duck, polyphony::Object], |_| Ok(Value::new("left"))).unwrap();
    when(&f, sig![polyphony::Object, Duck], |_| Ok(Value::new("right"))).unwrap();

    // Only one side applies: no ambiguity.
    let out = f.call(&args![Duck, 1_i64]).unwrap();
    assert_eq!(out.downcast_ref::<&str>(), Some(&"left"));

    // Both apply and neither is more specific.
    let err = f.call(&args![Duck, Duck]).unwrap_err();
    assert!(matches!(err, DispatchError::AmbiguousMethods { .. }));
}

#[test]
fn around_beats_primary() {
    let f = GenericFn::new_abstract("it_around", 1);
    when(&f, sig![i64], |_| Ok(Value::new(1_i64))).unwrap();
    around(&f, sig![i64], |_| Ok(Value::new(2_i64))).unwrap();

    let out = f.call(&args![5_i64]).unwrap();
    assert_eq!(out.expect_ref::<i64>().unwrap(), &2);
}

#[test]
fn before_after_ordering_and_return_value() {
    init_tracing();
    bird_hierarchy();
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let f = GenericFn::new_abstract("it_brackets", 1);
    let t = trace.clone();
    when(&f, sig![Duck], move |_| {
        t.lock().push("P");
        Ok(Value::new("P"))
    })
    .unwrap();
    let t = trace.clone();
    // More specific signature: runs first among the befores.
    before(&f, sig![Duck], move |_| {
        t.lock().push("B1");
        Ok(Value::new(()))
    })
    .unwrap();
    let t = trace.clone();
    before(&f, sig![Bird], move |_| {
        t.lock().push("B2");
        Ok(Value::new(()))
    })
    .unwrap();
    let t = trace.clone();
    after(&f, sig![Duck], move |_| {
        t.lock().push("A");
        Ok(Value::new(()))
    })
    .unwrap();

    let out = f.call(&args![Duck]).unwrap();
    assert_eq!(out.downcast_ref::<&str>(), Some(&"P"));
    assert_eq!(*trace.lock(), vec!["B1", "B2", "P", "A"]);
}

#[test]
fn removal_matches_freshly_built_engine() {
    let build = |name: &str, with_int_rule: bool| {
        let f = GenericFn::new(name, 1, |_| Ok(Value::new("base")));
        if with_int_rule {
            when(&f, sig![i64], |_| Ok(Value::new("int"))).unwrap();
        }
        when(&f, sig![String], |_| Ok(Value::new("str"))).unwrap();
        f
    };

    let full = build("it_removal_full", true);
    let id = rules_for(&full).rules.read().rule_ids()[1];
    // Warm the cache, then remove the int rule.
    assert_eq!(
        full.call(&args![1_i64]).unwrap().downcast_ref::<&str>(),
        Some(&"int")
    );
    remove_rule(&full, id).unwrap();

    let fresh = build("it_removal_fresh", false);
    for (argv, expect) in [
        (args![1_i64], "base"),
        (args!["s".to_string()], "str"),
        (args![2.5_f64], "base"),
    ] {
        let a = full.call(&argv).unwrap();
        let b = fresh.call(&argv).unwrap();
        assert_eq!(a.downcast_ref::<&str>(), Some(&expect));
        assert_eq!(b.downcast_ref::<&str>(), Some(&expect));
    }
}

#[test]
fn duplicate_registration_is_observably_idempotent() {
    let f = GenericFn::new("it_idempotent", 1, |_| Ok(Value::new("base")));
    let d = rules_for(&f);

    let body = polyphony::Body::plain(|_: &[Value]| Ok(Value::new("int")));
    let rule = polyphony::Rule::new(body, sig![i64]);
    let first = d.rules.write().add(rule.clone()).unwrap();
    let second = d.rules.write().add(rule).unwrap();
    assert_eq!(first, second);

    let out = f.call(&args![1_i64]).unwrap();
    assert_eq!(out.downcast_ref::<&str>(), Some(&"int"));
}

#[test]
fn dispatch_cache_hits_after_first_call() {
    let f = GenericFn::new("it_cached", 1, |_| Ok(Value::new("base")));
    when(&f, sig![i64], |_| Ok(Value::new("int"))).unwrap();

    let engine = rules_for(&f).engine.clone();
    let before_count = engine.cache_len();
    f.call(&args![1_i64]).unwrap();
    assert_eq!(engine.cache_len(), before_count + 1);
    f.call(&args![2_i64]).unwrap();
    assert_eq!(engine.cache_len(), before_count + 1);
}

#[test]
fn disjunctive_predicate_covers_both_alternatives() {
    let f = GenericFn::new("it_disjunct", 1, |_| Ok(Value::new("base")));
    let either = Value::new(Disjunction::of(vec![sig![i64], sig![bool]]));
    when(&f, either, |_| Ok(Value::new("either"))).unwrap();

    assert_eq!(
        f.call(&args![1_i64]).unwrap().downcast_ref::<&str>(),
        Some(&"either")
    );
    assert_eq!(
        f.call(&args![true]).unwrap().downcast_ref::<&str>(),
        Some(&"either")
    );
    assert_eq!(
        f.call(&args!["s".to_string()]).unwrap().downcast_ref::<&str>(),
        Some(&"base")
    );
}

#[test]
fn boolean_predicates_on_abstract_functions() {
    let f = GenericFn::new_abstract("it_bool_pred", 1);
    when(&f, Value::new(false), |_| Ok(Value::new("never"))).unwrap();
    assert!(f.call(&args![1_i64]).is_err());

    when(&f, Value::new(true), |_| Ok(Value::new("always"))).unwrap();
    assert_eq!(
        f.call(&args![1_i64]).unwrap().downcast_ref::<&str>(),
        Some(&"always")
    );
    assert_eq!(
        f.call(&args!["s".to_string()]).unwrap().downcast_ref::<&str>(),
        Some(&"always")
    );
}

/// A predicate form the core knows nothing about: it matches any single
/// argument. Teaching the kernel about it requires one rule, not an engine
/// change.
#[derive(Debug, Clone, PartialEq)]
struct Anything;

#[test]
fn new_signature_forms_extend_the_kernel() {
    when(
        implies_fn(),
        sig![polyphony::TupleSig, Anything],
        |_| Ok(Value::new(true)),
    )
    .unwrap();

    let f = GenericFn::new_abstract("it_extended", 1);
    when(&f, Value::new(Anything), |_| Ok(Value::new("matched"))).unwrap();

    assert_eq!(
        f.call(&args![1_i64]).unwrap().downcast_ref::<&str>(),
        Some(&"matched")
    );
    assert_eq!(
        f.call(&args!["s".to_string()]).unwrap().downcast_ref::<&str>(),
        Some(&"matched")
    );
}

#[test]
fn more_specific_subclass_rule_wins() {
    bird_hierarchy();
    let f = GenericFn::new_abstract("it_subclass", 1);
    when(&f, sig![Bird], |_| Ok(Value::new("bird"))).unwrap();
    when(&f, sig![Duck], |_| Ok(Value::new("duck"))).unwrap();

    assert_eq!(
        f.call(&args![Duck]).unwrap().downcast_ref::<&str>(),
        Some(&"duck")
    );
    // Goose only matches the Bird rule.
    assert_eq!(
        f.call(&args![Goose]).unwrap().downcast_ref::<&str>(),
        Some(&"bird")
    );
}
