//! # polyphony
//!
//! Generic functions with predicate dispatch and method combination.
//!
//! A generic function's behavior is assembled from independently registered
//! rules. Each rule guards a body with a signature (canonically a tuple of
//! argument classes); invocation folds the applicable rules by specificity
//! through a method-combination algebra (primary/around/before/after), and
//! memoizes the result per argument-class tuple.
//!
//! ## Architecture
//!
//! - **Implication kernel** (`implication`): the specificity order over
//!   signatures, itself an open generic function (bootstrapped)
//! - **Action algebra** (`action`): override/merge/call over the method
//!   kinds, with a declarative kind lattice
//! - **Rule sets** (`ruleset`): observable, insertion-ordered rule storage
//! - **Dispatch engine** (`engine`): signature registry + class-tuple cache
//! - **Aspect store** (`aspect`): per-function dispatching state
//! - **Registration surface** (`function`): `when`/`before`/`after`/`around`
//!
//! ## Library usage
//!
//! ```
//! use polyphony::{GenericFn, Value, args, sig, when};
//!
//! let greet = GenericFn::new("greet", 1, |_| Ok(Value::new("any")));
//! when(&greet, sig![String], |_| Ok(Value::new("str"))).unwrap();
//!
//! let out = greet.call(&args![3_i64]).unwrap();
//! assert_eq!(out.downcast_ref::<&str>(), Some(&"any"));
//! let out = greet.call(&args!["hi".to_string()]).unwrap();
//! assert_eq!(out.downcast_ref::<&str>(), Some(&"str"));
//! ```

pub mod action;
pub mod aspect;
pub mod class;
pub mod dominance;
pub mod engine;
pub mod error;
pub mod function;
pub mod implication;
pub mod ruleset;
pub mod signature;
pub mod value;

pub use action::{
    Action, ActionKind, Body, MethodKind, NextMethod, always_overrides, combine_actions,
    merge_by_default,
};
pub use aspect::{AspectStore, Dispatching, OwnerId};
pub use class::{ClassId, Object, class_of, derives, is_subclass, object};
pub use dominance::dominant_signatures;
pub use engine::{Interpreted, TrampolineBackend, TrampolineSpec, TypeEngine};
pub use error::{DispatchError, DispatchResult};
pub use function::{
    GenericFn, add_rule, after, around, around_chained, before, intersect, intersect_fn,
    remove_rule, rules_for, when, when_chained,
};
pub use implication::{implies, implies_fn};
pub use ruleset::{ActionDef, Rule, RuleId, RuleSet};
pub use signature::{Disjunction, TupleSig, disjuncts, disjuncts_fn, predicate_signatures};
pub use value::Value;
