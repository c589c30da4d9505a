//! Diagnostic error types for the polyphony dispatcher.
//!
//! Dispatch failures are deferred to call time: adding a rule never fails for
//! predicate content, and specificity conflicts are represented as error
//! *actions* ([`NoApplicableMethods`](DispatchError::NoApplicableMethods),
//! [`AmbiguousMethods`](DispatchError::AmbiguousMethods)) that raise when the
//! generic function is actually invoked. The remaining variants are structural
//! programmer errors surfaced at registration time.

use miette::Diagnostic;
use thiserror::Error;

/// Errors raised by generic-function registration and dispatch.
#[derive(Debug, Error, Diagnostic)]
pub enum DispatchError {
    #[error("no applicable methods for '{function}' with arguments ({args})")]
    #[diagnostic(
        code(poly::dispatch::no_applicable),
        help(
            "No registered rule matched the argument classes and the function \
             has no default body. Register a rule with `when`, or construct \
             the function with a default body instead of `new_abstract`."
        )
    )]
    NoApplicableMethods { function: String, args: String },

    #[error("ambiguous methods: {methods}")]
    #[diagnostic(
        code(poly::dispatch::ambiguous),
        help(
            "Two or more rules apply and neither signature is more specific \
             than the other. Add a rule on the intersection of the conflicting \
             signatures, or declare an ordering with `always_overrides`."
        )
    )]
    AmbiguousMethods { methods: String },

    #[error("incompatible action types for merge: {left} vs {right}")]
    #[diagnostic(
        code(poly::dispatch::incompatible_actions),
        help(
            "Method lists of different kinds landed at the same dispatch slot \
             without an ordering between them. This indicates a broken action \
             kind lattice; check your `always_overrides` declarations."
        )
    )]
    IncompatibleActionTypes { left: String, right: String },

    #[error("'{function}' expects {expected} argument(s), got {actual}")]
    #[diagnostic(
        code(poly::dispatch::wrong_arity),
        help("Call the generic function with exactly as many arguments as its declared arity.")
    )]
    WrongArity {
        function: String,
        expected: usize,
        actual: usize,
    },

    #[error("value type mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(poly::value::type_mismatch),
        help(
            "A rule body or kernel helper tried to downcast a `Value` to a \
             type it does not hold. Check the signature the rule was \
             registered under against the types the body extracts."
        )
    )]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("unknown rule: sequence {sequence}")]
    #[diagnostic(
        code(poly::ruleset::unknown_rule),
        help("The RuleId was not found in this rule set. It may have already been removed.")
    )]
    UnknownRule { sequence: u64 },
}

/// Convenience alias for functions returning dispatch results.
pub type DispatchResult<T> = std::result::Result<T, DispatchError>;
