//! Signature forms and predicate expansion.
//!
//! The canonical signature is [`TupleSig`]: an ordered sequence of classes,
//! one per argument position. Booleans act as trivial predicates (`true`
//! matches everything, `false` nothing), and a [`Disjunction`] expands into
//! one action definition per alternative. Richer signature forms need no
//! engine changes: register an implication rule for the new form on the open
//! `implies` generic function and the engine picks it up.

use once_cell::sync::Lazy;

use crate::args;
use crate::class::ClassId;
use crate::function::{GenericFn, when};
use crate::value::Value;

/// Ordered sequence of argument classes; the canonical signature form.
///
/// A shorter tuple constrains only the leading arguments; the empty tuple
/// matches every call and is the signature of default rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleSig(Vec<ClassId>);

impl TupleSig {
    /// Signature over the given classes, leftmost argument first.
    pub fn of(classes: Vec<ClassId>) -> Self {
        TupleSig(classes)
    }

    /// The empty signature, which implies every signature.
    pub fn empty() -> Self {
        TupleSig(Vec::new())
    }

    /// Number of constrained argument positions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no argument position is constrained.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The constrained classes, leftmost first.
    pub fn classes(&self) -> &[ClassId] {
        &self.0
    }
}

/// A predicate matching when any of its alternatives matches.
///
/// Expanded at rule-insertion time into one [`ActionDef`](crate::ruleset::ActionDef)
/// per alternative.
#[derive(Debug, Clone, PartialEq)]
pub struct Disjunction(Vec<Value>);

impl Disjunction {
    /// A disjunction over the given alternatives.
    pub fn of(alternatives: Vec<Value>) -> Self {
        Disjunction(alternatives)
    }

    /// The alternatives, in declaration order.
    pub fn alternatives(&self) -> &[Value] {
        &self.0
    }
}

/// Expand a predicate into the signatures it contributes.
///
/// Structural on purpose: this runs while the implication kernel is still
/// bootstrapping, so it must not dispatch through a generic function.
pub fn predicate_signatures(predicate: &Value) -> Vec<Value> {
    if let Some(d) = predicate.downcast_ref::<Disjunction>() {
        return d
            .alternatives()
            .iter()
            .flat_map(predicate_signatures)
            .collect();
    }
    if let Some(b) = predicate.downcast_ref::<bool>() {
        return if *b { vec![Value::new(true)] } else { vec![] };
    }
    vec![predicate.clone()]
}

static DISJUNCTS: Lazy<GenericFn> = Lazy::new(|| {
    let gf = GenericFn::new("disjuncts", 1, |args| {
        Ok(Value::new(vec![args[0].clone()]))
    });
    when(&gf, crate::sig![bool], |args: &[Value]| {
        let b = *args[0].expect_ref::<bool>()?;
        Ok(Value::new(if b {
            vec![Value::new(true)]
        } else {
            Vec::new()
        }))
    })
    .expect("disjuncts bootstrap rules cannot conflict");
    when(&gf, crate::sig![Disjunction], |args: &[Value]| {
        let d = args[0].expect_ref::<Disjunction>()?;
        Ok(Value::new(d.alternatives().to_vec()))
    })
    .expect("disjuncts bootstrap rules cannot conflict");
    gf
});

/// The logical disjunctions of a predicate value.
///
/// An open generic function: by default a value is its own single disjunct,
/// `true` is `[true]`, `false` is `[]`, and a [`Disjunction`] yields its
/// alternatives. Extend with `when(disjuncts_fn(), ..)`.
pub fn disjuncts(ob: &Value) -> Vec<Value> {
    match DISJUNCTS.call(&args![ob.clone()]) {
        Ok(v) => v
            .downcast_ref::<Vec<Value>>()
            .cloned()
            .unwrap_or_else(|| vec![ob.clone()]),
        Err(_) => vec![ob.clone()],
    }
}

/// The `disjuncts` generic function, for registering new disjunction forms.
pub fn disjuncts_fn() -> &'static GenericFn {
    &DISJUNCTS
}

/// Build a [`TupleSig`] signature `Value` from Rust types.
///
/// ```
/// use polyphony::sig;
/// let s = sig![i64, String];   // (i64, String)
/// let any = sig![];            // the empty signature
/// ```
#[macro_export]
macro_rules! sig {
    () => {
        $crate::value::Value::new($crate::signature::TupleSig::empty())
    };
    ($($t:ty),+ $(,)?) => {
        $crate::value::Value::new($crate::signature::TupleSig::of(vec![
            $($crate::class::class_of::<$t>()),+
        ]))
    };
}
