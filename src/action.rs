//! The action algebra: runtime dispatch units and their composition.
//!
//! An [`Action`] is what the engine stores per signature and per argument
//! class tuple. The four method kinds plus the two error actions form a
//! closed set of variants, each implementing the three composition
//! operations: `override` (attach the loser as the next-method tail),
//! `merge` (same-band peers), and `call`.
//!
//! Cross-kind dominance is not re-derived from signatures; it is declared in
//! a small relation table (the [`KindLattice`]) seeded with the standard
//! band ordering and extensible through [`always_overrides`] and
//! [`merge_by_default`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::{Lazy, OnceCell};
use parking_lot::RwLock;

use crate::dominance::dominant_signatures;
use crate::error::{DispatchError, DispatchResult};
use crate::implication::implies;
use crate::signature::TupleSig;
use crate::value::{Value, render_args};

// ---------------------------------------------------------------------------
// Kinds and the ordering lattice
// ---------------------------------------------------------------------------

/// The method kind a rule registers as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Ordinary method, optionally chainable via a next-method tail.
    Primary,
    /// Wraps everything else; strictly dominant band.
    Around,
    /// Runs before the primary chain; return values discarded.
    Before,
    /// Runs after the primary chain, in reverse dominance order.
    After,
}

impl MethodKind {
    /// The corresponding runtime action kind, for lattice declarations.
    pub fn action_kind(self) -> ActionKind {
        match self {
            MethodKind::Primary => ActionKind::Primary,
            MethodKind::Around => ActionKind::Around,
            MethodKind::Before => ActionKind::Before,
            MethodKind::After => ActionKind::After,
        }
    }
}

/// Kind tag of a runtime [`Action`], including the error actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Primary,
    Around,
    Before,
    After,
    NoApplicable,
    Ambiguous,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActionKind::Primary => "primary",
            ActionKind::Around => "around",
            ActionKind::Before => "before",
            ActionKind::After => "after",
            ActionKind::NoApplicable => "no-applicable",
            ActionKind::Ambiguous => "ambiguous",
        };
        f.write_str(label)
    }
}

/// Declared ordering relation between action kinds.
///
/// Consulted by [`combine_actions`] whenever two actions of different kinds
/// land at the same slot. Same-kind pairs marked merge-by-default never imply
/// each other, so they always merge instead of overriding.
#[derive(Debug)]
pub struct KindLattice {
    overrides: HashSet<(ActionKind, ActionKind)>,
    merges: HashSet<ActionKind>,
}

impl KindLattice {
    fn defaults() -> Self {
        use ActionKind::*;
        let overrides = [
            (Around, Before),
            (Around, After),
            (Around, Primary),
            (Around, NoApplicable),
            (Before, After),
            (Before, Primary),
            (Before, NoApplicable),
            (After, Primary),
            (After, NoApplicable),
            (Primary, NoApplicable),
        ]
        .into_iter()
        .collect();
        let merges = [Before, After, NoApplicable, Ambiguous].into_iter().collect();
        KindLattice { overrides, merges }
    }

    fn overrides(&self, winner: ActionKind, loser: ActionKind) -> bool {
        self.overrides.contains(&(winner, loser))
    }

    fn merges_same(&self, kind: ActionKind) -> bool {
        self.merges.contains(&kind)
    }
}

static LATTICE: Lazy<RwLock<KindLattice>> = Lazy::new(|| RwLock::new(KindLattice::defaults()));

/// Declare that `winner` instances always imply `loser` instances and never
/// the other way around.
pub fn always_overrides(winner: ActionKind, loser: ActionKind) {
    let mut lattice = LATTICE.write();
    lattice.overrides.insert((winner, loser));
    lattice.overrides.remove(&(loser, winner));
}

/// Declare that instances of `kind` never imply other instances of `kind`,
/// forcing same-signature peers to merge rather than override.
pub fn merge_by_default(kind: ActionKind) {
    LATTICE.write().merges.insert(kind);
}

// ---------------------------------------------------------------------------
// Bodies and the next-method chain
// ---------------------------------------------------------------------------

/// Plain rule body: receives the call arguments.
pub type BodyFn = dyn Fn(&[Value]) -> DispatchResult<Value> + Send + Sync;
/// Chainable rule body: receives the next-method handle first.
pub type ChainedBodyFn = dyn Fn(&NextMethod<'_>, &[Value]) -> DispatchResult<Value> + Send + Sync;

/// A rule body. `Chained` is the tagged rendition of "first formal is
/// `next_method`": only chained bodies participate in override tails.
#[derive(Clone)]
pub enum Body {
    Plain(Arc<BodyFn>),
    Chained(Arc<ChainedBodyFn>),
}

impl Body {
    /// Wrap a plain body.
    pub fn plain(f: impl Fn(&[Value]) -> DispatchResult<Value> + Send + Sync + 'static) -> Self {
        Body::Plain(Arc::new(f))
    }

    /// Wrap a chainable body.
    pub fn chained(
        f: impl Fn(&NextMethod<'_>, &[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
    ) -> Self {
        Body::Chained(Arc::new(f))
    }

    /// Whether this body accepts a next-method tail.
    pub fn can_tail(&self) -> bool {
        matches!(self, Body::Chained(_))
    }

    /// Invoke; plain bodies ignore the next-method handle.
    pub fn invoke(&self, next: &NextMethod<'_>, args: &[Value]) -> DispatchResult<Value> {
        match self {
            Body::Plain(f) => f(args),
            Body::Chained(f) => f(next, args),
        }
    }

    /// Identity token for de-duplication within method lists.
    pub(crate) fn token(&self) -> usize {
        match self {
            Body::Plain(f) => Arc::as_ptr(f).cast::<()>() as usize,
            Body::Chained(f) => Arc::as_ptr(f).cast::<()>() as usize,
        }
    }
}

impl PartialEq for Body {
    fn eq(&self, other: &Self) -> bool {
        self.token() == other.token()
    }
}

// A closure's address is all there is to show.
impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Plain(_) => write!(f, "Body::Plain(@{:#x})", self.token()),
            Body::Chained(_) => write!(f, "Body::Chained(@{:#x})", self.token()),
        }
    }
}

/// Handle to the rest of the dispatch chain, passed to chainable bodies.
///
/// Calling it with no tail behaves like the rule set's default action: it
/// raises [`DispatchError::NoApplicableMethods`].
pub struct NextMethod<'a> {
    tail: Option<&'a Action>,
}

impl<'a> NextMethod<'a> {
    pub(crate) fn new(tail: Option<&'a Action>) -> Self {
        NextMethod { tail }
    }

    /// A handle with nothing further to call.
    pub fn none() -> NextMethod<'static> {
        NextMethod { tail: None }
    }

    /// Invoke the rest of the chain.
    pub fn call(&self, args: &[Value]) -> DispatchResult<Value> {
        match self.tail {
            Some(action) => action.call(args),
            None => Err(DispatchError::NoApplicableMethods {
                function: "next_method".into(),
                args: render_args(args),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Action variants
// ---------------------------------------------------------------------------

/// A single method with an optional next-method tail (Primary and Around).
#[derive(Debug, Clone)]
pub struct Method {
    body: Body,
    signature: Value,
    precedence: u64,
    tail: Option<Box<Action>>,
}

impl Method {
    /// Method without a tail; tails are attached by `override`.
    pub fn new(body: Body, signature: Value, precedence: u64) -> Self {
        Method {
            body,
            signature,
            precedence,
            tail: None,
        }
    }

    pub fn signature(&self) -> &Value {
        &self.signature
    }

    pub fn precedence(&self) -> u64 {
        self.precedence
    }

    fn tail_with(&self, tail: Option<Action>) -> Method {
        Method {
            body: self.body.clone(),
            signature: self.signature.clone(),
            precedence: self.precedence,
            tail: tail.map(Box::new),
        }
    }

    fn call(&self, args: &[Value]) -> DispatchResult<Value> {
        let next = NextMethod::new(self.tail.as_deref());
        self.body.invoke(&next, args)
    }
}

/// An unsorted bag of same-kind methods plus a tail (Before and After).
///
/// Invocation order is computed lazily: ascending precedence, then repeated
/// dominance passes, with bodies de-duplicated by identity.
#[derive(Debug, Clone)]
pub struct MethodList {
    items: Vec<(Value, u64, Body)>,
    tail: Option<Box<Action>>,
    sorted: OnceCell<Vec<(Value, Body)>>,
}

impl MethodList {
    /// A list holding a single method.
    pub fn single(body: Body, signature: Value, precedence: u64) -> Self {
        MethodList {
            items: vec![(signature, precedence, body)],
            tail: None,
            sorted: OnceCell::new(),
        }
    }

    /// Number of methods in the bag.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn tail_with(&self, tail: Option<Action>) -> MethodList {
        MethodList {
            items: self.items.clone(),
            tail: tail.map(Box::new),
            sorted: OnceCell::new(),
        }
    }

    fn concat(&self, other: &MethodList) -> DispatchResult<MethodList> {
        let mut items = self.items.clone();
        items.extend(other.items.iter().cloned());
        let tail = combine_actions(self.tail.as_deref(), other.tail.as_deref())?;
        Ok(MethodList {
            items,
            tail: tail.map(Box::new),
            sorted: OnceCell::new(),
        })
    }

    /// Methods in invocation order (most dominant first).
    fn sorted(&self) -> &[(Value, Body)] {
        self.sorted.get_or_init(|| {
            let mut items = self.items.clone();
            items.sort_by_key(|(_, precedence, _)| *precedence);
            let mut rest: Vec<(Value, Body)> =
                items.into_iter().map(|(sig, _, body)| (sig, body)).collect();

            let mut out = Vec::new();
            let mut seen: HashSet<usize> = HashSet::new();
            while !rest.is_empty() {
                let best = dominant_signatures(&rest);
                for (sig, body) in &best {
                    if let Some(pos) = rest
                        .iter()
                        .position(|(s, b)| s == sig && b.token() == body.token())
                    {
                        rest.remove(pos);
                    }
                }
                for (sig, body) in best {
                    if seen.insert(body.token()) {
                        out.push((sig, body));
                    }
                }
            }
            out
        })
    }
}

/// Callable stand-in for "nothing matched"; raises when invoked.
#[derive(Debug, Clone)]
pub struct NoApplicable {
    function: Arc<str>,
}

impl NoApplicable {
    pub fn new(function: Arc<str>) -> Self {
        NoApplicable { function }
    }

    fn call(&self, args: &[Value]) -> DispatchResult<Value> {
        Err(DispatchError::NoApplicableMethods {
            function: self.function.to_string(),
            args: render_args(args),
        })
    }
}

/// Callable stand-in for an unresolved tie; raises when invoked.
///
/// Construction flattens nested ambiguities, so the carried list is always a
/// flat set of contributing actions.
#[derive(Debug, Clone)]
pub struct Ambiguous {
    methods: Vec<Action>,
}

impl Ambiguous {
    pub fn new(methods: Vec<Action>) -> Self {
        let mut mine = Vec::new();
        for m in methods {
            match m {
                Action::Ambiguous(inner) => mine.extend(inner.methods),
                other => mine.push(other),
            }
        }
        Ambiguous { methods: mine }
    }

    /// The contributing actions, flattened.
    pub fn methods(&self) -> &[Action] {
        &self.methods
    }

    fn call(&self, _args: &[Value]) -> DispatchResult<Value> {
        Err(DispatchError::AmbiguousMethods {
            methods: self
                .methods
                .iter()
                .map(Action::describe)
                .collect::<Vec<_>>()
                .join("; "),
        })
    }
}

/// The runtime unit of dispatch behavior.
#[derive(Debug, Clone)]
pub enum Action {
    Primary(Method),
    Around(Method),
    Before(MethodList),
    After(MethodList),
    NoApplicable(NoApplicable),
    Ambiguous(Ambiguous),
}

impl Action {
    /// Build the action a rule definition contributes.
    pub fn from_parts(kind: MethodKind, body: Body, signature: Value, sequence: u64) -> Action {
        match kind {
            MethodKind::Primary => Action::Primary(Method::new(body, signature, sequence)),
            MethodKind::Around => Action::Around(Method::new(body, signature, sequence)),
            MethodKind::Before => Action::Before(MethodList::single(body, signature, sequence)),
            MethodKind::After => Action::After(MethodList::single(body, signature, sequence)),
        }
    }

    /// The default action raising for the named function.
    pub fn no_applicable(function: Arc<str>) -> Action {
        Action::NoApplicable(NoApplicable::new(function))
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Primary(_) => ActionKind::Primary,
            Action::Around(_) => ActionKind::Around,
            Action::Before(_) => ActionKind::Before,
            Action::After(_) => ActionKind::After,
            Action::NoApplicable(_) => ActionKind::NoApplicable,
            Action::Ambiguous(_) => ActionKind::Ambiguous,
        }
    }

    /// Invoke this action.
    pub fn call(&self, args: &[Value]) -> DispatchResult<Value> {
        match self {
            Action::Primary(m) | Action::Around(m) => m.call(args),
            Action::Before(list) => {
                for (_, body) in list.sorted() {
                    body.invoke(&NextMethod::none(), args)?;
                }
                NextMethod::new(list.tail.as_deref()).call(args)
            }
            Action::After(list) => {
                let result = NextMethod::new(list.tail.as_deref()).call(args)?;
                for (_, body) in list.sorted().iter().rev() {
                    body.invoke(&NextMethod::none(), args)?;
                }
                Ok(result)
            }
            Action::NoApplicable(n) => n.call(args),
            Action::Ambiguous(a) => a.call(args),
        }
    }

    /// `self` wins: attach `other` below it where the variant permits.
    pub fn override_with(&self, other: &Action) -> DispatchResult<Action> {
        match self {
            Action::Primary(m) => {
                if !m.body.can_tail() {
                    return Ok(self.clone());
                }
                let tail = combine_actions(m.tail.as_deref(), Some(other))?;
                Ok(Action::Primary(m.tail_with(tail)))
            }
            Action::Around(m) => {
                if !m.body.can_tail() {
                    return Ok(self.clone());
                }
                let tail = combine_actions(m.tail.as_deref(), Some(other))?;
                Ok(Action::Around(m.tail_with(tail)))
            }
            Action::Before(list) => {
                let tail = combine_actions(list.tail.as_deref(), Some(other))?;
                Ok(Action::Before(list.tail_with(tail)))
            }
            Action::After(list) => {
                let tail = combine_actions(list.tail.as_deref(), Some(other))?;
                Ok(Action::After(list.tail_with(tail)))
            }
            Action::NoApplicable(_) | Action::Ambiguous(_) => Ok(self.clone()),
        }
    }

    /// Neither side wins: combine same-band peers.
    pub fn merge(&self, other: &Action) -> DispatchResult<Action> {
        match (self, other) {
            (Action::Ambiguous(a), _) => Ok(Action::Ambiguous(Ambiguous::new(
                a.methods
                    .iter()
                    .cloned()
                    .chain(std::iter::once(other.clone()))
                    .collect(),
            ))),
            (Action::Before(l1), Action::Before(l2)) => Ok(Action::Before(l1.concat(l2)?)),
            (Action::After(l1), Action::After(l2)) => Ok(Action::After(l1.concat(l2)?)),
            (Action::Before(_), _) | (Action::After(_), _) => {
                Err(DispatchError::IncompatibleActionTypes {
                    left: self.describe(),
                    right: other.describe(),
                })
            }
            // Two primaries (or a primary against anything unordered) tie.
            _ => Ok(Action::Ambiguous(Ambiguous::new(vec![
                self.clone(),
                other.clone(),
            ]))),
        }
    }

    /// One-line rendering for diagnostics and tracing.
    pub fn describe(&self) -> String {
        match self {
            Action::Primary(m) => format!("primary{}", describe_sig(&m.signature)),
            Action::Around(m) => format!("around{}", describe_sig(&m.signature)),
            Action::Before(list) => format!("before[{} method(s)]", list.len()),
            Action::After(list) => format!("after[{} method(s)]", list.len()),
            Action::NoApplicable(_) => "no-applicable".to_string(),
            Action::Ambiguous(a) => {
                let inner = a
                    .methods
                    .iter()
                    .map(Action::describe)
                    .collect::<Vec<_>>()
                    .join(" | ");
                format!("ambiguous[{inner}]")
            }
        }
    }
}

fn describe_sig(sig: &Value) -> String {
    if let Some(t) = sig.downcast_ref::<TupleSig>() {
        let names: Vec<&str> = t.classes().iter().map(|c| c.name()).collect();
        format!("({})", names.join(", "))
    } else {
        format!("({sig:?})")
    }
}

// ---------------------------------------------------------------------------
// Dominance between actions, and the central combine
// ---------------------------------------------------------------------------

/// Does `a1` dominate (or equal) `a2`?
///
/// Ambiguous actions are compared member-wise: an ambiguity overrides what
/// any of its members overrides, and is overridden only by an action that
/// overrides all of its members. Same-kind methods compare their signatures
/// unless the kind is marked merge-by-default; different kinds consult the
/// lattice.
pub fn action_implies(a1: &Action, a2: &Action) -> bool {
    match (a1, a2) {
        (Action::Ambiguous(_), Action::Ambiguous(_)) => false,
        (Action::Ambiguous(am), other) => am.methods.iter().any(|m| action_implies(m, other)),
        (one, Action::Ambiguous(am)) => am.methods.iter().all(|m| action_implies(one, m)),
        _ => {
            let (k1, k2) = (a1.kind(), a2.kind());
            if k1 != k2 {
                return LATTICE.read().overrides(k1, k2);
            }
            if LATTICE.read().merges_same(k1) {
                return false;
            }
            match (a1, a2) {
                (Action::Primary(m1), Action::Primary(m2))
                | (Action::Around(m1), Action::Around(m2)) => {
                    implies(m1.signature(), m2.signature())
                }
                _ => false,
            }
        }
    }
}

/// Compose two optional actions landing at the same dispatch slot.
///
/// Strict dominance in either direction yields an override; mutual or absent
/// dominance yields a merge. `None` absorbs.
pub fn combine_actions(
    a1: Option<&Action>,
    a2: Option<&Action>,
) -> DispatchResult<Option<Action>> {
    match (a1, a2) {
        (None, None) => Ok(None),
        (None, Some(a)) | (Some(a), None) => Ok(Some(a.clone())),
        (Some(a1), Some(a2)) => {
            let forward = action_implies(a1, a2);
            let backward = action_implies(a2, a1);
            let combined = if forward && !backward {
                a1.override_with(a2)?
            } else if backward && !forward {
                a2.override_with(a1)?
            } else {
                a1.merge(a2)?
            };
            Ok(Some(combined))
        }
    }
}
