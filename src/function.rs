//! Generic function handles and the registration surface.
//!
//! A [`GenericFn`] is a cheap, cloneable handle: name, arity, and the
//! preserved original body. All dispatching state (rule set, engine,
//! trampoline) lives in the [`Dispatching`] aspect, attached through the
//! global store on first use. Registration goes through [`when`],
//! [`before`], [`after`], [`around`] (and their `_chained` variants for
//! next-method bodies), or through [`add_rule`] with an explicit [`Rule`].

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tracing::debug;

use crate::action::{Body, MethodKind, NextMethod};
use crate::aspect::{AspectStore, Dispatching, OwnerId, OwnerIdAllocator};
use crate::class::Object;
use crate::engine::Interpreted;
use crate::error::DispatchResult;
use crate::implication::implies;
use crate::ruleset::{Rule, RuleId};
use crate::sig;
use crate::signature::TupleSig;
use crate::value::Value;

static OWNER_IDS: Lazy<OwnerIdAllocator> = Lazy::new(OwnerIdAllocator::new);

/// A function whose behavior is assembled from independently registered
/// rules, dispatched on argument classes.
#[derive(Clone)]
pub struct GenericFn {
    inner: Arc<GfInner>,
}

struct GfInner {
    id: OwnerId,
    name: Arc<str>,
    arity: usize,
    /// The pre-decoration implementation, installed as the default rule.
    original: Option<Body>,
}

impl GenericFn {
    /// Generic function whose original body becomes the least-specific
    /// fallback rule.
    pub fn new(
        name: impl Into<Arc<str>>,
        arity: usize,
        body: impl Fn(&[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
    ) -> Self {
        Self::with_default(name, arity, Body::plain(body))
    }

    /// Like [`GenericFn::new`], with an explicit [`Body`] (chained default
    /// bodies included).
    pub fn with_default(name: impl Into<Arc<str>>, arity: usize, body: Body) -> Self {
        GenericFn {
            inner: Arc::new(GfInner {
                id: OWNER_IDS.next_id(),
                name: name.into(),
                arity,
                original: Some(body),
            }),
        }
    }

    /// Abstract generic function: no default implementation, so unmatched
    /// calls raise `NoApplicableMethods`.
    pub fn new_abstract(name: impl Into<Arc<str>>, arity: usize) -> Self {
        let gf = GenericFn {
            inner: Arc::new(GfInner {
                id: OWNER_IDS.next_id(),
                name: name.into(),
                arity,
                original: None,
            }),
        };
        // Initialize the dispatching aspect now; a later `rules_for` must
        // find it and not seed a default rule.
        gf.dispatching();
        gf
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn arity(&self) -> usize {
        self.inner.arity
    }

    /// Identity under which aspects are attached.
    pub fn id(&self) -> OwnerId {
        self.inner.id
    }

    /// The dispatching aspect, created on first use. Creation seeds the
    /// preserved original body (if any) as the default rule: empty
    /// signature, sequence 0, below every user rule.
    pub fn dispatching(&self) -> Arc<Dispatching> {
        let inner = &self.inner;
        AspectStore::global().of::<Dispatching, _>(inner.id, || {
            debug!(function = %inner.name, arity = inner.arity, "dispatching initialized");
            let d = Dispatching::new(inner.name.clone(), inner.arity, &Interpreted);
            if let Some(original) = &inner.original {
                let rule = Rule::new(original.clone(), Value::new(TupleSig::empty()));
                d.rules
                    .write()
                    .add(rule)
                    .expect("a single rule on an empty set cannot conflict");
            }
            d
        })
    }

    /// Invoke through the dispatch trampoline.
    pub fn call(&self, args: &[Value]) -> DispatchResult<Value> {
        let d = self.dispatching();
        (d.trampoline)(args)
    }
}

impl fmt::Debug for GenericFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericFn")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("arity", &self.inner.arity)
            .field("abstract", &self.inner.original.is_none())
            .finish()
    }
}

/// The initialized dispatching state (rule set, engine, trampoline) of a
/// generic function.
pub fn rules_for(f: &GenericFn) -> Arc<Dispatching> {
    f.dispatching()
}

/// Register a directly constructed [`Rule`].
pub fn add_rule(f: &GenericFn, rule: Rule) -> DispatchResult<RuleId> {
    f.dispatching().rules.write().add(rule)
}

/// Remove a previously registered rule.
pub fn remove_rule(f: &GenericFn, id: RuleId) -> DispatchResult<()> {
    f.dispatching().rules.write().remove(id)
}

fn install(
    f: &GenericFn,
    predicate: Value,
    kind: Option<MethodKind>,
    body: Body,
) -> DispatchResult<RuleId> {
    let mut rule = Rule::new(body, predicate);
    if let Some(kind) = kind {
        rule = rule.with_kind(kind);
    }
    add_rule(f, rule)
}

/// Extend a generic function with a new primary rule.
pub fn when(
    f: &GenericFn,
    predicate: Value,
    body: impl Fn(&[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
) -> DispatchResult<RuleId> {
    install(f, predicate, None, Body::plain(body))
}

/// Primary rule whose body receives the next-method chain first.
pub fn when_chained(
    f: &GenericFn,
    predicate: Value,
    body: impl Fn(&NextMethod<'_>, &[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
) -> DispatchResult<RuleId> {
    install(f, predicate, None, Body::chained(body))
}

/// Rule invoked before the primary chain; its return value is discarded.
pub fn before(
    f: &GenericFn,
    predicate: Value,
    body: impl Fn(&[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
) -> DispatchResult<RuleId> {
    install(f, predicate, Some(MethodKind::Before), Body::plain(body))
}

/// Rule invoked after the primary chain; its return value is discarded.
pub fn after(
    f: &GenericFn,
    predicate: Value,
    body: impl Fn(&[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
) -> DispatchResult<RuleId> {
    install(f, predicate, Some(MethodKind::After), Body::plain(body))
}

/// Rule occupying the strictly dominant band.
pub fn around(
    f: &GenericFn,
    predicate: Value,
    body: impl Fn(&[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
) -> DispatchResult<RuleId> {
    install(f, predicate, Some(MethodKind::Around), Body::plain(body))
}

/// Around rule whose body receives the next-method chain first.
pub fn around_chained(
    f: &GenericFn,
    predicate: Value,
    body: impl Fn(&NextMethod<'_>, &[Value]) -> DispatchResult<Value> + Send + Sync + 'static,
) -> DispatchResult<RuleId> {
    install(f, predicate, Some(MethodKind::Around), Body::chained(body))
}

// ---------------------------------------------------------------------------
// intersect
// ---------------------------------------------------------------------------

static INTERSECT: Lazy<GenericFn> = Lazy::new(|| {
    let gf = GenericFn::new_abstract("intersect", 2);
    around_chained(&gf, sig![Object, Object], |next, args| {
        if implies(&args[0], &args[1]) {
            Ok(args[0].clone())
        } else if implies(&args[1], &args[0]) {
            Ok(args[1].clone())
        } else {
            next.call(args)
        }
    })
    .expect("intersect bootstrap rule cannot conflict");
    gf
});

/// The logical intersection of two conditions.
///
/// An open generic: the built-in around rule short-circuits when one
/// condition implies the other; anything else raises `NoApplicableMethods`
/// until a rule for the condition types is registered on
/// [`intersect_fn`].
pub fn intersect(c1: &Value, c2: &Value) -> DispatchResult<Value> {
    INTERSECT.call(&[c1.clone(), c2.clone()])
}

/// The `intersect` generic function, for registering new condition forms.
pub fn intersect_fn() -> &'static GenericFn {
    &INTERSECT
}
