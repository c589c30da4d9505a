//! Type-indexed dispatch engine.
//!
//! A [`TypeEngine`] subscribes to one generic function's rule set and keeps
//! three structures: the `registry` (signature → combined action, in
//! insertion order), the `static_cache` (a bootstrap seed, empty for ordinary
//! functions), and the live `cache` memoizing argument-class tuples to the
//! folded action. A cache hit dispatches in O(1) on class identity alone.
//!
//! The engine mirrors the rule set's definitions in insertion order, so a
//! removal-triggered full reset replays locally without calling back into
//! the (locked) rule set mid-notification. The miss fold runs on a snapshot
//! of the registry: no engine lock is held while the implication kernel or a
//! rule body executes.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::action::{Action, combine_actions};
use crate::class::ClassId;
use crate::error::{DispatchError, DispatchResult};
use crate::implication::implies;
use crate::ruleset::{ActionDef, RuleListener};
use crate::signature::TupleSig;
use crate::value::Value;

/// Cache key: the classes of the actual arguments, leftmost first.
pub type ClassTuple = Vec<ClassId>;

#[derive(Default)]
struct EngineState {
    /// Signature → combined action, in signature-insertion order.
    registry: Vec<(Value, Action)>,
    /// Bootstrap seed the live cache is reset to on regeneration.
    static_cache: HashMap<ClassTuple, Action>,
    /// Mirror of the rule set's definitions, insertion-ordered, for replay.
    defs: Vec<ActionDef>,
}

/// Dispatching engine for one generic function.
pub struct TypeEngine {
    name: Arc<str>,
    arity: usize,
    state: RwLock<EngineState>,
    cache: DashMap<ClassTuple, Action>,
}

impl TypeEngine {
    /// Fresh engine with an empty registry and caches.
    pub fn new(name: Arc<str>, arity: usize) -> Self {
        TypeEngine {
            name,
            arity,
            state: RwLock::new(EngineState::default()),
            cache: DashMap::new(),
        }
    }

    /// The generic function's name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared number of arguments.
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Number of registered signatures.
    pub fn registry_len(&self) -> usize {
        self.state.read().registry.len()
    }

    /// Number of memoized argument-class tuples.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn default_action(&self) -> Action {
        Action::no_applicable(self.name.clone())
    }

    /// Register an action at a signature, combining new-first if occupied.
    pub fn add_method(&self, signature: Value, action: Action) -> DispatchResult<()> {
        {
            let mut state = self.state.write();
            Self::add_method_locked(&mut state, signature, action)?;
        }
        self.changed();
        Ok(())
    }

    fn add_method_locked(
        state: &mut EngineState,
        signature: Value,
        action: Action,
    ) -> DispatchResult<()> {
        if let Some(slot) = state.registry.iter_mut().find(|(sig, _)| *sig == signature) {
            // New rules at an occupied signature take precedence where the
            // algebra permits.
            let combined = combine_actions(Some(&action), Some(&slot.1))?;
            if let Some(combined) = combined {
                slot.1 = combined;
            }
            return Ok(());
        }
        state.registry.push((signature, action));
        Ok(())
    }

    /// Rebuild the registry from the mirrored definitions, then reset the
    /// live cache to the static seed.
    pub fn full_reset(&self) -> DispatchResult<()> {
        {
            let mut state = self.state.write();
            state.registry.clear();
            let defs = state.defs.clone();
            for def in defs {
                Self::add_method_locked(
                    &mut state,
                    def.signature.clone(),
                    Action::from_parts(def.kind, def.body, def.signature, def.sequence),
                )?;
            }
        }
        debug!(function = %self.name, "full reset");
        self.regenerate();
        Ok(())
    }

    /// Reset the live cache if dispatches have diverged it from the seed.
    fn changed(&self) {
        let diverged = self.cache.len() != self.state.read().static_cache.len();
        if diverged {
            self.regenerate();
        }
    }

    fn regenerate(&self) {
        let state = self.state.read();
        self.cache.clear();
        for (key, action) in &state.static_cache {
            self.cache.insert(key.clone(), action.clone());
        }
        trace!(function = %self.name, seeded = state.static_cache.len(), "cache regenerated");
    }

    /// Snapshot the current registry as the static cache seed.
    ///
    /// Only tuple signatures participate: their class sequences are exactly
    /// the cache's key space. Used once, after the implication kernel's own
    /// rules are installed, to break the bootstrap recursion.
    pub fn snapshot_static(&self) {
        {
            let mut state = self.state.write();
            state.static_cache = state
                .registry
                .iter()
                .filter_map(|(sig, action)| {
                    sig.downcast_ref::<TupleSig>()
                        .map(|t| (t.classes().to_vec(), action.clone()))
                })
                .collect();
        }
        self.regenerate();
    }

    /// Dispatch a call: class-tuple lookup, folding the registry on a miss.
    pub fn dispatch(&self, args: &[Value]) -> DispatchResult<Value> {
        if args.len() != self.arity {
            return Err(DispatchError::WrongArity {
                function: self.name.to_string(),
                expected: self.arity,
                actual: args.len(),
            });
        }

        let key: ClassTuple = args.iter().map(Value::class).collect();
        if let Some(entry) = self.cache.get(&key) {
            let action = entry.value().clone();
            drop(entry);
            return action.call(args);
        }

        let action = self.fold(&key)?;
        self.cache.insert(key, action.clone());
        action.call(args)
    }

    /// Fold every registry entry the argument classes imply, most recently
    /// combined last, seeded with the default action.
    fn fold(&self, key: &ClassTuple) -> DispatchResult<Action> {
        // Snapshot so no lock is held while `implies` or `combine` run; the
        // kernel may re-enter this very engine.
        let registry: Vec<(Value, Action)> = self.state.read().registry.clone();
        let key_sig = Value::new(TupleSig::of(key.clone()));

        let mut folded: Option<Action> = Some(self.default_action());
        for (sig, action) in &registry {
            if key_sig == *sig || implies(&key_sig, sig) {
                folded = combine_actions(folded.as_ref(), Some(action))?;
            }
        }
        let action = folded.unwrap_or_else(|| self.default_action());
        trace!(function = %self.name, key = ?key, action = %action.describe(), "cache miss folded");
        Ok(action)
    }
}

impl RuleListener for TypeEngine {
    fn actions_changed(&self, added: &[ActionDef], removed: &[ActionDef]) -> DispatchResult<()> {
        if !removed.is_empty() {
            {
                let mut state = self.state.write();
                state.defs.extend(added.iter().cloned());
                let gone: std::collections::HashSet<u64> =
                    removed.iter().map(|d| d.sequence).collect();
                state.defs.retain(|d| !gone.contains(&d.sequence));
            }
            return self.full_reset();
        }

        {
            let mut state = self.state.write();
            for def in added {
                state.defs.push(def.clone());
                Self::add_method_locked(
                    &mut state,
                    def.signature.clone(),
                    Action::from_parts(def.kind, def.body.clone(), def.signature.clone(), def.sequence),
                )?;
            }
        }
        self.changed();
        Ok(())
    }
}

impl fmt::Debug for TypeEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("TypeEngine")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("registry", &state.registry.len())
            .field("static_cache", &state.static_cache.len())
            .field("cache", &self.cache.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Trampoline seam
// ---------------------------------------------------------------------------

/// The callable installed as a generic function's entry point.
pub type Trampoline = Arc<dyn Fn(&[Value]) -> DispatchResult<Value> + Send + Sync>;

/// What a code-generation backend needs to emit a trampoline: the function's
/// shape plus access to the engine's cache lookup and miss handler.
#[derive(Debug, Clone)]
pub struct TrampolineSpec {
    pub name: Arc<str>,
    pub arity: usize,
    /// Parameter names, for backends that emit real signatures.
    pub params: Vec<String>,
}

impl TrampolineSpec {
    /// Spec with synthesized parameter names `arg0..argN`.
    pub fn new(name: Arc<str>, arity: usize) -> Self {
        TrampolineSpec {
            name,
            arity,
            params: (0..arity).map(|i| format!("arg{i}")).collect(),
        }
    }
}

/// Builds the dispatch trampoline for an engine.
///
/// The shipped [`Interpreted`] backend performs the class-tuple lookup
/// directly; a compiling backend would emit equivalent code. The engine makes
/// no further assumption about the backend.
pub trait TrampolineBackend {
    fn build(&self, spec: &TrampolineSpec, engine: Arc<TypeEngine>) -> Trampoline;
}

/// Pure-interpreter trampoline: extract the argument classes, look the tuple
/// up in the cache, fold on a miss.
#[derive(Debug, Default, Clone, Copy)]
pub struct Interpreted;

impl TrampolineBackend for Interpreted {
    fn build(&self, _spec: &TrampolineSpec, engine: Arc<TypeEngine>) -> Trampoline {
        Arc::new(move |args| engine.dispatch(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{Body, MethodKind};
    use crate::args;
    use crate::class::class_of;
    use crate::sig;

    fn engine(name: &str, arity: usize) -> TypeEngine {
        TypeEngine::new(Arc::from(name), arity)
    }

    fn primary(ret: &'static str, seq: u64, sig: &Value) -> Action {
        Action::from_parts(
            MethodKind::Primary,
            Body::plain(move |_| Ok(Value::new(ret))),
            sig.clone(),
            seq,
        )
    }

    #[test]
    fn empty_engine_raises_no_applicable() {
        let eng = engine("empty", 1);
        let err = eng.dispatch(&args![1_i64]).unwrap_err();
        assert!(matches!(err, DispatchError::NoApplicableMethods { .. }));
    }

    #[test]
    fn wrong_arity_is_rejected() {
        let eng = engine("binary", 2);
        let err = eng.dispatch(&args![1_i64]).unwrap_err();
        assert!(matches!(err, DispatchError::WrongArity { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn dispatch_hits_cache_on_second_call() {
        let eng = engine("cached", 1);
        let s = sig![i64];
        eng.add_method(s.clone(), primary("hit", 0, &s)).unwrap();

        assert_eq!(eng.cache_len(), 0);
        let out = eng.dispatch(&args![1_i64]).unwrap();
        assert_eq!(out.downcast_ref::<&str>(), Some(&"hit"));
        assert_eq!(eng.cache_len(), 1);

        // Second call takes the memoized entry.
        let out = eng.dispatch(&args![2_i64]).unwrap();
        assert_eq!(out.downcast_ref::<&str>(), Some(&"hit"));
        assert_eq!(eng.cache_len(), 1);
    }

    #[test]
    fn cached_entry_matches_fold_result() {
        let eng = engine("consistent", 1);
        let s = sig![i64];
        eng.add_method(s.clone(), primary("a", 0, &s)).unwrap();
        eng.dispatch(&args![1_i64]).unwrap();

        let key: ClassTuple = vec![class_of::<i64>()];
        let folded = eng.fold(&key).unwrap();
        let cached = eng.cache.get(&key).map(|e| e.value().describe());
        assert_eq!(cached, Some(folded.describe()));
    }

    #[test]
    fn addition_after_dispatch_resets_cache() {
        let eng = engine("reset", 1);
        let any = sig![];
        eng.add_method(any.clone(), primary("any", 0, &any)).unwrap();

        let out = eng.dispatch(&args![1_i64]).unwrap();
        assert_eq!(out.downcast_ref::<&str>(), Some(&"any"));
        assert_eq!(eng.cache_len(), 1);

        // A more specific addition invalidates the stale memo.
        let s = sig![i64];
        eng.add_method(s.clone(), primary("specific", 1, &s)).unwrap();
        assert_eq!(eng.cache_len(), 0);
        let out = eng.dispatch(&args![1_i64]).unwrap();
        assert_eq!(out.downcast_ref::<&str>(), Some(&"specific"));
    }

    #[test]
    fn same_signature_addition_combines_new_first() {
        let eng = engine("combine", 1);
        let s = sig![i64];
        eng.add_method(s.clone(), primary("old", 0, &s)).unwrap();
        eng.add_method(s.clone(), primary("new", 1, &s)).unwrap();
        assert_eq!(eng.registry_len(), 1);

        // Same kind, same signature: mutual implication, so they merge into
        // an ambiguity rather than silently replacing.
        let err = eng.dispatch(&args![1_i64]).unwrap_err();
        assert!(matches!(err, DispatchError::AmbiguousMethods { .. }));
    }

    #[test]
    fn snapshot_seeds_cache_with_tuple_signatures() {
        let eng = engine("seeded", 1);
        let s = sig![i64];
        eng.add_method(s.clone(), primary("seeded", 0, &s)).unwrap();
        eng.snapshot_static();
        // The seed is present without any dispatch having happened.
        assert_eq!(eng.cache_len(), 1);
        let out = eng.dispatch(&args![7_i64]).unwrap();
        assert_eq!(out.downcast_ref::<&str>(), Some(&"seeded"));
    }

    #[test]
    fn full_reset_replays_mirrored_defs() {
        let eng = engine("replay", 1);
        let defs = vec![
            ActionDef {
                kind: MethodKind::Primary,
                body: Body::plain(|_| Ok(Value::new("base"))),
                signature: sig![],
                sequence: 0,
            },
            ActionDef {
                kind: MethodKind::Primary,
                body: Body::plain(|_| Ok(Value::new("int"))),
                signature: sig![i64],
                sequence: 1,
            },
        ];
        eng.actions_changed(&defs, &[]).unwrap();
        let registered = eng.registry_len();
        eng.dispatch(&args![1_i64]).unwrap();

        eng.full_reset().unwrap();
        assert_eq!(eng.registry_len(), registered);
        assert_eq!(eng.cache_len(), 0);
        let out = eng.dispatch(&args![1_i64]).unwrap();
        assert_eq!(out.downcast_ref::<&str>(), Some(&"int"));
    }

    #[test]
    fn interpreted_backend_builds_working_trampoline() {
        let eng = Arc::new(engine("tramp", 1));
        let s = sig![i64];
        eng.add_method(s.clone(), primary("via-trampoline", 0, &s))
            .unwrap();

        let spec = TrampolineSpec::new(Arc::from("tramp"), 1);
        assert_eq!(spec.params, vec!["arg0"]);
        let trampoline = Interpreted.build(&spec, eng);
        let out = trampoline(&args![3_i64]).unwrap();
        assert_eq!(out.downcast_ref::<&str>(), Some(&"via-trampoline"));
    }
}
