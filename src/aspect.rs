//! Aspect store: side state attached to generic functions by identity.
//!
//! A process-wide map from `(aspect type, owner id)` to the attached
//! instance. First access constructs the instance under the store's shard
//! lock, so concurrent initializers race safely: the first writer wins and
//! the loser's instance is discarded. Entries live with their owners; there
//! is no eviction.

use std::any::{Any, TypeId};
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::trace;

use crate::engine::{Trampoline, TrampolineBackend, TrampolineSpec, TypeEngine};
use crate::ruleset::{RuleListener, RuleSet};

/// Identity of an aspect owner (a generic function).
///
/// `NonZeroU64` for the usual niche optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct OwnerId(NonZeroU64);

impl OwnerId {
    /// Get the underlying `u64` value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fn:{}", self.0)
    }
}

/// Thread-safe owner-id allocator; ids start at 1 and are never reused.
#[derive(Debug)]
pub struct OwnerIdAllocator {
    next: AtomicU64,
}

impl OwnerIdAllocator {
    pub fn new() -> Self {
        OwnerIdAllocator {
            next: AtomicU64::new(1),
        }
    }

    /// Allocate the next owner id.
    pub fn next_id(&self) -> OwnerId {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        OwnerId(NonZeroU64::new(raw).unwrap_or_else(|| unreachable!("owner ids start at 1")))
    }
}

impl Default for OwnerIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide attachment map.
pub struct AspectStore {
    map: DashMap<(TypeId, OwnerId), Arc<dyn Any + Send + Sync>>,
}

static STORE: Lazy<AspectStore> = Lazy::new(|| AspectStore {
    map: DashMap::new(),
});

impl AspectStore {
    /// The global store.
    pub fn global() -> &'static AspectStore {
        &STORE
    }

    /// Get the aspect of type `A` for `owner`, constructing it on first
    /// access. Construction happens at most once per key (first writer wins).
    pub fn of<A, F>(&self, owner: OwnerId, init: F) -> Arc<A>
    where
        A: Any + Send + Sync,
        F: FnOnce() -> A,
    {
        let key = (TypeId::of::<A>(), owner);
        let entry = self
            .map
            .entry(key)
            .or_insert_with(|| {
                trace!(owner = %owner, aspect = std::any::type_name::<A>(), "aspect initialized");
                Arc::new(init())
            })
            .clone();
        entry
            .downcast::<A>()
            .unwrap_or_else(|_| unreachable!("aspect map keyed by TypeId"))
    }

    /// Does an aspect of type `A` exist for `owner`?
    pub fn exists_for<A: Any>(&self, owner: OwnerId) -> bool {
        self.map.contains_key(&(TypeId::of::<A>(), owner))
    }

    /// Ensure no aspect of type `A` exists for `owner`.
    pub fn delete<A: Any>(&self, owner: OwnerId) {
        self.map.remove(&(TypeId::of::<A>(), owner));
    }
}

impl fmt::Debug for AspectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectStore")
            .field("entries", &self.map.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// The dispatching aspect
// ---------------------------------------------------------------------------

/// The dispatching state of one generic function: its rule set, engine, and
/// the trampoline built for it. The preserved original body lives in the
/// function handle and is seeded as the default rule by `rules_for`.
pub struct Dispatching {
    pub rules: RwLock<RuleSet>,
    pub engine: Arc<TypeEngine>,
    pub trampoline: Trampoline,
}

impl Dispatching {
    /// Wire up rule set, engine, and trampoline for a function.
    pub fn new(name: Arc<str>, arity: usize, backend: &dyn TrampolineBackend) -> Self {
        let engine = Arc::new(TypeEngine::new(name.clone(), arity));
        let mut rules = RuleSet::new();
        // The rule set is empty here, so subscription cannot fail.
        let _ = rules.subscribe(engine.clone() as Arc<dyn RuleListener>);
        let spec = TrampolineSpec::new(name, arity);
        let trampoline = backend.build(&spec, engine.clone());
        Dispatching {
            rules: RwLock::new(rules),
            engine,
            trampoline,
        }
    }
}

impl fmt::Debug for Dispatching {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatching")
            .field("rules", &self.rules.read().len())
            .field("engine", &self.engine)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static ALLOC: Lazy<OwnerIdAllocator> = Lazy::new(OwnerIdAllocator::new);

    struct Counter(u64);

    #[test]
    fn allocator_is_monotonic() {
        let a = ALLOC.next_id();
        let b = ALLOC.next_id();
        assert!(a < b);
        assert!(a.get() >= 1);
    }

    #[test]
    fn first_writer_wins() {
        let owner = ALLOC.next_id();
        let store = AspectStore::global();
        let first = store.of::<Counter, _>(owner, || Counter(1));
        let second = store.of::<Counter, _>(owner, || Counter(2));
        assert_eq!(first.0, 1);
        assert_eq!(second.0, 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn exists_and_delete() {
        let owner = ALLOC.next_id();
        let store = AspectStore::global();
        assert!(!store.exists_for::<Counter>(owner));
        store.of::<Counter, _>(owner, || Counter(7));
        assert!(store.exists_for::<Counter>(owner));
        store.delete::<Counter>(owner);
        assert!(!store.exists_for::<Counter>(owner));
        // Deleting again is a no-op.
        store.delete::<Counter>(owner);
    }

    #[test]
    fn aspects_are_keyed_by_type_and_owner() {
        struct Other(u64);
        let owner = ALLOC.next_id();
        let other_owner = ALLOC.next_id();
        let store = AspectStore::global();
        store.of::<Counter, _>(owner, || Counter(1));
        store.of::<Other, _>(owner, || Other(2));
        assert!(store.exists_for::<Counter>(owner));
        assert!(store.exists_for::<Other>(owner));
        assert!(!store.exists_for::<Counter>(other_owner));
    }
}
