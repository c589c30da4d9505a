//! Class model: interned classes with a declared subtype hierarchy.
//!
//! Rust has no runtime subclassing, so the dispatcher keeps its own view:
//! every `'static` type is interned to a [`ClassId`] on first contact, and
//! subtype edges are declared explicitly with [`derives`]. [`is_subclass`] is
//! the reflexive-transitive closure over those edges, with the distinguished
//! [`Object`] root as a supertype of everything.
//!
//! Lookups in both directions are O(1) via two `DashMap`s; the hierarchy walk
//! is a plain BFS.

use std::any::TypeId;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;

/// Universal root class: every class is a subclass of `Object`.
///
/// Usable as an element in `sig![..]` to mean "any argument here".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Object;

/// Unique, niche-optimized identifier for an interned class.
///
/// `NonZeroU32` so that `Option<ClassId>` costs no extra space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ClassId(NonZeroU32);

impl ClassId {
    /// Get the underlying `u32` value.
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Human-readable class name (the Rust type name it was interned from).
    pub fn name(self) -> &'static str {
        REGISTRY.name_of(self)
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class:{}", self.name())
    }
}

struct ClassRegistry {
    /// Forward map: TypeId → ClassId (source of truth for interning).
    by_type: DashMap<TypeId, ClassId>,
    /// ClassId → type name.
    names: DashMap<ClassId, &'static str>,
    /// Declared direct supertype edges.
    parents: DashMap<ClassId, Vec<ClassId>>,
    next: AtomicU32,
}

static REGISTRY: Lazy<ClassRegistry> = Lazy::new(|| {
    let reg = ClassRegistry {
        by_type: DashMap::new(),
        names: DashMap::new(),
        parents: DashMap::new(),
        next: AtomicU32::new(1),
    };
    // The root is always class 1.
    reg.ensure(TypeId::of::<Object>(), "Object");
    reg
});

impl ClassRegistry {
    fn ensure(&self, tid: TypeId, name: &'static str) -> ClassId {
        *self.by_type.entry(tid).or_insert_with(|| {
            let raw = self.next.fetch_add(1, Ordering::Relaxed);
            let id = ClassId(
                NonZeroU32::new(raw).unwrap_or_else(|| unreachable!("class ids start at 1")),
            );
            self.names.insert(id, name);
            id
        })
    }

    fn name_of(&self, id: ClassId) -> &'static str {
        self.names.get(&id).map_or("<unregistered>", |r| *r.value())
    }

    fn object(&self) -> ClassId {
        // Interned at registry construction; the entry always exists.
        self.ensure(TypeId::of::<Object>(), "Object")
    }

    fn add_parent(&self, sub: ClassId, sup: ClassId) {
        let mut entry = self.parents.entry(sub).or_default();
        if !entry.contains(&sup) {
            entry.push(sup);
        }
    }

    /// Reflexive-transitive subclass check: BFS over declared parent edges.
    fn is_subclass(&self, sub: ClassId, sup: ClassId) -> bool {
        if sub == sup || sup == self.object() {
            return true;
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(sub);
        visited.insert(sub);

        while let Some(current) = queue.pop_front() {
            if let Some(parents) = self.parents.get(&current) {
                for &p in parents.value() {
                    if p == sup {
                        return true;
                    }
                    if visited.insert(p) {
                        queue.push_back(p);
                    }
                }
            }
        }
        false
    }
}

/// Intern (or look up) the class of a Rust type.
pub fn class_of<T: 'static>() -> ClassId {
    REGISTRY.ensure(TypeId::of::<T>(), std::any::type_name::<T>())
}

/// Intern by raw `TypeId` + name; used by `Value::class`.
pub(crate) fn class_of_raw(tid: TypeId, name: &'static str) -> ClassId {
    REGISTRY.ensure(tid, name)
}

/// The universal root class.
pub fn object() -> ClassId {
    REGISTRY.object()
}

/// Declare that `Sub` is a subclass of `Sup`.
///
/// Idempotent; edges accumulate into a DAG (cycles are not checked, a cyclic
/// declaration simply makes the members mutually substitutable).
pub fn derives<Sub: 'static, Sup: 'static>() {
    let sub = class_of::<Sub>();
    let sup = class_of::<Sup>();
    REGISTRY.add_parent(sub, sup);
}

/// Is `sub` the same class as, or a declared transitive subclass of, `sup`?
pub fn is_subclass(sub: ClassId, sup: ClassId) -> bool {
    REGISTRY.is_subclass(sub, sup)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Animal;
    struct Mammal;
    struct Dog;
    struct Rock;

    fn hierarchy() -> (ClassId, ClassId, ClassId, ClassId) {
        derives::<Dog, Mammal>();
        derives::<Mammal, Animal>();
        (
            class_of::<Dog>(),
            class_of::<Mammal>(),
            class_of::<Animal>(),
            class_of::<Rock>(),
        )
    }

    #[test]
    fn class_id_niche_optimization() {
        assert_eq!(
            std::mem::size_of::<Option<ClassId>>(),
            std::mem::size_of::<ClassId>()
        );
    }

    #[test]
    fn interning_is_stable() {
        assert_eq!(class_of::<Dog>(), class_of::<Dog>());
        assert_ne!(class_of::<Dog>(), class_of::<Rock>());
    }

    #[test]
    fn subclass_is_reflexive() {
        let (dog, ..) = hierarchy();
        assert!(is_subclass(dog, dog));
    }

    #[test]
    fn subclass_is_transitive() {
        let (dog, mammal, animal, _) = hierarchy();
        assert!(is_subclass(dog, mammal));
        assert!(is_subclass(dog, animal));
        assert!(!is_subclass(animal, dog));
    }

    #[test]
    fn unrelated_classes_do_not_subclass() {
        let (dog, _, _, rock) = hierarchy();
        assert!(!is_subclass(dog, rock));
        assert!(!is_subclass(rock, dog));
    }

    #[test]
    fn everything_is_an_object() {
        let (dog, _, _, rock) = hierarchy();
        assert!(is_subclass(dog, object()));
        assert!(is_subclass(rock, object()));
        assert!(is_subclass(object(), object()));
    }

    #[test]
    fn display_uses_type_name() {
        let dog = class_of::<Dog>();
        assert!(dog.to_string().contains("Dog"));
    }
}
