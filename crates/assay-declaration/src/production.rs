//! Typed productions offered by conductors
//!
//! Provides the three production variants:
//! - [`Preparation`] - a condition held while dependents run
//! - [`Observation`] - a result, optionally multi-valued
//! - [`Provision`] - a resource sourced from the environment
//!
//! Productions are identity-distinct. Two productions declared with the same
//! id are different productions; clones share the identity of the original.
//! [`IdentityMap`] indexes values by that identity.

use serde::{Deserialize, Serialize};
use std::any::TypeId;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_IDENTITY: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a declared production
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity(u64);

impl Identity {
    fn next() -> Self {
        Self(NEXT_IDENTITY.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw identity value
    #[inline]
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How dependents of a condition share it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluation {
    /// Dependents run one at a time, in sibling order
    Ordered,
    /// Dependents run one at a time, in any order
    #[default]
    Unordered,
    /// Dependents may run concurrently
    Parallel,
}

impl Evaluation {
    /// Check if dependents must not overlap
    #[inline]
    #[must_use]
    pub fn is_serialized(self) -> bool {
        !matches!(self, Self::Parallel)
    }
}

/// Variant of a production
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProductionKind {
    /// Condition with its evaluation mode
    Preparation(Evaluation),
    /// Result, possibly observed more than once
    Observation { multiple: bool },
    /// Environment resource
    Provision,
}

/// Type-erased production
///
/// Equality and hashing use the production's [`Identity`] only.
#[derive(Clone)]
pub struct AnyProduction {
    id: String,
    identity: Identity,
    kind: ProductionKind,
    type_id: TypeId,
    type_name: &'static str,
}

impl AnyProduction {
    fn define<T: 'static>(id: impl Into<String>, kind: ProductionKind) -> Self {
        Self {
            id: id.into(),
            identity: Identity::next(),
            kind,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Declared id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Identity
    #[inline]
    #[must_use]
    pub fn identity(&self) -> Identity {
        self.identity
    }

    /// Variant
    #[inline]
    #[must_use]
    pub fn kind(&self) -> ProductionKind {
        self.kind
    }

    /// Type of the produced value
    #[inline]
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Name of the produced value type
    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Evaluation mode if this is a condition
    #[must_use]
    pub fn evaluation(&self) -> Option<Evaluation> {
        match self.kind {
            ProductionKind::Preparation(evaluation) => Some(evaluation),
            _ => None,
        }
    }

    /// Check if this is a condition
    #[inline]
    #[must_use]
    pub fn is_condition(&self) -> bool {
        matches!(self.kind, ProductionKind::Preparation(_))
    }

    /// Check if this is a result
    #[inline]
    #[must_use]
    pub fn is_result(&self) -> bool {
        matches!(self.kind, ProductionKind::Observation { .. })
    }

    /// Check if this is an environment resource
    #[inline]
    #[must_use]
    pub fn is_resource(&self) -> bool {
        matches!(self.kind, ProductionKind::Provision)
    }
}

impl PartialEq for AnyProduction {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for AnyProduction {}

impl Hash for AnyProduction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl fmt::Debug for AnyProduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyProduction")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("kind", &self.kind)
            .field("type", &self.type_name)
            .finish()
    }
}

impl fmt::Display for AnyProduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.id, self.type_name)
    }
}

/// Common view over typed and erased productions
pub trait Production {
    /// Erased form of this production
    fn erased(&self) -> &AnyProduction;

    /// Declared id
    fn id(&self) -> &str {
        self.erased().id()
    }

    /// Identity
    fn identity(&self) -> Identity {
        self.erased().identity()
    }
}

impl Production for AnyProduction {
    fn erased(&self) -> &AnyProduction {
        self
    }
}

macro_rules! typed_production {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        pub struct $name<T> {
            inner: AnyProduction,
            _type: PhantomData<fn() -> T>,
        }

        impl<T> Production for $name<T> {
            fn erased(&self) -> &AnyProduction {
                &self.inner
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                Self {
                    inner: self.inner.clone(),
                    _type: PhantomData,
                }
            }
        }

        impl<T> PartialEq for $name<T> {
            fn eq(&self, other: &Self) -> bool {
                self.inner == other.inner
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> Hash for $name<T> {
            fn hash<H: Hasher>(&self, state: &mut H) {
                self.inner.hash(state);
            }
        }

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.inner).finish()
            }
        }

        impl<T> From<$name<T>> for AnyProduction {
            fn from(production: $name<T>) -> Self {
                production.inner
            }
        }
    };
}

typed_production!(
    /// Condition prepared by a conductor and held while its dependents run
    Preparation
);

typed_production!(
    /// Result observed by a conductor
    Observation
);

typed_production!(
    /// Resource provided by the environment
    Provision
);

impl<T: 'static> Preparation<T> {
    /// Declare a new condition
    #[must_use]
    pub fn define(id: impl Into<String>, evaluation: Evaluation) -> Self {
        Self {
            inner: AnyProduction::define::<T>(id, ProductionKind::Preparation(evaluation)),
            _type: PhantomData,
        }
    }
}

impl<T> Preparation<T> {
    /// Evaluation mode
    #[must_use]
    pub fn evaluation(&self) -> Evaluation {
        self.inner.evaluation().unwrap_or_default()
    }
}

impl<T: 'static> Observation<T> {
    /// Declare a new single-valued result
    #[must_use]
    pub fn define(id: impl Into<String>) -> Self {
        Self {
            inner: AnyProduction::define::<T>(id, ProductionKind::Observation { multiple: false }),
            _type: PhantomData,
        }
    }

    /// Declare a new multi-valued result
    #[must_use]
    pub fn define_multiple(id: impl Into<String>) -> Self {
        Self {
            inner: AnyProduction::define::<T>(id, ProductionKind::Observation { multiple: true }),
            _type: PhantomData,
        }
    }
}

impl<T> Observation<T> {
    /// Check if the result may be observed more than once
    #[must_use]
    pub fn is_multiple(&self) -> bool {
        matches!(
            self.inner.kind(),
            ProductionKind::Observation { multiple: true }
        )
    }
}

impl<T: 'static> Provision<T> {
    /// Declare a new environment resource
    #[must_use]
    pub fn define(id: impl Into<String>) -> Self {
        Self {
            inner: AnyProduction::define::<T>(id, ProductionKind::Provision),
            _type: PhantomData,
        }
    }
}

/// Map keyed by production identity
///
/// Productions sharing an id but not an identity occupy separate entries.
#[derive(Debug, Clone)]
pub struct IdentityMap<V> {
    entries: BTreeMap<Identity, (AnyProduction, V)>,
}

impl<V> Default for IdentityMap<V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<V> IdentityMap<V> {
    /// Create empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert value, returning the previous value for the same identity
    pub fn insert(&mut self, production: &impl Production, value: V) -> Option<V> {
        let production = production.erased();
        self.entries
            .insert(production.identity(), (production.clone(), value))
            .map(|(_, previous)| previous)
    }

    /// Get value for a production
    #[must_use]
    pub fn get(&self, production: &impl Production) -> Option<&V> {
        self.entries
            .get(&production.identity())
            .map(|(_, value)| value)
    }

    /// Get mutable value for a production
    pub fn get_mut(&mut self, production: &impl Production) -> Option<&mut V> {
        self.entries
            .get_mut(&production.identity())
            .map(|(_, value)| value)
    }

    /// Check if production has an entry
    #[must_use]
    pub fn contains(&self, production: &impl Production) -> bool {
        self.entries.contains_key(&production.identity())
    }

    /// Remove entry for a production
    pub fn remove(&mut self, production: &impl Production) -> Option<V> {
        self.entries
            .remove(&production.identity())
            .map(|(_, value)| value)
    }

    /// Number of entries
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in identity order
    pub fn iter(&self) -> impl Iterator<Item = (&AnyProduction, &V)> {
        self.entries.values().map(|(production, value)| (production, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_id_distinct_identity() {
        let a = Observation::<f64>::define("mass");
        let b = Observation::<f64>::define("mass");

        assert_eq!(a.id(), b.id());
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn erased_keeps_type() {
        let provision = Provision::<String>::define("detector");
        let erased = provision.erased();

        assert!(erased.is_resource());
        assert_eq!(erased.type_id(), TypeId::of::<String>());
        assert!(erased.type_name().contains("String"));
    }

    #[test]
    fn preparation_evaluation() {
        let condition = Preparation::<()>::define("vacuum", Evaluation::Ordered);
        assert_eq!(condition.evaluation(), Evaluation::Ordered);
        assert!(condition.erased().is_condition());
        assert!(Evaluation::Unordered.is_serialized());
        assert!(!Evaluation::Parallel.is_serialized());
    }

    #[test]
    fn observation_multiplicity() {
        assert!(!Observation::<u32>::define("count").is_multiple());
        assert!(Observation::<u32>::define_multiple("counts").is_multiple());
    }

    #[test]
    fn identity_map_separates_shared_ids() {
        let a = Observation::<f64>::define("mass");
        let b = Observation::<f64>::define("mass");

        let mut map = IdentityMap::new();
        map.insert(&a, 1);
        map.insert(&b, 2);

        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&a), Some(&1));
        assert_eq!(map.get(&b), Some(&2));
        assert_eq!(map.insert(&a.clone(), 3), Some(1));
        assert_eq!(map.remove(&b), Some(2));
        assert!(!map.contains(&b));
    }

    #[test]
    fn evaluation_serde_names() {
        let json = serde_json::to_string(&Evaluation::Parallel).unwrap();
        assert_eq!(json, "\"parallel\"");
    }
}
