//! The cacheable registry: serialization adapters keyed by output type.
//!
//! A node's output is cached only if an adapter is registered for its exact
//! type. Outputs that are trait objects are registered under the trait
//! object type they are produced as (for example `Arc<dyn Image>`).

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use cairn_cache::Cache;
use cairn_common::Digest;

use crate::adapters::{ByteStreamCacheable, BytesCacheable};
use crate::result::AnyValue;

/// Digest, store and load logic for one output type.
pub trait Cacheable: Send + Sync + 'static {
    /// The output type this adapter handles.
    type Value: Send + Sync + 'static;

    /// Computes the content digest of a value without storing it.
    fn compute_digest(&self, value: &Self::Value) -> anyhow::Result<Digest>;

    /// Reconstructs a value from the cache.
    fn load_cached(&self, cache: &Arc<dyn Cache>, digest: &Digest) -> anyhow::Result<Self::Value>;

    /// Stores a value in the cache and returns its digest.
    fn cache(&self, cache: &dyn Cache, value: &Self::Value) -> anyhow::Result<Digest>;
}

/// A [`Cacheable`] with its value type erased.
pub(crate) trait ErasedCacheable: Send + Sync {
    fn compute_digest(&self, value: &AnyValue) -> anyhow::Result<Digest>;
    fn load_cached(&self, cache: &Arc<dyn Cache>, digest: &Digest) -> anyhow::Result<AnyValue>;
    fn cache(&self, cache: &dyn Cache, value: &AnyValue) -> anyhow::Result<Digest>;
}

struct Typed<A> {
    adapter: A,
}

impl<A: Cacheable> Typed<A> {
    fn value<'v>(&self, value: &'v AnyValue) -> anyhow::Result<&'v A::Value> {
        (**value)
            .downcast_ref::<A::Value>()
            .ok_or_else(|| anyhow!("value is not a {}", type_name::<A::Value>()))
    }
}

impl<A: Cacheable> ErasedCacheable for Typed<A> {
    fn compute_digest(&self, value: &AnyValue) -> anyhow::Result<Digest> {
        self.adapter.compute_digest(self.value(value)?)
    }

    fn load_cached(&self, cache: &Arc<dyn Cache>, digest: &Digest) -> anyhow::Result<AnyValue> {
        let value: AnyValue = Arc::new(self.adapter.load_cached(cache, digest)?);
        Ok(value)
    }

    fn cache(&self, cache: &dyn Cache, value: &AnyValue) -> anyhow::Result<Digest> {
        self.adapter.cache(cache, self.value(value)?)
    }
}

#[derive(Clone)]
pub(crate) struct Registered {
    pub(crate) type_name: &'static str,
    pub(crate) adapter: Arc<dyn ErasedCacheable>,
}

/// Collects adapters before the registry is frozen.
#[derive(Default)]
pub struct RegistryBuilder {
    adapters: HashMap<TypeId, Registered>,
}

impl RegistryBuilder {
    /// Creates a builder with no adapters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder with the byte and byte-stream adapters.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(BytesCacheable)
            .register(ByteStreamCacheable)
    }

    /// Registers an adapter for `A::Value`.
    ///
    /// # Panics
    ///
    /// If an adapter for the same type was already registered.
    pub fn register<A: Cacheable>(mut self, adapter: A) -> Self {
        let type_id = TypeId::of::<A::Value>();
        let type_name = type_name::<A::Value>();
        if self.adapters.contains_key(&type_id) {
            panic!("cacheable adapter for {type_name} registered twice");
        }
        self.adapters.insert(
            type_id,
            Registered {
                type_name,
                adapter: Arc::new(Typed { adapter }),
            },
        );
        self
    }

    /// Freezes the registry.
    pub fn build(self) -> CacheableRegistry {
        CacheableRegistry {
            adapters: self.adapters,
        }
    }
}

/// An immutable map from output type to cacheable adapter.
pub struct CacheableRegistry {
    adapters: HashMap<TypeId, Registered>,
}

impl CacheableRegistry {
    /// Starts building a registry.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// A registry with no adapters: nothing is cached.
    pub fn empty() -> Self {
        RegistryBuilder::new().build()
    }

    /// A registry with only the built-in byte and byte-stream adapters.
    pub fn with_defaults() -> Self {
        RegistryBuilder::with_defaults().build()
    }

    /// Returns `true` if an adapter for `V` is registered.
    pub fn contains<V: 'static>(&self) -> bool {
        self.adapters.contains_key(&TypeId::of::<V>())
    }

    /// Number of registered adapters.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Returns `true` if no adapters are registered.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    pub(crate) fn lookup(&self, type_id: TypeId) -> Option<&Registered> {
        self.adapters.get(&type_id)
    }
}

impl fmt::Debug for CacheableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.adapters.values().map(|r| r.type_name).collect();
        names.sort_unstable();
        f.debug_struct("CacheableRegistry")
            .field("types", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ByteStream, SerdeCacheable};
    use bytes::Bytes;

    #[test]
    fn defaults_cover_bytes() {
        let registry = CacheableRegistry::with_defaults();
        assert!(registry.contains::<Bytes>());
        assert!(registry.contains::<ByteStream>());
        assert!(!registry.contains::<String>());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn lookup_is_by_exact_type() {
        let registry = CacheableRegistry::builder()
            .register(SerdeCacheable::<Vec<String>>::new())
            .build();
        assert!(registry.lookup(TypeId::of::<Vec<String>>()).is_some());
        assert!(registry.lookup(TypeId::of::<Vec<u8>>()).is_none());
    }

    #[test]
    fn erased_digest_checks_the_type() {
        let registry = CacheableRegistry::with_defaults();
        let entry = registry.lookup(TypeId::of::<Bytes>()).unwrap();
        let good: AnyValue = Arc::new(Bytes::from_static(b"abc"));
        assert_eq!(
            entry.adapter.compute_digest(&good).unwrap(),
            Digest::of_bytes(b"abc")
        );
        let bad: AnyValue = Arc::new(3u32);
        assert!(entry.adapter.compute_digest(&bad).is_err());
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let _ = RegistryBuilder::with_defaults().register(BytesCacheable);
    }

    #[test]
    fn empty_registry() {
        let registry = CacheableRegistry::empty();
        assert!(registry.is_empty());
        assert_eq!(
            format!("{registry:?}"),
            "CacheableRegistry { types: [] }"
        );
    }
}
