//! Resource Contract
//!
//! The abstract keyed cache every consumer binding is written against. A
//! resource owns its cache entries; consumers only read projections and go
//! through `load`/`mark_outdated`/`use_key`/`free` to mutate anything.

use super::error::{ResourceError, Result};
use super::includes::Includes;
use super::key::{PageInfo, ResourceId, ResourceKey};
use futures::future::{BoxFuture, Shared};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Outcome of a resource load
pub type LoadResult<V> = std::result::Result<Fetched<V>, Arc<ResourceError>>;

/// In-flight load; cloning it does not issue a second request
pub type LoadFuture<V> = Shared<BoxFuture<'static, LoadResult<V>>>;

/// Value(s) read for a key: one value for a scalar key, a sequence for
/// lists and aliases
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<V> {
    One(V),
    Many(Vec<V>),
}

impl<V> Fetched<V> {
    pub fn len(&self) -> usize {
        match self {
            Self::One(_) => 1,
            Self::Many(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The single value, or the first of a sequence
    pub fn into_one(self) -> Option<V> {
        match self {
            Self::One(value) => Some(value),
            Self::Many(values) => values.into_iter().next(),
        }
    }

    pub fn into_vec(self) -> Vec<V> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }
}

/// Failure(s) recorded by a resource: one for scalar keys and aliases,
/// one slot per id for lists
#[derive(Debug, Clone)]
pub enum ResourceException {
    One(Arc<ResourceError>),
    Many(Vec<Option<Arc<ResourceError>>>),
}

impl ResourceException {
    /// Whether `error` is one of the recorded instances (identity, not
    /// message equality)
    pub fn contains(&self, error: &Arc<ResourceError>) -> bool {
        match self {
            Self::One(recorded) => Arc::ptr_eq(recorded, error),
            Self::Many(slots) => slots
                .iter()
                .flatten()
                .any(|recorded| Arc::ptr_eq(recorded, error)),
        }
    }

    pub fn first(&self) -> Option<&Arc<ResourceError>> {
        match self {
            Self::One(error) => Some(error),
            Self::Many(slots) => slots.iter().flatten().next(),
        }
    }

    /// Slots aligned to a key of `len` ids
    pub fn into_slots(self, len: usize) -> Vec<Option<Arc<ResourceError>>> {
        match self {
            Self::One(error) => vec![Some(error); len.max(1)],
            Self::Many(slots) => slots,
        }
    }

    /// True when at least one slot holds an error
    pub fn is_error(&self) -> bool {
        self.first().is_some()
    }
}

/// Opaque handle for one consumer's claim on a key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UsageToken(String);

impl UsageToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UsageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Change notifications pushed by a resource
#[derive(Debug, Clone)]
pub enum ResourceEvent<K> {
    Loaded { key: ResourceKey<K> },
    Failed { key: ResourceKey<K>, error: String },
    Outdated { key: ResourceKey<K> },
    Evicted { id: K },
}

impl<K: ResourceId> ResourceEvent<K> {
    /// Key the event is about
    pub fn key(&self) -> ResourceKey<K> {
        match self {
            Self::Loaded { key } | Self::Failed { key, .. } | Self::Outdated { key } => key.clone(),
            Self::Evicted { id } => ResourceKey::Scalar(id.clone()),
        }
    }
}

/// Keyed, reference-counted cache
pub trait Resource: Send + Sync + 'static {
    type Key: ResourceId;
    type Value: Clone + Send + Sync + 'static;

    /// Start (or join) a load of `key` with `includes`
    fn load(&self, key: &ResourceKey<Self::Key>, includes: &Includes) -> LoadFuture<Self::Value>;

    /// Cached value(s); `None` when nothing is cached for the key
    fn get(&self, key: &ResourceKey<Self::Key>) -> Option<Fetched<Self::Value>>;

    fn is_loaded(&self, key: &ResourceKey<Self::Key>, includes: &Includes) -> bool;

    fn is_loading(&self, key: &ResourceKey<Self::Key>) -> bool;

    fn is_outdated(&self, key: &ResourceKey<Self::Key>) -> bool;

    fn mark_outdated(&self, key: &ResourceKey<Self::Key>);

    fn get_exception(&self, key: &ResourceKey<Self::Key>) -> Option<ResourceException>;

    /// Register interest in `key`; the token must be freed exactly once
    fn use_key(&self, key: &ResourceKey<Self::Key>) -> UsageToken;

    /// Release a token. Double free and free without use are errors.
    fn free(&self, key: &ResourceKey<Self::Key>, token: &UsageToken) -> Result<()>;

    fn has_use_id(&self, token: &UsageToken) -> bool;

    fn is_intersect(&self, a: &ResourceKey<Self::Key>, b: &ResourceKey<Self::Key>) -> bool {
        a.intersects(b)
    }

    fn is_key_equal(&self, a: &ResourceKey<Self::Key>, b: &ResourceKey<Self::Key>) -> bool {
        a.is_key_equal(b)
    }

    /// Cursor metadata of a resolved paged alias
    fn page_info(&self, _key: &ResourceKey<Self::Key>) -> Option<PageInfo> {
        None
    }

    /// Move a claim from `old_key` to `new_key`.
    ///
    /// The new token is acquired before the old one is freed. Implementations
    /// holding a lock should override this to swap both under one lock.
    fn rebind(
        &self,
        old_key: &ResourceKey<Self::Key>,
        token: &UsageToken,
        new_key: &ResourceKey<Self::Key>,
    ) -> Result<UsageToken> {
        let next = self.use_key(new_key);
        if let Err(err) = self.free(old_key, token) {
            let _ = self.free(new_key, &next);
            return Err(err);
        }
        Ok(next)
    }

    fn subscribe(&self) -> broadcast::Receiver<ResourceEvent<Self::Key>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetched_shapes() {
        assert_eq!(Fetched::One(1).into_vec(), vec![1]);
        assert_eq!(Fetched::Many(vec![1, 2]).into_one(), Some(1));
        assert!(Fetched::<i32>::Many(vec![]).is_empty());
    }

    #[test]
    fn test_exception_identity() {
        let recorded = ResourceError::load("a", anyhow::anyhow!("boom"));
        let lookalike = ResourceError::load("a", anyhow::anyhow!("boom"));

        let exception = ResourceException::Many(vec![None, Some(recorded.clone())]);
        assert!(exception.contains(&recorded));
        assert!(!exception.contains(&lookalike));
        assert!(exception.is_error());
        assert!(!ResourceException::Many(vec![None, None]).is_error());
    }

    #[test]
    fn test_exception_slots() {
        let err = ResourceError::load("alias", anyhow::anyhow!("boom"));
        let slots = ResourceException::One(err).into_slots(3);
        assert_eq!(slots.len(), 3);
        assert!(slots.iter().all(Option::is_some));
    }

    #[test]
    fn test_tokens_are_distinct() {
        assert_ne!(UsageToken::generate(), UsageToken::generate());
    }
}
