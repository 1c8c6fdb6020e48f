//! Usage Handles
//!
//! Scoped acquisition of usage tokens. A handle frees its token exactly once,
//! either through [`UsageHandle::release`] or when it is dropped.

use super::contract::{Resource, UsageToken};
use super::error::Result;
use super::key::ResourceKey;
use std::fmt;
use std::sync::Arc;

/// One live claim on a key of a resource
pub struct UsageHandle<R: Resource> {
    resource: Arc<R>,
    key: ResourceKey<R::Key>,
    token: Option<UsageToken>,
}

impl<R: Resource> UsageHandle<R> {
    /// Register interest in `key`
    pub fn acquire(resource: Arc<R>, key: ResourceKey<R::Key>) -> Self {
        let token = resource.use_key(&key);
        tracing::trace!("usage acquired: key={}, token={}", key, token);
        Self {
            resource,
            key,
            token: Some(token),
        }
    }

    pub fn key(&self) -> &ResourceKey<R::Key> {
        &self.key
    }

    pub fn token(&self) -> Option<&UsageToken> {
        self.token.as_ref()
    }

    /// Move the claim to `new_key` without a window where neither key is held
    pub fn rebind(&mut self, new_key: ResourceKey<R::Key>) -> Result<()> {
        let next = match &self.token {
            Some(token) => self.resource.rebind(&self.key, token, &new_key)?,
            None => self.resource.use_key(&new_key),
        };
        tracing::trace!("usage rebound: {} -> {}, token={}", self.key, new_key, next);
        self.key = new_key;
        self.token = Some(next);
        Ok(())
    }

    /// Free the token now, reporting contract violations
    pub fn release(mut self) -> Result<()> {
        match self.token.take() {
            Some(token) => self.resource.free(&self.key, &token),
            None => Ok(()),
        }
    }
}

impl<R: Resource> Drop for UsageHandle<R> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(err) = self.resource.free(&self.key, &token) {
                tracing::error!("failed to free usage of {}: {}", self.key, err);
            }
        }
    }
}

impl<R: Resource> fmt::Debug for UsageHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UsageHandle")
            .field("key", &self.key)
            .field("token", &self.token)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{CachedMapResource, MemoryLoader};

    fn resource() -> Arc<CachedMapResource<String, u32>> {
        Arc::new(CachedMapResource::new("numbers", MemoryLoader::new([("a", 1)])))
    }

    fn key(id: &str) -> ResourceKey<String> {
        ResourceKey::Scalar(id.to_string())
    }

    #[test]
    fn test_drop_frees_token() {
        let resource = resource();
        let handle = UsageHandle::acquire(Arc::clone(&resource), key("a"));
        let token = handle.token().cloned().unwrap();
        assert!(resource.has_use_id(&token));

        drop(handle);
        assert!(!resource.has_use_id(&token));
        assert_eq!(resource.use_count(), 0);
    }

    #[test]
    fn test_release_frees_exactly_once() {
        let resource = resource();
        let handle = UsageHandle::acquire(Arc::clone(&resource), key("a"));
        handle.release().unwrap();
        assert_eq!(resource.use_count(), 0);
    }

    #[test]
    fn test_rebind_moves_claim() {
        let resource = resource();
        let mut handle = UsageHandle::acquire(Arc::clone(&resource), key("a"));

        handle.rebind(key("b")).unwrap();
        assert_eq!(handle.key(), &key("b"));
        assert_eq!(resource.ref_count(&key("a")), 0);
        assert_eq!(resource.ref_count(&key("b")), 1);
        assert_eq!(resource.use_count(), 1);
    }
}
