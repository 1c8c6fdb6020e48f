//! Single-entity binding

use super::error::BindingException;
use super::options::{BindingOptions, LoadableState};
use super::state::{BindingCore, BindingStatus, LoadHandle};
use super::suspense::Suspense;
use crate::resource::{Includes, Resource, ResourceKey};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// A consumer bound to one key of a resource
pub struct ResourceBinding<R: Resource> {
    core: Arc<BindingCore<R>>,
}

impl<R: Resource> ResourceBinding<R> {
    pub fn new(resource: Arc<R>, key: Option<ResourceKey<R::Key>>) -> Self {
        Self::with_options(resource, key, Includes::none(), BindingOptions::default())
    }

    pub fn with_options(
        resource: Arc<R>,
        key: Option<ResourceKey<R::Key>>,
        includes: Includes,
        options: BindingOptions<R>,
    ) -> Self {
        Self {
            core: BindingCore::new(resource, key, includes, options),
        }
    }

    pub fn resource(&self) -> &Arc<R> {
        self.core.resource()
    }

    pub fn key(&self) -> Option<ResourceKey<R::Key>> {
        self.core.key()
    }

    pub fn includes(&self) -> &Includes {
        self.core.includes()
    }

    /// Cached value; starts a load when one is needed
    pub fn data(&self) -> Option<R::Value> {
        self.core.data().and_then(|fetched| fetched.into_one())
    }

    /// Cached value without side effects
    pub fn try_get_data(&self) -> Option<R::Value> {
        self.core.fetched().and_then(|fetched| fetched.into_one())
    }

    pub fn exception(&self) -> Option<BindingException> {
        self.core.exception()
    }

    pub fn is_loading(&self) -> bool {
        self.core.is_loading()
    }

    pub fn is_loaded(&self) -> bool {
        self.core.is_loaded()
    }

    pub fn is_outdated(&self) -> bool {
        self.core.is_outdated()
    }

    pub fn is_error(&self) -> bool {
        self.core.is_error()
    }

    pub fn can_load(&self) -> bool {
        self.core.can_load()
    }

    pub fn load(&self) -> LoadHandle<R::Value> {
        self.core.load()
    }

    pub fn reload(&self) -> LoadHandle<R::Value> {
        self.core.reload()
    }

    /// Suspense-aware read of the value
    pub fn read(&self) -> Suspense<Option<R::Value>> {
        self.core
            .read()
            .map(|fetched| fetched.and_then(|fetched| fetched.into_one()))
    }

    pub fn set_key(&self, key: Option<ResourceKey<R::Key>>) {
        self.core.set_key(key);
    }

    pub fn set_active(&self, active: bool) {
        self.core.set_active(active);
    }

    pub fn status(&self) -> BindingStatus {
        self.core.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<BindingStatus> {
        self.core.subscribe()
    }

    /// Future that keeps [`status`](Self::status) in step with resource events
    pub fn observe(&self) -> impl Future<Output = ()> + Send + 'static {
        self.core.observe()
    }

    /// Free the usage claim, reporting contract violations
    pub fn unmount(self) -> crate::resource::Result<()> {
        self.core.release()
    }
}

impl<R: Resource> LoadableState for ResourceBinding<R> {
    fn is_loaded(&self) -> bool {
        self.core.is_loaded()
    }

    fn is_loading(&self) -> bool {
        self.core.is_loading()
    }

    fn is_outdated(&self) -> bool {
        self.core.is_outdated()
    }

    fn is_error(&self) -> bool {
        self.core.is_error()
    }

    fn load_state(&self) -> BoxFuture<'static, Result<(), BindingException>> {
        self.core.load().map(|result| result.map(|_| ())).boxed()
    }
}
