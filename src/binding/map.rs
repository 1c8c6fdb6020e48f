//! Map binding
//!
//! Binds a list or alias key and exposes values and exceptions as
//! sequences aligned to the resolved ids.

use super::error::BindingException;
use super::options::{BindingOptions, LoadableState};
use super::state::{BindingCore, BindingStatus, LoadHandle};
use super::suspense::Suspense;
use crate::resource::{Includes, PageInfo, Resource, ResourceKey};
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// A consumer bound to a set of entities
pub struct MapBinding<R: Resource> {
    core: Arc<BindingCore<R>>,
}

impl<R: Resource> MapBinding<R> {
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

    /// Cached values, empty until the key resolves; starts a load when needed
    pub fn data(&self) -> Vec<R::Value> {
        self.core
            .data()
            .map(|fetched| fetched.into_vec())
            .unwrap_or_default()
    }

    pub fn try_get_data(&self) -> Vec<R::Value> {
        self.core
            .fetched()
            .map(|fetched| fetched.into_vec())
            .unwrap_or_default()
    }

    /// One slot per resolved id. A local failure fills every slot.
    pub fn exception(&self) -> Vec<Option<BindingException>> {
        let len = self.len();
        if let Some(local) = self.core.local_error() {
            return vec![Some(BindingException::Loading(local)); len.max(1)];
        }
        match self.core.resource_exception() {
            Some(exception) => exception
                .into_slots(len)
                .into_iter()
                .map(|slot| slot.map(BindingException::Resource))
                .collect(),
            None => vec![None; len],
        }
    }

    /// Number of ids the key currently resolves to
    fn len(&self) -> usize {
        match self.core.key() {
            Some(ResourceKey::Scalar(_)) => 1,
            Some(ResourceKey::List(ids)) => ids.len(),
            Some(key @ ResourceKey::Alias(_)) => {
                self.core.resource().get(&key).map_or(0, |fetched| fetched.len())
            }
            None => 0,
        }
    }

    pub fn page_info(&self) -> Option<PageInfo> {
        let key = self.core.key()?;
        self.core.resource().page_info(&key)
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

    /// True when any slot failed
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

    pub fn read(&self) -> Suspense<Vec<R::Value>> {
        self.core
            .read()
            .map(|fetched| fetched.map(|fetched| fetched.into_vec()).unwrap_or_default())
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

    pub fn observe(&self) -> impl Future<Output = ()> + Send + 'static {
        self.core.observe()
    }

    pub fn unmount(self) -> crate::resource::Result<()> {
        self.core.release()
    }
}

impl<R: Resource> LoadableState for MapBinding<R> {
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
