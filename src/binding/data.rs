//! Data binding
//!
//! Consumer of a single-value resource. Keeps the value that was current
//! before the latest load so callers can diff across reloads.

use super::error::BindingException;
use super::options::{BindingOptions, LoadableState};
use super::single::ResourceBinding;
use super::state::{BindingStatus, LoadHandle};
use super::suspense::Suspense;
use crate::resource::{DataResource, Fetched, Includes, ResourceKey};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Called with the new value and the one it replaced
pub type OnDataChange<V> = Arc<dyn Fn(&V, Option<&V>) + Send + Sync>;

struct History<V> {
    previous: Option<V>,
    current: Option<V>,
}

/// Binding of a [`DataResource`]
pub struct DataBinding<V: Clone + Send + Sync + 'static> {
    binding: ResourceBinding<DataResource<V>>,
    history: Arc<Mutex<History<V>>>,
}

fn unit_key() -> Option<ResourceKey<()>> {
    Some(ResourceKey::Scalar(()))
}

impl<V: Clone + Send + Sync + 'static> DataBinding<V> {
    pub fn new(resource: Arc<DataResource<V>>) -> Self {
        Self::with_options(resource, Includes::none(), BindingOptions::default(), None)
    }

    pub fn with_options(
        resource: Arc<DataResource<V>>,
        includes: Includes,
        mut options: BindingOptions<DataResource<V>>,
        on_change: Option<OnDataChange<V>>,
    ) -> Self {
        let history = Arc::new(Mutex::new(History {
            previous: None,
            current: None,
        }));

        let tracked = Arc::clone(&history);
        let downstream = options.on_data.take();
        options.on_data = Some(Arc::new(move |fetched: &Fetched<V>, resource: &DataResource<V>| {
            if let Some(value) = fetched.clone().into_one() {
                let previous = {
                    let mut history = tracked.lock();
                    let previous = history.current.replace(value.clone());
                    history.previous = previous.clone();
                    previous
                };
                if let Some(on_change) = &on_change {
                    on_change(&value, previous.as_ref());
                }
            }
            if let Some(downstream) = &downstream {
                downstream(fetched, resource);
            }
        }));

        let key = if options.active { unit_key() } else { None };
        Self {
            binding: ResourceBinding::with_options(resource, key, includes, options),
            history,
        }
    }

    pub fn resource(&self) -> &Arc<DataResource<V>> {
        self.binding.resource()
    }

    pub fn data(&self) -> Option<V> {
        self.binding.data()
    }

    pub fn try_get_data(&self) -> Option<V> {
        self.binding.try_get_data()
    }

    /// Value that was current before the latest successful load
    pub fn prev_data(&self) -> Option<V> {
        self.history.lock().previous.clone()
    }

    pub fn exception(&self) -> Option<BindingException> {
        self.binding.exception()
    }

    pub fn is_loading(&self) -> bool {
        self.binding.is_loading()
    }

    pub fn is_loaded(&self) -> bool {
        self.binding.is_loaded()
    }

    pub fn is_outdated(&self) -> bool {
        self.binding.is_outdated()
    }

    pub fn is_error(&self) -> bool {
        self.binding.is_error()
    }

    /// Load, or join the load already in flight
    pub fn load(&self) -> LoadHandle<V> {
        self.binding.load()
    }

    pub fn reload(&self) -> LoadHandle<V> {
        self.binding.reload()
    }

    pub fn read(&self) -> Suspense<Option<V>> {
        self.binding.read()
    }

    /// An inactive data binding holds no claim on the resource
    pub fn set_active(&self, active: bool) {
        self.binding.set_key(if active { unit_key() } else { None });
        self.binding.set_active(active);
    }

    pub fn status(&self) -> BindingStatus {
        self.binding.status()
    }

    pub fn subscribe(&self) -> watch::Receiver<BindingStatus> {
        self.binding.subscribe()
    }

    pub fn observe(&self) -> impl Future<Output = ()> + Send + 'static {
        self.binding.observe()
    }

    pub fn unmount(self) -> crate::resource::Result<()> {
        self.binding.unmount()
    }
}

impl<V: Clone + Send + Sync + 'static> LoadableState for DataBinding<V> {
    fn is_loaded(&self) -> bool {
        self.binding.is_loaded()
    }

    fn is_loading(&self) -> bool {
        self.binding.is_loading()
    }

    fn is_outdated(&self) -> bool {
        self.binding.is_outdated()
    }

    fn is_error(&self) -> bool {
        self.binding.is_error()
    }

    fn load_state(&self) -> BoxFuture<'static, Result<(), BindingException>> {
        LoadableState::load_state(&self.binding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{DataLoader, Resource};
    use futures::future::FutureExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone, Default)]
    struct Counter {
        calls: Arc<AtomicU32>,
    }

    impl DataLoader<u32> for Counter {
        fn load(&self, _includes: Includes) -> BoxFuture<'static, anyhow::Result<u32>> {
            let next = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok(next * 10) }.boxed()
        }
    }

    fn setup() -> (Arc<DataResource<u32>>, Counter) {
        let counter = Counter::default();
        let resource = Arc::new(DataResource::from_data_loader("settings", counter.clone()));
        (resource, counter)
    }

    #[tokio::test]
    async fn test_second_load_joins_in_flight() {
        let (resource, counter) = setup();
        let binding = DataBinding::new(resource);

        let first = binding.load();
        let second = binding.load();
        assert!(first.ptr_eq(&second));

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert_eq!(binding.data(), Some(10));
    }

    #[tokio::test]
    async fn test_prev_data_tracks_reloads() {
        let (resource, _) = setup();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        let binding = DataBinding::with_options(
            resource,
            Includes::none(),
            BindingOptions::new(),
            Some(Arc::new(move |new: &u32, prev: Option<&u32>| {
                sink.lock().push((*new, prev.copied()));
            })),
        );

        binding.load().await.unwrap();
        assert_eq!(binding.prev_data(), None);

        binding.reload().await.unwrap();
        assert_eq!(binding.data(), Some(20));
        assert_eq!(binding.prev_data(), Some(10));
        assert_eq!(changes.lock().as_slice(), &[(10, None), (20, Some(10))]);
    }

    #[tokio::test]
    async fn test_inactive_binding_releases_claim() {
        let (resource, counter) = setup();
        let binding = DataBinding::with_options(
            Arc::clone(&resource),
            Includes::none(),
            BindingOptions::new().active(false),
            None,
        );

        assert_eq!(resource.use_count(), 0);
        assert!(binding.is_loaded());
        assert_eq!(binding.data(), None);

        binding.set_active(true);
        assert_eq!(resource.use_count(), 1);
        binding.load().await.unwrap();
        assert_eq!(counter.calls.load(Ordering::SeqCst), 1);
        assert!(resource.is_loaded(&ResourceKey::Scalar(()), &Includes::none()));
    }
}
