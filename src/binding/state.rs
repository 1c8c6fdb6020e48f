//! Binding State
//!
//! State and load orchestration shared by the single, map and data bindings.
//! The resource stays the only source of truth for values and resource
//! errors; the core only tracks what belongs to one consumer: its key and
//! usage claim, the load it is waiting on, and its local loading error.

use super::error::{BindingException, ErrorBridge, LoadingError};
use super::options::{BindingOptions, LoadableState};
use super::reactive::Computed;
use super::suspense::{Suspended, Suspense};
use crate::resource::{
    Fetched, Includes, Resource, ResourceError, ResourceException, ResourceKey, UsageHandle,
};
use futures::future::{self, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;

/// Outcome of a binding load: `Ok(None)` when the binding has no key
pub type BindingResult<V> = Result<Option<Fetched<V>>, BindingException>;

/// In-flight binding load; clones share one request
pub type LoadHandle<V> = Shared<BoxFuture<'static, BindingResult<V>>>;

/// Reactive projection of a binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BindingStatus {
    pub loading: bool,
    pub loaded: bool,
    pub outdated: bool,
    pub error: bool,
}

struct Pending<R: Resource> {
    generation: u64,
    key: ResourceKey<R::Key>,
    handle: LoadHandle<R::Value>,
}

struct CoreState<R: Resource> {
    key: Option<ResourceKey<R::Key>>,
    usage: Option<UsageHandle<R>>,
    active: bool,
    generation: u64,
    pending: Option<Pending<R>>,
    local_error: Option<LoadingError>,
}

pub(crate) struct BindingCore<R: Resource> {
    resource: Arc<R>,
    includes: Includes,
    options: BindingOptions<R>,
    bridge: ErrorBridge,
    status: Computed<BindingStatus>,
    state: Mutex<CoreState<R>>,
    this: Weak<BindingCore<R>>,
}

fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(runtime) = tokio::runtime::Handle::try_current() {
        runtime.spawn(future);
    }
}

/// Load every dependency that is not ready yet, in order
async fn wait_for(preload: &[Arc<dyn LoadableState>]) -> Result<(), Arc<ResourceError>> {
    for dependency in preload {
        if dependency.is_loaded() && !dependency.is_outdated() {
            continue;
        }
        if let Err(exception) = dependency.load_state().await {
            return Err(Arc::new(ResourceError::Dependency {
                reason: exception.to_string(),
            }));
        }
    }
    Ok(())
}

impl<R: Resource> BindingCore<R> {
    pub(crate) fn new(
        resource: Arc<R>,
        key: Option<ResourceKey<R::Key>>,
        includes: Includes,
        options: BindingOptions<R>,
    ) -> Arc<Self> {
        let usage = key
            .clone()
            .map(|key| UsageHandle::acquire(Arc::clone(&resource), key));
        let bridge = ErrorBridge::new(
            options.silent,
            options.error_context.clone(),
            options.on_error.clone(),
        );
        let active = options.active;

        let core = Arc::new_cyclic(|this| Self {
            resource,
            includes,
            options,
            bridge,
            status: Computed::new(BindingStatus::default()),
            state: Mutex::new(CoreState {
                key,
                usage,
                active,
                generation: 0,
                pending: None,
                local_error: None,
            }),
            this: this.clone(),
        });

        core.sync_status();
        if core.options.force_suspense {
            // Eager read: kicks off the load a suspending reader waits on
            core.request_load();
        }
        core
    }

    pub(crate) fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    pub(crate) fn includes(&self) -> &Includes {
        &self.includes
    }

    pub(crate) fn key(&self) -> Option<ResourceKey<R::Key>> {
        self.state.lock().key.clone()
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.lock().active
    }

    // =========================================================================
    // Derived state
    // =========================================================================

    pub(crate) fn is_loaded(&self) -> bool {
        match self.key() {
            Some(key) => self.resource.is_loaded(&key, &self.includes),
            None => true,
        }
    }

    pub(crate) fn is_outdated(&self) -> bool {
        self.key().is_some_and(|key| self.resource.is_outdated(&key))
    }

    pub(crate) fn is_loading(&self) -> bool {
        let (key, pending) = {
            let state = self.state.lock();
            (state.key.clone(), state.pending.is_some())
        };
        pending || key.is_some_and(|key| self.resource.is_loading(&key))
    }

    pub(crate) fn local_error(&self) -> Option<LoadingError> {
        self.state.lock().local_error.clone()
    }

    pub(crate) fn resource_exception(&self) -> Option<ResourceException> {
        let key = self.key()?;
        self.resource
            .get_exception(&key)
            .filter(ResourceException::is_error)
    }

    /// First failure: the local one, otherwise the resource's
    pub(crate) fn exception(&self) -> Option<BindingException> {
        if let Some(local) = self.local_error() {
            return Some(BindingException::Loading(local));
        }
        self.resource_exception()
            .and_then(|exception| exception.first().cloned())
            .map(BindingException::Resource)
    }

    pub(crate) fn is_error(&self) -> bool {
        self.local_error().is_some() || self.resource_exception().is_some()
    }

    fn preload_ready(&self) -> bool {
        self.options.preload.iter().all(|dependency| {
            dependency.is_loaded() && !dependency.is_outdated() && !dependency.is_error()
        })
    }

    /// Whether a read should start a load now
    pub(crate) fn can_load(&self) -> bool {
        let key = {
            let state = self.state.lock();
            if !state.active || state.pending.is_some() || state.local_error.is_some() {
                return false;
            }
            match &state.key {
                Some(key) => key.clone(),
                None => return false,
            }
        };

        if !self.preload_ready() || self.resource.is_loading(&key) {
            return false;
        }
        if self
            .resource
            .get_exception(&key)
            .is_some_and(|exception| exception.is_error())
        {
            return false;
        }
        self.resource.is_outdated(&key) || !self.resource.is_loaded(&key, &self.includes)
    }

    pub(crate) fn status(&self) -> BindingStatus {
        self.status.get()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<BindingStatus> {
        self.status.subscribe()
    }

    /// Recompute the reactive projection and dispatch any new failure
    pub(crate) fn sync_status(&self) {
        let exception = self.exception();
        let status = BindingStatus {
            loading: self.is_loading(),
            loaded: self.key().is_some() && self.is_loaded(),
            outdated: self.is_outdated(),
            error: exception.is_some(),
        };
        if self.status.set(status) {
            tracing::trace!("binding status: {:?}", status);
        }
        if let Some(exception) = exception {
            self.bridge.observe(&exception);
        }
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Load the current key, joining the pending load of an equivalent key
    pub(crate) fn load(&self) -> LoadHandle<R::Value> {
        self.issue(false)
    }

    /// Mark the key outdated, then load it with a request of its own
    pub(crate) fn reload(&self) -> LoadHandle<R::Value> {
        let key = {
            let mut state = self.state.lock();
            if !state.active {
                return Self::idle(&state);
            }
            state.local_error = None;
            state.key.clone()
        };
        if let Some(key) = key {
            self.resource.mark_outdated(&key);
        }
        self.issue(true)
    }

    /// Handle returned while nothing may load: the pending one, or an empty result
    fn idle(state: &CoreState<R>) -> LoadHandle<R::Value> {
        match &state.pending {
            Some(pending) => pending.handle.clone(),
            None => future::ready(Ok(None)).boxed().shared(),
        }
    }

    fn issue(&self, fresh: bool) -> LoadHandle<R::Value> {
        let handle = {
            let mut state = self.state.lock();
            if !state.active {
                tracing::trace!("binding inactive, not loading");
                return Self::idle(&state);
            }
            let Some(key) = state.key.clone() else {
                return future::ready(Ok(None)).boxed().shared();
            };

            if let Some(pending) = &state.pending {
                if !fresh && self.resource.is_key_equal(&pending.key, &key) {
                    tracing::trace!("joining pending load of {}", key);
                    return pending.handle.clone();
                }
            }

            state.generation += 1;
            let generation = state.generation;
            tracing::debug!("binding load: key={}, generation={}", key, generation);

            let handle = self.start(generation, key.clone());
            state.pending = Some(Pending {
                generation,
                key,
                handle: handle.clone(),
            });
            handle
        };

        self.sync_status();
        spawn_detached(handle.clone().map(|_| ()));
        handle
    }

    /// Start a load if a read needs one; returns whether one was started
    pub(crate) fn request_load(&self) -> bool {
        if !self.can_load() {
            return false;
        }
        self.load();
        true
    }

    fn start(&self, generation: u64, key: ResourceKey<R::Key>) -> LoadHandle<R::Value> {
        let this = self.this.clone();
        let resource = Arc::clone(&self.resource);
        let includes = self.includes.clone();
        let preload = self.options.preload.clone();

        // Register with the resource right away so concurrent consumers join it
        let eager = self
            .preload_ready()
            .then(|| self.resource.load(&key, &self.includes));

        async move {
            let outcome = match eager {
                Some(load) => load.await,
                None => match wait_for(&preload).await {
                    Ok(()) => resource.load(&key, &includes).await,
                    Err(failed) => Err(failed),
                },
            };

            match this.upgrade() {
                Some(core) => core.settle(generation, &key, outcome),
                None => outcome.map(Some).map_err(BindingException::Resource),
            }
        }
        .boxed()
        .shared()
    }

    fn settle(
        &self,
        generation: u64,
        key: &ResourceKey<R::Key>,
        outcome: Result<Fetched<R::Value>, Arc<ResourceError>>,
    ) -> BindingResult<R::Value> {
        let result = match outcome {
            Ok(fetched) => Ok(Some(fetched)),
            Err(error) => Err(self.classify(key, error)),
        };

        {
            let mut state = self.state.lock();
            if state.generation != generation {
                tracing::debug!(
                    "discarding superseded load of {} (generation {}, current {})",
                    key,
                    generation,
                    state.generation
                );
                return result;
            }
            state.pending = None;
            state.local_error = match &result {
                Err(BindingException::Loading(error)) => Some(error.clone()),
                _ => None,
            };
        }

        if let (Ok(Some(fetched)), Some(on_data)) = (&result, &self.options.on_data) {
            on_data(fetched, &self.resource);
        }
        self.sync_status();
        result
    }

    /// Resource error when the resource recorded this very instance,
    /// otherwise a loading error bound to this binding
    fn classify(&self, key: &ResourceKey<R::Key>, error: Arc<ResourceError>) -> BindingException {
        let recorded = self
            .resource
            .get_exception(key)
            .is_some_and(|exception| exception.contains(&error));
        if recorded {
            tracing::debug!("resource error for {}: {}", key, error);
            return BindingException::Resource(error);
        }

        tracing::warn!("loading error for {}: {}", key, error);
        let this = self.this.clone();
        BindingException::Loading(LoadingError::new(error, move || {
            if let Some(core) = this.upgrade() {
                core.clear_local_error();
            }
        }))
    }

    fn clear_local_error(&self) {
        let cleared = self.state.lock().local_error.take().is_some();
        if cleared {
            tracing::debug!("local loading error cleared");
            self.sync_status();
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Cached value(s) without triggering anything
    pub(crate) fn fetched(&self) -> Option<Fetched<R::Value>> {
        let key = self.key()?;
        self.resource.get(&key)
    }

    /// Cached value(s), starting a load when one is needed
    pub(crate) fn data(&self) -> Option<Fetched<R::Value>> {
        self.request_load();
        self.fetched()
    }

    fn pending_handle(&self) -> Option<LoadHandle<R::Value>> {
        self.state
            .lock()
            .pending
            .as_ref()
            .map(|pending| pending.handle.clone())
    }

    /// Suspense-aware read
    pub(crate) fn read(&self) -> Suspense<Option<Fetched<R::Value>>> {
        let Some(key) = self.key() else {
            return Suspense::Ready(None);
        };

        let pending = match self.pending_handle() {
            Some(handle) => Some(handle),
            None => {
                if let Some(exception) = self.exception() {
                    return Suspense::Failed(exception);
                }
                if self.can_load()
                    || (self.is_active() && self.resource.is_loading(&key))
                {
                    Some(self.load())
                } else {
                    None
                }
            }
        };

        let value = self.fetched();
        match pending {
            Some(handle) if value.is_none() || self.options.force_suspense => {
                Suspense::Pending(Suspended::new(handle))
            }
            _ => Suspense::Ready(value),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Switch to another key, moving the usage claim in one step
    pub(crate) fn set_key(&self, key: Option<ResourceKey<R::Key>>) {
        let released = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            let unchanged = match (&state.key, &key) {
                (Some(current), Some(next)) => self.resource.is_key_equal(current, next),
                (None, None) => true,
                _ => false,
            };
            if unchanged {
                return;
            }
            tracing::debug!(
                "binding key change: {:?} -> {:?}",
                state.key.as_ref().map(ToString::to_string),
                key.as_ref().map(ToString::to_string)
            );

            let released = match key.clone() {
                Some(next) => {
                    let handle = match state.usage.take() {
                        Some(mut handle) => match handle.rebind(next.clone()) {
                            Ok(()) => handle,
                            Err(err) => {
                                tracing::error!("failed to move usage to {}: {}", next, err);
                                UsageHandle::acquire(Arc::clone(&self.resource), next)
                            }
                        },
                        None => UsageHandle::acquire(Arc::clone(&self.resource), next),
                    };
                    state.usage = Some(handle);
                    None
                }
                None => state.usage.take(),
            };

            state.key = key;
            // A load for the previous key can no longer touch this binding
            state.generation += 1;
            state.pending = None;
            state.local_error = None;
            released
        };

        drop(released);
        self.sync_status();
    }

    pub(crate) fn set_active(&self, active: bool) {
        let changed = {
            let mut state = self.state.lock();
            let changed = state.active != active;
            state.active = active;
            changed
        };
        if changed {
            tracing::debug!("binding active={}", active);
            self.sync_status();
        }
    }

    /// Free the usage claim now instead of on drop
    pub(crate) fn release(&self) -> crate::resource::Result<()> {
        let usage = {
            let mut state = self.state.lock();
            state.generation += 1;
            state.pending = None;
            state.key = None;
            state.usage.take()
        };
        let result = match usage {
            Some(handle) => handle.release(),
            None => Ok(()),
        };
        self.sync_status();
        result
    }

    /// Follow resource events and refresh the projection when they touch
    /// the bound key. Ends when the binding or the resource goes away.
    pub(crate) fn observe(&self) -> impl Future<Output = ()> + Send + 'static {
        let this = self.this.clone();
        let mut events = self.resource.subscribe();

        async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(core) = this.upgrade() else { break };
                        let touches = core
                            .key()
                            .is_some_and(|key| core.resource.is_intersect(&key, &event.key()));
                        if touches {
                            core.sync_status();
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!("binding observer lagged by {} events", skipped);
                        let Some(core) = this.upgrade() else { break };
                        core.sync_status();
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
}
