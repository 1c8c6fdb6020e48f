//! Cached Map Resource
//!
//! In-memory implementation of the [`Resource`] contract. Values are cached
//! per scalar id; aliases are cached as the ordered list of ids they resolved
//! to plus their page metadata. Concurrent loads of the same key share one
//! loader call, and usage tokens keep entries alive until they are freed.

use super::contract::{
    Fetched, LoadFuture, LoadResult, Resource, ResourceEvent, ResourceException, UsageToken,
};
use super::error::{ResourceError, Result};
use super::includes::Includes;
use super::key::{PageInfo, ResourceId, ResourceKey, ResourceKeyAlias};
use super::loader::{DataLoader, DataLoaderAdapter, LoadRequest, LoadResponse, Loader};
use chrono::{DateTime, Utc};
use futures::future::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

/// Default capacity of the event channel
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// When unreferenced entries leave the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Only on [`CachedMapResource::collect_garbage`]
    #[default]
    Manual,
    /// As soon as the last usage token covering an entry is freed
    OnRelease,
}

/// Runtime options of a cached resource
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub eviction: EvictionPolicy,
    pub event_buffer: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            eviction: EvictionPolicy::Manual,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

/// Single-value resource: one entry under the unit key
pub type DataResource<V> = CachedMapResource<(), V>;

// =========================================================================
// Cache state
// =========================================================================

struct Entry<V> {
    value: Option<V>,
    outdated: bool,
    includes: Includes,
    exception: Option<Arc<ResourceError>>,
    loaded_at: Option<DateTime<Utc>>,
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Self {
            value: None,
            outdated: true,
            includes: Includes::none(),
            exception: None,
            loaded_at: None,
        }
    }
}

impl<V> Entry<V> {
    fn is_loaded(&self) -> bool {
        self.value.is_some()
    }
}

struct AliasEntry<K> {
    ids: Vec<K>,
    page_info: Option<PageInfo>,
    loaded: bool,
    outdated: bool,
    includes: Includes,
    exception: Option<Arc<ResourceError>>,
}

impl<K> Default for AliasEntry<K> {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            page_info: None,
            loaded: false,
            outdated: true,
            includes: Includes::none(),
            exception: None,
        }
    }
}

struct InFlight<V> {
    id: u64,
    includes: Includes,
    future: LoadFuture<V>,
}

struct State<K, V> {
    entries: HashMap<K, Entry<V>>,
    aliases: HashMap<ResourceKeyAlias, AliasEntry<K>>,
    in_flight: HashMap<ResourceKey<K>, InFlight<V>>,
    uses: HashMap<UsageToken, ResourceKey<K>>,
    /// In-flight loads issued before their key was marked outdated
    invalidated: HashSet<u64>,
    next_load_id: u64,
}

impl<K: ResourceId, V: Clone> State<K, V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            aliases: HashMap::new(),
            in_flight: HashMap::new(),
            uses: HashMap::new(),
            invalidated: HashSet::new(),
            next_load_id: 0,
        }
    }

    fn resolve(&self, alias: &ResourceKeyAlias) -> Option<Vec<K>> {
        self.aliases
            .get(alias)
            .filter(|entry| entry.loaded)
            .map(|entry| entry.ids.clone())
    }

    fn expand(&self, key: &ResourceKey<K>) -> Vec<K> {
        key.expand(|alias| self.resolve(alias)).unwrap_or_default()
    }

    fn ref_count(&self, key: &ResourceKey<K>) -> usize {
        self.uses
            .values()
            .filter(|used| used.intersects_with(key, |alias| self.resolve(alias)))
            .count()
    }

    fn mark_outdated(&mut self, key: &ResourceKey<K>) {
        if let ResourceKey::Alias(alias) = key {
            if let Some(entry) = self.aliases.get_mut(alias) {
                entry.outdated = true;
            }
        }
        for id in self.expand(key) {
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.outdated = true;
            }
        }

        let overtaken: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(flying, _)| {
                flying.is_key_equal(key) || flying.intersects_with(key, |alias| self.resolve(alias))
            })
            .map(|(_, flight)| flight.id)
            .collect();
        self.invalidated.extend(overtaken);
    }

    fn record_failure(&mut self, key: &ResourceKey<K>, error: &Arc<ResourceError>) {
        match key {
            ResourceKey::Alias(alias) => {
                self.aliases.entry(alias.clone()).or_default().exception = Some(error.clone());
            }
            _ => {
                for id in self.expand(key) {
                    self.entries.entry(id).or_default().exception = Some(error.clone());
                }
            }
        }
    }

    fn store(&mut self, id: K, value: V, includes: &Includes, now: DateTime<Utc>) {
        let entry = self.entries.entry(id).or_default();
        entry.value = Some(value);
        entry.outdated = false;
        entry.includes = includes.clone();
        entry.exception = None;
        entry.loaded_at = Some(now);
    }

    fn apply(
        &mut self,
        key: &ResourceKey<K>,
        includes: &Includes,
        response: LoadResponse<K, V>,
    ) -> LoadResult<V> {
        let now = Utc::now();
        let returned: Vec<K> = response.items.iter().map(|(id, _)| id.clone()).collect();
        let mut values: HashMap<K, V> = HashMap::new();
        for (id, value) in response.items {
            values.insert(id.clone(), value.clone());
            self.store(id, value, includes, now);
        }

        let mut failed: Vec<(K, Arc<ResourceError>)> = Vec::new();
        for (id, source) in response.failures {
            let error = ResourceError::load(format!("{:?}", id), source);
            self.entries.entry(id.clone()).or_default().exception = Some(error.clone());
            failed.push((id, error));
        }

        match key {
            ResourceKey::Alias(alias) => {
                let first_failure = failed.first().map(|(_, error)| error.clone());
                let entry = self.aliases.entry(alias.clone()).or_default();
                entry.ids = returned.clone();
                entry.page_info = response.page_info;
                entry.loaded = true;
                entry.outdated = false;
                entry.includes = includes.clone();
                entry.exception = first_failure.clone();

                match first_failure {
                    Some(error) => Err(error),
                    None => Ok(Fetched::Many(
                        returned
                            .iter()
                            .filter_map(|id| values.get(id).cloned())
                            .collect(),
                    )),
                }
            }
            _ => {
                let requested = self.expand(key);
                let mut ordered = Vec::with_capacity(requested.len());
                let mut first_error: Option<Arc<ResourceError>> = None;

                for id in &requested {
                    if let Some((_, error)) = failed.iter().find(|(failed_id, _)| failed_id == id) {
                        first_error.get_or_insert_with(|| error.clone());
                    } else if let Some(value) = values.get(id) {
                        ordered.push(value.clone());
                    } else {
                        let error = Arc::new(ResourceError::NotFound {
                            key: format!("{:?}", id),
                        });
                        self.entries.entry(id.clone()).or_default().exception = Some(error.clone());
                        first_error.get_or_insert(error);
                    }
                }

                match (first_error, key) {
                    (Some(error), _) => Err(error),
                    (None, ResourceKey::Scalar(_)) => match ordered.into_iter().next() {
                        Some(value) => Ok(Fetched::One(value)),
                        None => Ok(Fetched::Many(Vec::new())),
                    },
                    (None, _) => Ok(Fetched::Many(ordered)),
                }
            }
        }
    }

    /// Drop entries of `key` no live token covers
    fn evict_unused(&mut self, key: &ResourceKey<K>) -> Vec<K> {
        let ids = self.expand(key);

        if let ResourceKey::Alias(alias) = key {
            let still_used = self.uses.values().any(|used| used.as_alias() == Some(alias));
            if !still_used {
                self.aliases.remove(alias);
            }
        }

        let mut evicted = Vec::new();
        for id in ids {
            if self.ref_count(&ResourceKey::Scalar(id.clone())) == 0
                && self.entries.remove(&id).is_some()
            {
                evicted.push(id);
            }
        }
        evicted
    }
}

// =========================================================================
// Resource
// =========================================================================

struct Inner<K, V> {
    name: String,
    loader: Arc<dyn Loader<K, V>>,
    options: CacheOptions,
    state: Mutex<State<K, V>>,
    events: broadcast::Sender<ResourceEvent<K>>,
}

impl<K: ResourceId, V: Clone + Send + Sync + 'static> Inner<K, V> {
    fn emit(&self, event: ResourceEvent<K>) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn settle(
        &self,
        load_id: u64,
        key: &ResourceKey<K>,
        includes: &Includes,
        outcome: std::result::Result<anyhow::Result<LoadResponse<K, V>>, Box<dyn Any + Send>>,
    ) -> LoadResult<V> {
        let (result, event) = {
            let mut state = self.state.lock();
            if state.in_flight.get(key).map(|flight| flight.id) == Some(load_id) {
                state.in_flight.remove(key);
            }
            let overtaken = state.invalidated.remove(&load_id);

            match outcome {
                Err(payload) => {
                    let reason = panic_reason(payload.as_ref());
                    tracing::error!("{}: loader panicked while loading {}: {}", self.name, key, reason);
                    let error = Arc::new(ResourceError::Interrupted {
                        key: key.to_string(),
                        reason,
                    });
                    (Err(error), None)
                }
                Ok(Err(source)) => {
                    let error = ResourceError::load(key, source);
                    tracing::warn!("{}: {}", self.name, error);
                    state.record_failure(key, &error);
                    let event = ResourceEvent::Failed {
                        key: key.clone(),
                        error: error.to_string(),
                    };
                    (Err(error), Some(event))
                }
                Ok(Ok(response)) => {
                    let result = state.apply(key, includes, response);
                    if overtaken {
                        // Answers a request sent before the invalidation
                        tracing::debug!(
                            "{}: {} was invalidated mid-flight, keeping it outdated",
                            self.name,
                            key
                        );
                        state.mark_outdated(key);
                    }
                    let event = match &result {
                        Ok(fetched) => {
                            tracing::debug!("{}: loaded {} ({} values)", self.name, key, fetched.len());
                            ResourceEvent::Loaded { key: key.clone() }
                        }
                        Err(error) => {
                            tracing::warn!("{}: {}", self.name, error);
                            ResourceEvent::Failed {
                                key: key.clone(),
                                error: error.to_string(),
                            }
                        }
                    };
                    (result, Some(event))
                }
            }
        };

        if let Some(event) = event {
            self.emit(event);
        }
        result
    }

    fn evict_after_release(&self, state: &mut State<K, V>, key: &ResourceKey<K>) -> Vec<K> {
        if self.options.eviction != EvictionPolicy::OnRelease {
            return Vec::new();
        }
        state.evict_unused(key)
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "loader panicked".to_string()
    }
}

/// Keyed cache backed by a [`Loader`]
pub struct CachedMapResource<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for CachedMapResource<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K: ResourceId, V: Clone + Send + Sync + 'static> CachedMapResource<K, V> {
    pub fn new(name: &str, loader: impl Loader<K, V>) -> Self {
        Self::with_options(name, loader, CacheOptions::default())
    }

    pub fn with_options(name: &str, loader: impl Loader<K, V>, options: CacheOptions) -> Self {
        let (events, _) = broadcast::channel(options.event_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                loader: Arc::new(loader),
                options,
                state: Mutex::new(State::new()),
                events,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of live usage tokens whose key intersects `key`
    pub fn ref_count(&self, key: &ResourceKey<K>) -> usize {
        self.inner.state.lock().ref_count(key)
    }

    /// Total number of live usage tokens
    pub fn use_count(&self) -> usize {
        self.inner.state.lock().uses.len()
    }

    /// Number of cached scalar entries
    pub fn entry_count(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Whether `id` is cached and nothing references it
    pub fn is_eviction_eligible(&self, id: &K) -> bool {
        let state = self.inner.state.lock();
        state.entries.contains_key(id) && state.ref_count(&ResourceKey::Scalar(id.clone())) == 0
    }

    pub fn loaded_at(&self, id: &K) -> Option<DateTime<Utc>> {
        self.inner.state.lock().entries.get(id)?.loaded_at
    }

    /// Evict every entry and alias no usage token covers
    pub fn collect_garbage(&self) -> Vec<K> {
        let mut evicted = {
            let mut state = self.inner.state.lock();

            let unused_aliases: Vec<ResourceKeyAlias> = state
                .aliases
                .keys()
                .filter(|alias| !state.uses.values().any(|used| used.as_alias() == Some(*alias)))
                .cloned()
                .collect();
            for alias in unused_aliases {
                state.aliases.remove(&alias);
            }

            let candidates: Vec<K> = state
                .entries
                .keys()
                .filter(|id| state.ref_count(&ResourceKey::Scalar((*id).clone())) == 0)
                .cloned()
                .collect();
            for id in &candidates {
                state.entries.remove(id);
            }
            candidates
        };
        evicted.sort();

        if !evicted.is_empty() {
            tracing::debug!("{}: collected {} unused entries", self.inner.name, evicted.len());
        }
        for id in &evicted {
            self.inner.emit(ResourceEvent::Evicted { id: id.clone() });
        }
        evicted
    }
}

impl<V: Clone + Send + Sync + 'static> CachedMapResource<(), V> {
    /// Single-value resource fed by a [`DataLoader`]
    pub fn from_data_loader(name: &str, loader: impl DataLoader<V>) -> Self {
        Self::new(name, DataLoaderAdapter(loader))
    }
}

impl<K: ResourceId, V: Clone + Send + Sync + 'static> Resource for CachedMapResource<K, V> {
    type Key = K;
    type Value = V;

    fn load(&self, key: &ResourceKey<K>, includes: &Includes) -> LoadFuture<V> {
        let (load_id, includes) = {
            let mut state = self.inner.state.lock();
            let includes = match state.in_flight.get(key) {
                Some(flight)
                    if flight.includes.covers(includes)
                        && !state.invalidated.contains(&flight.id) =>
                {
                    tracing::debug!("{}: joining in-flight load of {}", self.inner.name, key);
                    return flight.future.clone();
                }
                Some(flight) => flight.includes.union(includes),
                None => includes.clone(),
            };
            state.next_load_id += 1;
            (state.next_load_id, includes)
        };

        let weak: Weak<Inner<K, V>> = Arc::downgrade(&self.inner);
        let loader = Arc::clone(&self.inner.loader);
        let request = LoadRequest {
            key: key.clone(),
            includes: includes.clone(),
        };
        let settle_key = key.clone();
        let settle_includes = includes.clone();

        // Issued outside the state lock so loaders may read the resource.
        // Panics on either side of the call are caught.
        let call = std::panic::catch_unwind(AssertUnwindSafe(|| loader.load(request)));
        let future = async move {
            let outcome = match call {
                Ok(call) => AssertUnwindSafe(call).catch_unwind().await,
                Err(panic) => Err(panic),
            };
            match weak.upgrade() {
                Some(inner) => inner.settle(load_id, &settle_key, &settle_includes, outcome),
                None => Err(Arc::new(ResourceError::Interrupted {
                    key: settle_key.to_string(),
                    reason: "resource dropped".to_string(),
                })),
            }
        }
        .boxed()
        .shared();

        self.inner.state.lock().in_flight.insert(
            key.clone(),
            InFlight {
                id: load_id,
                includes: includes.clone(),
                future: future.clone(),
            },
        );

        tracing::debug!("{}: loading {} includes={}", self.inner.name, key, includes);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(future.clone());
        }
        future
    }

    fn get(&self, key: &ResourceKey<K>) -> Option<Fetched<V>> {
        let state = self.inner.state.lock();
        match key {
            ResourceKey::Scalar(id) => state.entries.get(id)?.value.clone().map(Fetched::One),
            _ => {
                let ids = key.expand(|alias| state.resolve(alias))?;
                let values: Vec<V> = ids
                    .iter()
                    .filter_map(|id| state.entries.get(id)?.value.clone())
                    .collect();
                if values.is_empty() && !ids.is_empty() {
                    return None;
                }
                Some(Fetched::Many(values))
            }
        }
    }

    fn is_loaded(&self, key: &ResourceKey<K>, includes: &Includes) -> bool {
        let state = self.inner.state.lock();
        let entry_loaded = |id: &K| {
            state
                .entries
                .get(id)
                .is_some_and(|entry| entry.is_loaded() && entry.includes.covers(includes))
        };
        match key {
            ResourceKey::Scalar(id) => entry_loaded(id),
            ResourceKey::List(ids) => ids.iter().all(entry_loaded),
            ResourceKey::Alias(alias) => state.aliases.get(alias).is_some_and(|entry| {
                entry.loaded && entry.includes.covers(includes) && entry.ids.iter().all(entry_loaded)
            }),
        }
    }

    fn is_loading(&self, key: &ResourceKey<K>) -> bool {
        let state = self.inner.state.lock();
        state.in_flight.keys().any(|flying| {
            flying.is_key_equal(key)
                || (flying.as_alias().is_none()
                    && key.as_alias().is_none()
                    && flying.intersects(key))
        })
    }

    fn is_outdated(&self, key: &ResourceKey<K>) -> bool {
        let state = self.inner.state.lock();
        let entry_outdated = |id: &K| {
            state
                .entries
                .get(id)
                .map_or(true, |entry| entry.outdated || !entry.is_loaded())
        };
        match key {
            ResourceKey::Scalar(id) => entry_outdated(id),
            ResourceKey::List(ids) => ids.iter().any(entry_outdated),
            ResourceKey::Alias(alias) => state.aliases.get(alias).map_or(true, |entry| {
                entry.outdated || !entry.loaded || entry.ids.iter().any(entry_outdated)
            }),
        }
    }

    fn mark_outdated(&self, key: &ResourceKey<K>) {
        self.inner.state.lock().mark_outdated(key);
        tracing::debug!("{}: marked {} outdated", self.inner.name, key);
        self.inner.emit(ResourceEvent::Outdated { key: key.clone() });
    }

    fn get_exception(&self, key: &ResourceKey<K>) -> Option<ResourceException> {
        let state = self.inner.state.lock();
        match key {
            ResourceKey::Scalar(id) => state
                .entries
                .get(id)?
                .exception
                .clone()
                .map(ResourceException::One),
            ResourceKey::List(ids) => {
                let slots: Vec<Option<Arc<ResourceError>>> = ids
                    .iter()
                    .map(|id| state.entries.get(id).and_then(|entry| entry.exception.clone()))
                    .collect();
                slots
                    .iter()
                    .any(Option::is_some)
                    .then_some(ResourceException::Many(slots))
            }
            ResourceKey::Alias(alias) => state
                .aliases
                .get(alias)?
                .exception
                .clone()
                .map(ResourceException::One),
        }
    }

    fn use_key(&self, key: &ResourceKey<K>) -> UsageToken {
        let token = UsageToken::generate();
        self.inner.state.lock().uses.insert(token.clone(), key.clone());
        tracing::trace!("{}: use {} token={}", self.inner.name, key, token);
        token
    }

    fn free(&self, key: &ResourceKey<K>, token: &UsageToken) -> Result<()> {
        let evicted = {
            let mut state = self.inner.state.lock();
            match state.uses.get(token) {
                None => {
                    return Err(ResourceError::UnknownToken {
                        token: token.to_string(),
                    })
                }
                Some(used) if !used.is_key_equal(key) => {
                    return Err(ResourceError::TokenKeyMismatch {
                        token: token.to_string(),
                        expected: used.to_string(),
                        actual: key.to_string(),
                    })
                }
                Some(_) => {}
            }
            state.uses.remove(token);
            tracing::trace!("{}: free {} token={}", self.inner.name, key, token);
            self.inner.evict_after_release(&mut state, key)
        };

        for id in evicted {
            self.inner.emit(ResourceEvent::Evicted { id });
        }
        Ok(())
    }

    fn has_use_id(&self, token: &UsageToken) -> bool {
        self.inner.state.lock().uses.contains_key(token)
    }

    fn is_intersect(&self, a: &ResourceKey<K>, b: &ResourceKey<K>) -> bool {
        let state = self.inner.state.lock();
        a.intersects_with(b, |alias| state.resolve(alias))
    }

    fn page_info(&self, key: &ResourceKey<K>) -> Option<PageInfo> {
        let alias = key.as_alias()?;
        self.inner.state.lock().aliases.get(alias)?.page_info.clone()
    }

    fn rebind(
        &self,
        old_key: &ResourceKey<K>,
        token: &UsageToken,
        new_key: &ResourceKey<K>,
    ) -> Result<UsageToken> {
        let (next, evicted) = {
            let mut state = self.inner.state.lock();
            match state.uses.get(token) {
                Some(used) if used.is_key_equal(old_key) => {}
                Some(used) => {
                    return Err(ResourceError::TokenKeyMismatch {
                        token: token.to_string(),
                        expected: used.to_string(),
                        actual: old_key.to_string(),
                    })
                }
                None => {
                    return Err(ResourceError::UnknownToken {
                        token: token.to_string(),
                    })
                }
            }
            let next = UsageToken::generate();
            state.uses.insert(next.clone(), new_key.clone());
            state.uses.remove(token);
            let evicted = self.inner.evict_after_release(&mut state, old_key);
            (next, evicted)
        };

        for id in evicted {
            self.inner.emit(ResourceEvent::Evicted { id });
        }
        Ok(next)
    }

    fn subscribe(&self) -> broadcast::Receiver<ResourceEvent<K>> {
        self.inner.events.subscribe()
    }
}
