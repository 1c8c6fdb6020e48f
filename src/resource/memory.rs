//! Memory Loader
//!
//! An ordered in-memory backend for [`CachedMapResource`](super::CachedMapResource).
//! Aliases page over the records in id order: `size` limits the page and
//! `after` is the exclusive cursor. Faults, latency and a gate that holds
//! loads in flight can be switched on to exercise consumers.

use super::key::{PageInfo, ResourceKey};
use super::loader::{LoadRequest, LoadResponse, Loader};
use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

struct MemoryInner<V> {
    records: Mutex<BTreeMap<String, V>>,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
    latency: Mutex<Option<Duration>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    requests: Mutex<Vec<LoadRequest<String>>>,
}

/// In-memory loader keyed by string ids
pub struct MemoryLoader<V> {
    inner: Arc<MemoryInner<V>>,
}

impl<V> Clone for MemoryLoader<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: Clone + Send + Sync + 'static> MemoryLoader<V> {
    pub fn new<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(MemoryInner {
                records: Mutex::new(records.into_iter().map(|(id, v)| (id.into(), v)).collect()),
                failing: Mutex::new(HashSet::new()),
                panicking: Mutex::new(HashSet::new()),
                latency: Mutex::new(None),
                gate: Mutex::new(None),
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Delay every response
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.inner.latency.lock() = Some(latency);
        self
    }

    pub fn insert(&self, id: &str, value: V) {
        self.inner.records.lock().insert(id.to_string(), value);
    }

    pub fn remove(&self, id: &str) -> Option<V> {
        self.inner.records.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.inner.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail loads of an id (or alias name) until [`recover`](Self::recover)
    pub fn fail(&self, id: &str) {
        self.inner.failing.lock().insert(id.to_string());
    }

    pub fn recover(&self, id: &str) {
        self.inner.failing.lock().remove(id);
        self.inner.panicking.lock().remove(id);
    }

    /// Panic inside the load future of a scalar id
    pub fn panic_on(&self, id: &str) {
        self.inner.panicking.lock().insert(id.to_string());
    }

    /// Hold every subsequent load until a permit is added to the returned
    /// semaphore. Each load consumes one permit.
    pub fn gate(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.inner.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    /// Stop gating loads
    pub fn open_gate(&self) {
        if let Some(gate) = self.inner.gate.lock().take() {
            gate.close();
        }
    }

    /// Number of loads that reached the backend
    pub fn call_count(&self) -> usize {
        self.inner.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<LoadRequest<String>> {
        self.inner.requests.lock().clone()
    }
}

impl<V: Clone> MemoryInner<V> {
    fn respond(&self, request: &LoadRequest<String>) -> Result<LoadResponse<String, V>> {
        let records = self.records.lock();
        let failing = self.failing.lock().clone();

        match &request.key {
            ResourceKey::Scalar(id) => {
                if self.panicking.lock().contains(id) {
                    panic!("memory loader told to panic on '{}'", id);
                }
                if failing.contains(id) {
                    anyhow::bail!("backend refused '{}'", id);
                }
                let items = records
                    .get(id)
                    .map(|value| (id.clone(), value.clone()))
                    .into_iter()
                    .collect();
                Ok(LoadResponse::new(items))
            }
            ResourceKey::List(ids) => {
                let mut response = LoadResponse::new(Vec::new());
                for id in ids {
                    if failing.contains(id) {
                        response = response.with_failure(id.clone(), anyhow::anyhow!("backend refused '{}'", id));
                    } else if let Some(value) = records.get(id) {
                        response.items.push((id.clone(), value.clone()));
                    }
                }
                Ok(response)
            }
            ResourceKey::Alias(alias) => {
                if failing.contains(&alias.name) {
                    anyhow::bail!("backend refused query {}", alias);
                }

                let after = alias.after();
                let mut rest = records
                    .iter()
                    .filter(|(id, _)| after.map_or(true, |cursor| id.as_str() > cursor))
                    .map(|(id, value)| (id.clone(), value.clone()));

                match alias.page_size() {
                    Some(size) => {
                        let page: Vec<(String, V)> = rest.by_ref().take(size).collect();
                        let has_next_page = rest.next().is_some();
                        let end_cursor = page.last().map(|(id, _)| id.clone());
                        Ok(LoadResponse::new(page).with_page_info(PageInfo {
                            end_cursor,
                            has_next_page,
                        }))
                    }
                    None => Ok(LoadResponse::new(rest.collect())),
                }
            }
        }
    }
}

impl<V: Clone + Send + Sync + 'static> Loader<String, V> for MemoryLoader<V> {
    fn load(&self, request: LoadRequest<String>) -> BoxFuture<'static, Result<LoadResponse<String, V>>> {
        tracing::trace!("memory loader: {} includes={}", request.key, request.includes);
        self.inner.requests.lock().push(request.clone());

        let inner = Arc::clone(&self.inner);
        async move {
            let gate = inner.gate.lock().clone();
            if let Some(gate) = gate {
                // A closed gate lets everything through
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }

            let latency = *inner.latency.lock();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            inner.respond(&request)
        }
        .boxed()
    }
}
