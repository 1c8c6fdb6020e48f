//! Loaders
//!
//! The opaque fetch behind a cached resource. How a loader talks to its
//! backend is its own business; the cache only sees requests and responses.

use super::includes::Includes;
use super::key::{PageInfo, ResourceKey};
use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};

/// What the cache asks a loader for
#[derive(Debug, Clone)]
pub struct LoadRequest<K> {
    pub key: ResourceKey<K>,
    pub includes: Includes,
}

/// What a loader answers with
#[derive(Debug)]
pub struct LoadResponse<K, V> {
    /// Loaded values, in the order the key (or alias) resolves to
    pub items: Vec<(K, V)>,
    /// Ids that failed individually
    pub failures: Vec<(K, anyhow::Error)>,
    /// Cursor metadata for paged aliases
    pub page_info: Option<PageInfo>,
}

impl<K, V> LoadResponse<K, V> {
    pub fn new(items: Vec<(K, V)>) -> Self {
        Self {
            items,
            failures: Vec::new(),
            page_info: None,
        }
    }

    pub fn with_page_info(mut self, page_info: PageInfo) -> Self {
        self.page_info = Some(page_info);
        self
    }

    pub fn with_failure(mut self, id: K, error: anyhow::Error) -> Self {
        self.failures.push((id, error));
        self
    }
}

/// Fetches values for keyed requests
pub trait Loader<K, V>: Send + Sync + 'static {
    fn load(&self, request: LoadRequest<K>) -> BoxFuture<'static, Result<LoadResponse<K, V>>>;
}

/// Fetches the one value of a single-value resource
pub trait DataLoader<V>: Send + Sync + 'static {
    fn load(&self, includes: Includes) -> BoxFuture<'static, Result<V>>;
}

/// Runs a [`DataLoader`] as a keyed loader with the unit key
pub(crate) struct DataLoaderAdapter<L>(pub L);

impl<V, L> Loader<(), V> for DataLoaderAdapter<L>
where
    L: DataLoader<V>,
    V: Send + 'static,
{
    fn load(&self, request: LoadRequest<()>) -> BoxFuture<'static, Result<LoadResponse<(), V>>> {
        self.0
            .load(request.includes)
            .map(|result| result.map(|value| LoadResponse::new(vec![((), value)])))
            .boxed()
    }
}
