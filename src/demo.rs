//! Demo Session
//!
//! Scripted walk through the cache against an in-memory connection catalog:
//! shared mount of one record, a paginated listing, refresh, teardown and
//! garbage collection.

use crate::binding::{BindingOptions, MapBinding, ResourceBinding};
use crate::pagination::Pagination;
use crate::resource::{
    CacheOptions, CachedMapResource, Includes, MemoryLoader, Resource, ResourceKey,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const ENGINES: [&str; 3] = ["postgres", "mysql", "sqlite"];

/// Record served by the demo backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub engine: String,
}

pub type Connections = CachedMapResource<String, Connection>;

/// Parameters of a demo run
#[derive(Debug, Clone)]
pub struct DemoOptions {
    pub connections: usize,
    pub page_size: usize,
    /// Pages to append after the first one
    pub pages: usize,
    pub latency: Duration,
    pub cache: CacheOptions,
}

impl Default for DemoOptions {
    fn default() -> Self {
        Self {
            connections: 120,
            page_size: crate::config::DEFAULT_PAGE_SIZE,
            pages: 2,
            latency: Duration::ZERO,
            cache: CacheOptions::default(),
        }
    }
}

/// What the session observed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DemoReport {
    pub shared_value: Option<Connection>,
    pub shared_loader_calls: usize,
    pub pages_loaded: usize,
    pub items_listed: usize,
    pub has_more: bool,
    pub outdated_after_refresh: usize,
    pub evicted: usize,
    pub remaining_uses: usize,
    pub loader_calls: usize,
}

impl fmt::Display for DemoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self
            .shared_value
            .as_ref()
            .map(|conn| format!("{} ({})", conn.name, conn.engine))
            .unwrap_or_else(|| "-".to_string());
        writeln!(f, "shared mount:        {} [{} loader call(s)]", shared, self.shared_loader_calls)?;
        writeln!(f, "pages loaded:        {}", self.pages_loaded)?;
        writeln!(f, "items listed:        {}", self.items_listed)?;
        writeln!(f, "more available:      {}", self.has_more)?;
        writeln!(f, "outdated on refresh: {}", self.outdated_after_refresh)?;
        writeln!(f, "evicted on GC:       {}", self.evicted)?;
        writeln!(f, "remaining uses:      {}", self.remaining_uses)?;
        write!(f, "total loader calls:  {}", self.loader_calls)
    }
}

pub fn connection_id(n: usize) -> String {
    format!("conn-{:03}", n)
}

/// Backend seeded with `count` connection records
pub fn catalog(count: usize) -> MemoryLoader<Connection> {
    MemoryLoader::new((1..=count).map(|n| {
        let id = connection_id(n);
        let record = Connection {
            id: id.clone(),
            name: format!("db{}", n),
            engine: ENGINES[n % ENGINES.len()].to_string(),
        };
        (id, record)
    }))
}

/// Run the scripted session
pub async fn run(options: &DemoOptions) -> Result<DemoReport> {
    let loader = catalog(options.connections).with_latency(options.latency);
    let resource: Arc<Connections> = Arc::new(CachedMapResource::with_options(
        "connections",
        loader.clone(),
        options.cache.clone(),
    ));
    let mut report = DemoReport::default();

    // Two consumers of one key share a single load
    let first_key = ResourceKey::Scalar(connection_id(1));
    let header = ResourceBinding::new(Arc::clone(&resource), Some(first_key.clone()));
    let sidebar = ResourceBinding::with_options(
        Arc::clone(&resource),
        Some(first_key.clone()),
        Includes::none(),
        BindingOptions::new().silent(),
    );
    let (a, b) = futures::join!(header.load(), sidebar.load());
    a.context("header load failed")?;
    b.context("sidebar load failed")?;
    report.shared_value = sidebar.data();
    report.shared_loader_calls = loader.call_count();
    tracing::info!(
        "shared mount of {} settled after {} loader call(s)",
        first_key,
        report.shared_loader_calls
    );

    // Paginated listing
    let pages = Pagination::alias(Arc::clone(&resource), "connections", options.page_size);
    pages.load().await.context("first page failed")?;
    for _ in 0..options.pages {
        if !pages.load_more() {
            break;
        }
        pages.load().await.context("next page failed")?;
    }
    let loaded = pages.loaded();
    report.pages_loaded = loaded.len();
    report.items_listed = pages.items().len();
    report.has_more = pages.has_next_page();

    // The newest page, as a list view would consume it
    let view = MapBinding::new(Arc::clone(&resource), Some(pages.key()));
    tracing::info!("page view shows {} rows", view.data().len());

    pages.refresh();
    report.outdated_after_refresh = loaded
        .iter()
        .filter(|key| resource.is_outdated(key))
        .count();
    pages.load().await.context("reload of first page failed")?;

    // Teardown
    header.unmount()?;
    sidebar.unmount()?;
    view.unmount()?;
    drop(pages);

    report.evicted = resource.collect_garbage().len();
    report.remaining_uses = resource.use_count();
    report.loader_calls = loader.call_count();
    tracing::info!(
        "session done: {} evicted, {} loader calls",
        report.evicted,
        report.loader_calls
    );
    Ok(report)
}
