//! Pagination Controller
//!
//! Accumulates cursor pages of a resource. Each page is its own key, built
//! by a key function from the page size and the cursor of the page before
//! it. The controller keeps a claim on every page key it produced until it
//! is reset, so extended pages stay cached while they are shown.

use crate::resource::{Includes, LoadFuture, PageInfo, Resource, ResourceKey, UsageHandle};
use parking_lot::Mutex;
use std::sync::Arc;

/// Builds the key of a page from the page size and the exclusive cursor
pub type GetKey<K> = Arc<dyn Fn(usize, Option<&str>) -> ResourceKey<K> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationPhase {
    /// Only the first page is loaded
    Initial,
    /// At least one page was appended with `load_more`
    Extending,
}

struct PageState<R: Resource, D> {
    key: ResourceKey<R::Key>,
    after: Option<String>,
    loaded: Vec<UsageHandle<R>>,
    phase: PaginationPhase,
    dependencies: D,
}

/// Cursor-accumulating pager over a resource
pub struct Pagination<R: Resource, D = ()> {
    resource: Arc<R>,
    page_size: usize,
    get_key: GetKey<R::Key>,
    includes: Includes,
    state: Mutex<PageState<R, D>>,
}

impl<R: Resource> Pagination<R, ()> {
    /// Pages over the alias `name` with the standard `size`/`after` params
    pub fn alias(resource: Arc<R>, name: &str, page_size: usize) -> Self {
        let name = name.to_string();
        Self::new(
            resource,
            page_size,
            Arc::new(move |size: usize, after: Option<&str>| {
                ResourceKey::page(&name, size, after)
            }),
            (),
        )
    }
}

impl<R: Resource, D: PartialEq> Pagination<R, D> {
    pub fn new(resource: Arc<R>, page_size: usize, get_key: GetKey<R::Key>, dependencies: D) -> Self {
        let key = get_key(page_size, None);
        let first = UsageHandle::acquire(Arc::clone(&resource), key.clone());
        Self {
            resource,
            page_size,
            get_key,
            includes: Includes::none(),
            state: Mutex::new(PageState {
                key,
                after: None,
                loaded: vec![first],
                phase: PaginationPhase::Initial,
                dependencies,
            }),
        }
    }

    pub fn with_includes(mut self, includes: Includes) -> Self {
        self.includes = includes;
        self
    }

    pub fn resource(&self) -> &Arc<R> {
        &self.resource
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Key of the newest page
    pub fn key(&self) -> ResourceKey<R::Key> {
        self.state.lock().key.clone()
    }

    /// Cursor the newest page starts after
    pub fn after(&self) -> Option<String> {
        self.state.lock().after.clone()
    }

    /// Every page key produced since the last reset, oldest first
    pub fn loaded(&self) -> Vec<ResourceKey<R::Key>> {
        self.state
            .lock()
            .loaded
            .iter()
            .map(|handle| handle.key().clone())
            .collect()
    }

    pub fn phase(&self) -> PaginationPhase {
        self.state.lock().phase
    }

    fn page_info(&self) -> Option<PageInfo> {
        self.resource.page_info(&self.key())
    }

    /// Read from the resource every time, never stored
    pub fn has_next_page(&self) -> bool {
        self.page_info()
            .is_some_and(|info| info.has_next_page && info.end_cursor.is_some())
    }

    /// Load the newest page
    pub fn load(&self) -> LoadFuture<R::Value> {
        let key = self.key();
        self.resource.load(&key, &self.includes)
    }

    pub fn is_loading(&self) -> bool {
        self.resource.is_loading(&self.key())
    }

    /// Append the page after the newest one. No-op without a next page.
    pub fn load_more(&self) -> bool {
        let mut state = self.state.lock();
        let cursor = match self.resource.page_info(&state.key) {
            Some(PageInfo {
                end_cursor: Some(cursor),
                has_next_page: true,
            }) => cursor,
            _ => return false,
        };

        let key = (self.get_key)(self.page_size, Some(&cursor));
        tracing::debug!("pagination: extending to {} after {}", key, cursor);
        state
            .loaded
            .push(UsageHandle::acquire(Arc::clone(&self.resource), key.clone()));
        state.key = key;
        state.after = Some(cursor);
        state.phase = PaginationPhase::Extending;
        true
    }

    /// Mark every produced page outdated, then start over
    pub fn refresh(&self) {
        let loaded = self.loaded();
        tracing::debug!("pagination: refreshing {} pages", loaded.len());
        for key in &loaded {
            self.resource.mark_outdated(key);
        }
        self.reset();
    }

    /// Back to the first page, keeping cached entries as they are
    pub fn reset(&self) {
        let key = (self.get_key)(self.page_size, None);
        let released = {
            let mut state = self.state.lock();
            let first = UsageHandle::acquire(Arc::clone(&self.resource), key.clone());
            let released = std::mem::replace(&mut state.loaded, vec![first]);
            state.key = key;
            state.after = None;
            state.phase = PaginationPhase::Initial;
            released
        };
        // Freed after the new claim so shared entries are never unreferenced
        drop(released);
    }

    /// Start over when the dependencies changed
    pub fn set_dependencies(&self, dependencies: D) -> bool {
        {
            let mut state = self.state.lock();
            if state.dependencies == dependencies {
                return false;
            }
            state.dependencies = dependencies;
        }
        tracing::debug!("pagination: dependencies changed, resetting");
        self.reset();
        true
    }

    /// Values of every loaded page, in page order
    pub fn items(&self) -> Vec<R::Value> {
        self.loaded()
            .iter()
            .filter_map(|key| self.resource.get(key))
            .flat_map(|fetched| fetched.into_vec())
            .collect()
    }
}
