//! Binding Options
//!
//! Consumer-facing configuration recognized by every binding variant.

use super::error::{BindingException, ErrorContext};
use crate::resource::{Fetched, Resource};
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;

/// Post-load hook, called with the loaded value(s) and the resource
pub type OnData<R> =
    Arc<dyn Fn(&Fetched<<R as Resource>::Value>, &R) + Send + Sync>;

/// Failure hook, called once per distinct exception
pub type OnError = Arc<dyn Fn(&BindingException) + Send + Sync>;

/// Anything a binding can wait on before loading
pub trait LoadableState: Send + Sync {
    fn is_loaded(&self) -> bool;
    fn is_loading(&self) -> bool;
    fn is_outdated(&self) -> bool;
    fn is_error(&self) -> bool;

    /// Load (or join the load of) this state
    fn load_state(&self) -> BoxFuture<'static, Result<(), BindingException>>;
}

/// Options of a consumer binding
pub struct BindingOptions<R: Resource> {
    /// While false no load is triggered
    pub active: bool,
    /// Suspend eagerly, even while a stale value could be shown
    pub force_suspense: bool,
    /// Do not dispatch failures to the error context
    pub silent: bool,
    pub on_data: Option<OnData<R>>,
    pub on_error: Option<OnError>,
    /// Dependencies that must be loaded, fresh and error-free first
    pub preload: Vec<Arc<dyn LoadableState>>,
    pub error_context: Option<Arc<dyn ErrorContext>>,
}

impl<R: Resource> Default for BindingOptions<R> {
    fn default() -> Self {
        Self {
            active: true,
            force_suspense: false,
            silent: false,
            on_data: None,
            on_error: None,
            preload: Vec::new(),
            error_context: None,
        }
    }
}

impl<R: Resource> BindingOptions<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn force_suspense(mut self) -> Self {
        self.force_suspense = true;
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn on_data<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Fetched<R::Value>, &R) + Send + Sync + 'static,
    {
        self.on_data = Some(Arc::new(hook));
        self
    }

    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&BindingException) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }

    pub fn preload(mut self, dependency: Arc<dyn LoadableState>) -> Self {
        self.preload.push(dependency);
        self
    }

    pub fn error_context(mut self, context: Arc<dyn ErrorContext>) -> Self {
        self.error_context = Some(context);
        self
    }
}

impl<R: Resource> fmt::Debug for BindingOptions<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingOptions")
            .field("active", &self.active)
            .field("force_suspense", &self.force_suspense)
            .field("silent", &self.silent)
            .field("on_data", &self.on_data.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("preload", &self.preload.len())
            .field("error_context", &self.error_context.is_some())
            .finish()
    }
}
