//! Error Bridge
//!
//! Classifies binding failures and routes them to hooks and error contexts.
//!
//! - A *resource error* is the very instance the resource recorded against
//!   the key. It is shared by every consumer of that key and only goes away
//!   when the key loads successfully.
//! - A *loading error* happened around the load (a failed dependency, an
//!   interrupted loader) and was not recorded by the resource. It belongs to
//!   one binding and carries a `refresh` closure that clears it.

use crate::resource::ResourceError;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

type Refresh = Arc<dyn Fn() + Send + Sync>;

/// Local failure bound to the binding that produced it
#[derive(Clone)]
pub struct LoadingError {
    source: Arc<ResourceError>,
    refresh: Refresh,
}

impl LoadingError {
    pub fn new<F>(source: Arc<ResourceError>, refresh: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            source,
            refresh: Arc::new(refresh),
        }
    }

    pub fn source(&self) -> &Arc<ResourceError> {
        &self.source
    }

    /// Clear the failure so a later read can load again
    pub fn refresh(&self) {
        (self.refresh)();
    }
}

impl fmt::Debug for LoadingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingError")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for LoadingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

impl std::error::Error for LoadingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Failure observed by a binding
#[derive(Debug, Clone)]
pub enum BindingException {
    Resource(Arc<ResourceError>),
    Loading(LoadingError),
}

impl BindingException {
    pub fn error(&self) -> &Arc<ResourceError> {
        match self {
            Self::Resource(error) => error,
            Self::Loading(error) => error.source(),
        }
    }

    pub fn is_resource_error(&self) -> bool {
        matches!(self, Self::Resource(_))
    }

    /// Whether a refresh closure is attached
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Loading(_))
    }

    /// Run the refresh closure if there is one
    pub fn refresh(&self) -> bool {
        match self {
            Self::Loading(error) => {
                error.refresh();
                true
            }
            Self::Resource(_) => false,
        }
    }

    /// Same underlying error instance
    pub fn same_instance(&self, other: &BindingException) -> bool {
        Arc::ptr_eq(self.error(), other.error())
    }
}

impl fmt::Display for BindingException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error())
    }
}

impl std::error::Error for BindingException {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.error().as_ref())
    }
}

/// Enclosing error-catching scope
pub trait ErrorContext: Send + Sync {
    fn catch(&self, exception: &BindingException);
}

/// Dispatches each distinct failure once
pub(crate) struct ErrorBridge {
    dispatched: Mutex<Vec<Arc<ResourceError>>>,
    silent: bool,
    context: Option<Arc<dyn ErrorContext>>,
    on_error: Option<Arc<dyn Fn(&BindingException) + Send + Sync>>,
}

impl ErrorBridge {
    pub(crate) fn new(
        silent: bool,
        context: Option<Arc<dyn ErrorContext>>,
        on_error: Option<Arc<dyn Fn(&BindingException) + Send + Sync>>,
    ) -> Self {
        Self {
            dispatched: Mutex::new(Vec::new()),
            silent,
            context,
            on_error,
        }
    }

    /// Dispatch `exception` unless this instance was dispatched already
    pub(crate) fn observe(&self, exception: &BindingException) -> bool {
        {
            let mut dispatched = self.dispatched.lock();
            // Instances only we still hold can never be observed again
            dispatched.retain(|seen| Arc::strong_count(seen) > 1);
            if dispatched
                .iter()
                .any(|seen| Arc::ptr_eq(seen, exception.error()))
            {
                return false;
            }
            // Holding the Arc keeps the address from being reused
            dispatched.push(Arc::clone(exception.error()));
        }

        tracing::debug!("dispatching binding failure: {}", exception);
        if let Some(on_error) = &self.on_error {
            on_error(exception);
        }
        if !self.silent {
            if let Some(context) = &self.context {
                context.catch(exception);
            }
        }
        true
    }
}

/// What an error boundary shows instead of its content
pub struct Fallback {
    pub message: String,
    retry: Option<Refresh>,
}

impl Fallback {
    pub fn can_retry(&self) -> bool {
        self.retry.is_some()
    }

    /// Invoke the retry affordance; false when the failure is not retryable
    pub fn retry(&self) -> bool {
        match &self.retry {
            Some(retry) => {
                retry();
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fallback")
            .field("message", &self.message)
            .field("can_retry", &self.can_retry())
            .finish()
    }
}

/// Error context that keeps what it caught
#[derive(Default)]
pub struct ErrorBoundary {
    caught: Mutex<Vec<BindingException>>,
}

impl ErrorBoundary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_error(&self) -> bool {
        !self.caught.lock().is_empty()
    }

    pub fn caught(&self) -> Vec<BindingException> {
        self.caught.lock().clone()
    }

    /// Fallback for the latest failure.
    ///
    /// A retry affordance is offered when `on_refresh` is given or when the
    /// failure carries its own refresh closure.
    pub fn fallback(&self, on_refresh: Option<Arc<dyn Fn() + Send + Sync>>) -> Option<Fallback> {
        let exception = self.caught.lock().last().cloned()?;
        let retry: Option<Refresh> = match (on_refresh, &exception) {
            (Some(on_refresh), _) => Some(on_refresh),
            (None, BindingException::Loading(error)) => {
                let error = error.clone();
                Some(Arc::new(move || error.refresh()))
            }
            (None, BindingException::Resource(_)) => None,
        };
        Some(Fallback {
            message: exception.to_string(),
            retry,
        })
    }

    pub fn reset(&self) {
        self.caught.lock().clear();
    }
}

impl ErrorContext for ErrorBoundary {
    fn catch(&self, exception: &BindingException) {
        tracing::debug!("error boundary caught: {}", exception);
        self.caught.lock().push(exception.clone());
    }
}
