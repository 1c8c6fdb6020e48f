//! Consumer bindings
//!
//! Bindings connect one consumer to a [`Resource`](crate::resource::Resource):
//! they hold a usage claim on a key, trigger loads when a read needs them,
//! and turn failures and in-flight loads into values a caller can act on.
//!
//! # Architecture
//!
//! - [`ResourceBinding`] - One entity by key
//! - [`MapBinding`] - A list or alias key, with per-id exceptions
//! - [`DataBinding`] - A single-value resource, tracking the previous value
//! - [`BindingOptions`] - Activation, suspense, silence, hooks and preload gates
//! - [`Suspense`] - Pending / ready / failed outcome of a read
//! - [`ErrorBoundary`] - Collects dispatched failures and builds a [`Fallback`]
//!
//! A binding never caches values itself. Two bindings of the same key see
//! the same value and, for resource-native failures, the same error instance.
//!
//! # Example
//!
//! ```ignore
//! let binding = ResourceBinding::new(resource, Some(ResourceKey::scalar("conn-1".to_string())));
//! match binding.read() {
//!     Suspense::Pending(signal) => signal.await,
//!     Suspense::Ready(value) => println!("{:?}", value),
//!     Suspense::Failed(exception) => eprintln!("{}", exception),
//! }
//! ```

mod state;
pub mod data;
pub mod error;
pub mod map;
pub mod options;
mod reactive;
pub mod single;
pub mod suspense;

pub use state::{BindingResult, BindingStatus, LoadHandle};
pub use data::{DataBinding, OnDataChange};
pub use error::{BindingException, ErrorBoundary, ErrorContext, Fallback, LoadingError};
pub use map::MapBinding;
pub use options::{BindingOptions, LoadableState, OnData, OnError};
pub use reactive::Computed;
pub use single::ResourceBinding;
pub use suspense::{Suspended, Suspense};
