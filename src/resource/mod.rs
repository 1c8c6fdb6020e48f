//! Resource layer
//!
//! This module defines the keyed cache contract consumers are written
//! against, and the in-memory implementation that fulfils it.
//!
//! # Architecture
//!
//! - [`key`] - Scalar, list and alias keys with equality and intersection rules
//! - [`includes`] - Order-insensitive field selectors attached to loads
//! - [`contract`] - The [`Resource`] trait, shared load futures and events
//! - [`usage`] - Scoped usage handles that free their token exactly once
//! - [`loader`] - The opaque fetch behind a cache
//! - [`cached`] - [`CachedMapResource`], the reference-counted cache
//! - [`memory`] - [`MemoryLoader`], an ordered in-memory backend
//!
//! # Example
//!
//! ```ignore
//! use rescache::resource::{CachedMapResource, Includes, MemoryLoader, Resource, ResourceKey};
//!
//! async fn first_connection() -> anyhow::Result<()> {
//!     let loader = MemoryLoader::new([("conn-1", serde_json::json!({"name": "db1"}))]);
//!     let resource = CachedMapResource::new("connections", loader);
//!     let value = resource.load(&ResourceKey::scalar("conn-1".to_string()), &Includes::none()).await?;
//!     println!("{:?}", value);
//!     Ok(())
//! }
//! ```

pub mod cached;
pub mod contract;
mod error;
pub mod includes;
pub mod key;
pub mod loader;
pub mod memory;
pub mod usage;

pub use cached::{CacheOptions, CachedMapResource, DataResource, EvictionPolicy};
pub use contract::{
    Fetched, LoadFuture, LoadResult, Resource, ResourceEvent, ResourceException, UsageToken,
};
pub use error::{ResourceError, Result};
pub use includes::Includes;
pub use key::{PageInfo, ResourceId, ResourceKey, ResourceKeyAlias};
pub use loader::{DataLoader, LoadRequest, LoadResponse, Loader};
pub use memory::MemoryLoader;
pub use usage::UsageHandle;
