//! rescache
//!
//! Client-side resource cache: a keyed, reference-counted [`resource`] layer,
//! consumer [`binding`]s with deduplicated loads and suspense-style reads,
//! and a cursor [`pagination`] controller.

pub mod binding;
pub mod config;
pub mod demo;
pub mod pagination;
pub mod resource;

/// Version injected at compile time via RESCACHE_VERSION env var,
/// or "dev" for local builds.
pub const VERSION: &str = match option_env!("RESCACHE_VERSION") {
    Some(v) => v,
    None => "dev",
};
