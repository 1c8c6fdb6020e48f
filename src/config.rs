//! Configuration Management
//!
//! Handles persistent configuration storage for rescache.

use crate::resource::cached::DEFAULT_EVENT_BUFFER;
use crate::resource::{CacheOptions, EvictionPolicy};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Items per page for paginated listings
    #[serde(default)]
    pub page_size: Option<usize>,
    /// When unreferenced entries leave the cache
    #[serde(default)]
    pub eviction: Option<EvictionPolicy>,
    /// Capacity of each resource's event channel
    #[serde(default)]
    pub event_buffer: Option<usize>,
    /// Simulated backend latency for the demo loader
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

impl Config {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("rescache").join("config.json"))
    }

    /// Where the binary writes its log file
    pub fn log_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("rescache"))
            .or_else(|| dirs::home_dir().map(|home| home.join(".rescache")))
            .unwrap_or_default()
            .join("rescache.log")
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path; a missing or malformed file yields defaults
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                tracing::warn!("ignoring malformed config {:?}: {}", path, err);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get effective page size (CLI > config > default)
    pub fn effective_page_size(&self, cli: Option<usize>) -> usize {
        cli.or(self.page_size)
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }

    /// Get effective latency (CLI > config > none)
    pub fn effective_latency(&self, cli: Option<u64>) -> Duration {
        Duration::from_millis(cli.or(self.latency_ms).unwrap_or(0))
    }

    pub fn effective_eviction(&self) -> EvictionPolicy {
        self.eviction.unwrap_or_default()
    }

    /// Options for every resource built by the binary
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            eviction: self.effective_eviction(),
            event_buffer: self.event_buffer.unwrap_or(DEFAULT_EVENT_BUFFER).max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("rescache-test-{}", uuid::Uuid::new_v4()))
            .join("config.json")
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load_from(&scratch_path());
        assert_eq!(config, Config::default());
        assert_eq!(config.effective_page_size(None), DEFAULT_PAGE_SIZE);
        assert_eq!(config.effective_eviction(), EvictionPolicy::Manual);
    }

    #[test]
    fn test_round_trip_through_disk() {
        let path = scratch_path();
        let config = Config {
            page_size: Some(25),
            eviction: Some(EvictionPolicy::OnRelease),
            event_buffer: Some(16),
            latency_ms: Some(5),
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path);
        assert_eq!(loaded, config);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"on_release\""));

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_malformed_file_yields_defaults() {
        let path = scratch_path();
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).unwrap();
        }
        std::fs::write(&path, "{ not json").unwrap();

        assert_eq!(Config::load_from(&path), Config::default());

        if let Some(dir) = path.parent() {
            let _ = std::fs::remove_dir_all(dir);
        }
    }

    #[test]
    fn test_cli_overrides_config() {
        let config = Config {
            page_size: Some(25),
            latency_ms: Some(10),
            ..Config::default()
        };
        assert_eq!(config.effective_page_size(Some(5)), 5);
        assert_eq!(config.effective_page_size(None), 25);
        assert_eq!(config.effective_page_size(Some(0)), DEFAULT_PAGE_SIZE);
        assert_eq!(config.effective_latency(None), Duration::from_millis(10));
    }

    #[test]
    fn test_cache_options() {
        let options = Config {
            eviction: Some(EvictionPolicy::OnRelease),
            event_buffer: Some(0),
            ..Config::default()
        }
        .cache_options();
        assert_eq!(options.eviction, EvictionPolicy::OnRelease);
        assert_eq!(options.event_buffer, 1);
    }

    #[test]
    fn test_log_file_sits_next_to_config() {
        let log = Config::log_path();
        assert!(log.ends_with("rescache.log"));
        if let Some(config) = Config::config_path() {
            assert_eq!(log.parent(), config.parent());
        }
    }
}
