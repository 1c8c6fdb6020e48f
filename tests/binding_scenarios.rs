//! Integration tests for consumer bindings
//!
//! These tests drive bindings against a cached resource backed by the
//! in-memory loader, covering shared state, reloads and failure routing.

use parking_lot::Mutex;
use rescache::binding::{
    BindingOptions, ErrorBoundary, ErrorContext, LoadableState, ResourceBinding, Suspense,
};
use rescache::resource::{
    CachedMapResource, Fetched, Includes, LoadFuture, MemoryLoader, PageInfo, Resource,
    ResourceError, ResourceEvent, ResourceException, ResourceKey, UsageToken,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::broadcast;

type Connections = CachedMapResource<String, Value>;

fn catalog() -> MemoryLoader<Value> {
    MemoryLoader::new([
        ("conn-1", json!({"name": "db1"})),
        ("conn-2", json!({"name": "db2"})),
        ("A", json!({"name": "shared"})),
    ])
}

fn key(id: &str) -> ResourceKey<String> {
    ResourceKey::Scalar(id.to_string())
}

/// Resource wrapper that logs the calls a binding makes
struct Recording {
    inner: Connections,
    calls: Mutex<Vec<String>>,
}

impl Recording {
    fn new(inner: Connections) -> Self {
        Self {
            inner,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

impl Resource for Recording {
    type Key = String;
    type Value = Value;

    fn load(&self, key: &ResourceKey<String>, includes: &Includes) -> LoadFuture<Value> {
        let outdated = self.inner.is_outdated(key);
        self.calls.lock().push(format!("load {} outdated={}", key, outdated));
        self.inner.load(key, includes)
    }

    fn get(&self, key: &ResourceKey<String>) -> Option<Fetched<Value>> {
        self.inner.get(key)
    }

    fn is_loaded(&self, key: &ResourceKey<String>, includes: &Includes) -> bool {
        self.inner.is_loaded(key, includes)
    }

    fn is_loading(&self, key: &ResourceKey<String>) -> bool {
        self.inner.is_loading(key)
    }

    fn is_outdated(&self, key: &ResourceKey<String>) -> bool {
        self.inner.is_outdated(key)
    }

    fn mark_outdated(&self, key: &ResourceKey<String>) {
        self.calls.lock().push(format!("mark_outdated {}", key));
        self.inner.mark_outdated(key);
    }

    fn get_exception(&self, key: &ResourceKey<String>) -> Option<ResourceException> {
        self.inner.get_exception(key)
    }

    fn use_key(&self, key: &ResourceKey<String>) -> UsageToken {
        self.inner.use_key(key)
    }

    fn free(&self, key: &ResourceKey<String>, token: &UsageToken) -> rescache::resource::Result<()> {
        self.inner.free(key, token)
    }

    fn has_use_id(&self, token: &UsageToken) -> bool {
        self.inner.has_use_id(token)
    }

    fn page_info(&self, key: &ResourceKey<String>) -> Option<PageInfo> {
        self.inner.page_info(key)
    }

    fn subscribe(&self) -> broadcast::Receiver<ResourceEvent<String>> {
        self.inner.subscribe()
    }
}

mod lifecycle {
    use super::*;

    #[tokio::test]
    async fn test_load_then_outdated_triggers_one_reload() {
        let loader = catalog();
        let resource = Arc::new(Connections::new("connections", loader.clone()));
        let binding = ResourceBinding::new(Arc::clone(&resource), Some(key("conn-1")));

        binding.load().await.unwrap();
        assert_eq!(binding.data(), Some(json!({"name": "db1"})));
        assert!(!binding.is_loading());
        assert!(binding.exception().is_none());
        assert_eq!(loader.call_count(), 1);

        resource.mark_outdated(&key("conn-1"));
        assert!(binding.is_outdated());

        // Stale value stays readable while exactly one new load runs
        assert_eq!(binding.data(), Some(json!({"name": "db1"})));
        assert_eq!(binding.data(), Some(json!({"name": "db1"})));
        assert!(binding.is_loading());
        binding.load().await.unwrap();

        assert_eq!(loader.call_count(), 2);
        assert!(!binding.is_outdated());
    }

    #[tokio::test]
    async fn test_shared_key_stays_live_until_last_unmount() {
        let resource = Arc::new(Connections::new("connections", catalog()));
        let first = ResourceBinding::new(Arc::clone(&resource), Some(key("A")));
        let second = ResourceBinding::new(Arc::clone(&resource), Some(key("A")));
        first.load().await.unwrap();

        assert_eq!(resource.ref_count(&key("A")), 2);

        first.unmount().unwrap();
        assert_eq!(resource.ref_count(&key("A")), 1);
        assert!(!resource.is_eviction_eligible(&"A".to_string()));
        assert_eq!(second.data(), Some(json!({"name": "shared"})));

        second.unmount().unwrap();
        assert_eq!(resource.ref_count(&key("A")), 0);
        assert!(resource.is_eviction_eligible(&"A".to_string()));
        assert_eq!(resource.collect_garbage(), vec!["A".to_string()]);
    }

    #[tokio::test]
    async fn test_reload_marks_outdated_before_loading() {
        let resource = Arc::new(Recording::new(Connections::new("connections", catalog())));
        let binding = ResourceBinding::new(Arc::clone(&resource), Some(key("conn-2")));

        binding.load().await.unwrap();
        binding.reload().await.unwrap();

        assert_eq!(
            resource.calls(),
            vec![
                "load \"conn-2\" outdated=true".to_string(),
                "mark_outdated \"conn-2\"".to_string(),
                "load \"conn-2\" outdated=true".to_string(),
            ]
        );
        assert!(!binding.is_outdated());
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_one_request() {
        let loader = catalog();
        let gate = loader.gate();
        let resource = Arc::new(Connections::new("connections", loader.clone()));

        let bindings: Vec<_> = (0..4)
            .map(|_| ResourceBinding::new(Arc::clone(&resource), Some(key("conn-1"))))
            .collect();
        let handles: Vec<_> = bindings.iter().map(|binding| binding.load()).collect();

        gate.add_permits(1);
        let results = futures::future::join_all(handles).await;

        assert_eq!(loader.call_count(), 1);
        for result in results {
            let value = result.unwrap().and_then(Fetched::into_one);
            assert_eq!(value, Some(json!({"name": "db1"})));
        }
    }

    #[tokio::test]
    async fn test_concurrent_failures_share_one_error() {
        let loader = catalog();
        loader.fail("conn-1");
        let gate = loader.gate();
        let resource = Arc::new(Connections::new("connections", loader.clone()));

        let first = ResourceBinding::new(Arc::clone(&resource), Some(key("conn-1")));
        let second = ResourceBinding::new(Arc::clone(&resource), Some(key("conn-1")));
        let (a, b) = (first.load(), second.load());
        gate.add_permits(1);
        let (a, b) = futures::join!(a, b);

        let (a, b) = (a.unwrap_err(), b.unwrap_err());
        assert!(a.same_instance(&b));
        assert!(a.is_resource_error());
        assert_eq!(loader.call_count(), 1);
    }
}

mod suspense {
    use super::*;

    #[tokio::test]
    async fn test_force_suspense_loads_on_mount() {
        let loader = catalog();
        let resource = Arc::new(Connections::new("connections", loader.clone()));
        let binding = ResourceBinding::with_options(
            Arc::clone(&resource),
            Some(key("conn-1")),
            Includes::none(),
            BindingOptions::new().force_suspense(),
        );
        assert!(binding.is_loading());

        match binding.read() {
            Suspense::Pending(signal) => signal.await,
            other => panic!("expected pending read, got {:?}", other),
        }
        assert_eq!(binding.read().ready().flatten(), Some(json!({"name": "db1"})));

        // Stale values do not satisfy a forced read while reloading
        resource.mark_outdated(&key("conn-1"));
        assert!(binding.read().is_pending());
        assert_eq!(loader.call_count(), 2);
    }

    #[tokio::test]
    async fn test_default_read_keeps_stale_value_while_reloading() {
        let resource = Arc::new(Connections::new("connections", catalog()));
        let binding = ResourceBinding::new(Arc::clone(&resource), Some(key("conn-2")));
        binding.load().await.unwrap();

        resource.mark_outdated(&key("conn-2"));
        let read = binding.read();
        assert_eq!(read.ready().flatten(), Some(json!({"name": "db2"})));
        assert!(binding.is_loading());
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn test_boundary_retries_local_error() {
        let loader = catalog();
        loader.panic_on("conn-1");
        let resource = Arc::new(Connections::new("connections", loader.clone()));
        let boundary = Arc::new(ErrorBoundary::new());
        let binding = ResourceBinding::with_options(
            Arc::clone(&resource),
            Some(key("conn-1")),
            Includes::none(),
            BindingOptions::new().error_context(boundary.clone() as Arc<dyn ErrorContext>),
        );

        assert!(binding.load().await.is_err());
        let fallback = boundary.fallback(None).unwrap();
        assert!(fallback.can_retry());

        loader.recover("conn-1");
        assert!(fallback.retry());
        boundary.reset();

        binding.load().await.unwrap();
        assert_eq!(binding.data(), Some(json!({"name": "db1"})));
        assert!(!boundary.has_error());
    }

    #[tokio::test]
    async fn test_silent_binding_keeps_boundary_clear() {
        let loader = catalog();
        loader.fail("conn-2");
        let resource = Arc::new(Connections::new("connections", loader));
        let boundary = Arc::new(ErrorBoundary::new());
        let binding = ResourceBinding::with_options(
            resource,
            Some(key("conn-2")),
            Includes::none(),
            BindingOptions::new()
                .silent()
                .error_context(boundary.clone() as Arc<dyn ErrorContext>),
        );

        assert!(binding.load().await.is_err());
        assert!(binding.exception().is_some());
        assert!(!boundary.has_error());
        assert!(boundary.fallback(None).is_none());
    }

    #[tokio::test]
    async fn test_preload_gates_loading() {
        let loader = catalog();
        let resource = Arc::new(Connections::new("connections", loader.clone()));
        let driver = Arc::new(ResourceBinding::new(Arc::clone(&resource), Some(key("conn-2"))));
        let binding = ResourceBinding::with_options(
            Arc::clone(&resource),
            Some(key("conn-1")),
            Includes::none(),
            BindingOptions::new().preload(driver.clone() as Arc<dyn LoadableState>),
        );

        assert!(!binding.can_load());
        assert_eq!(binding.data(), None);
        assert_eq!(loader.call_count(), 0);

        driver.load().await.unwrap();
        assert!(binding.can_load());
        binding.load().await.unwrap();
        assert_eq!(binding.data(), Some(json!({"name": "db1"})));
    }

    #[tokio::test]
    async fn test_failed_dependency_is_local_error() {
        let loader = catalog();
        loader.fail("conn-2");
        let resource = Arc::new(Connections::new("connections", loader.clone()));
        let driver = Arc::new(ResourceBinding::with_options(
            Arc::clone(&resource),
            Some(key("conn-2")),
            Includes::none(),
            BindingOptions::new().silent(),
        ));
        let binding = ResourceBinding::with_options(
            Arc::clone(&resource),
            Some(key("conn-1")),
            Includes::none(),
            BindingOptions::new().preload(driver.clone() as Arc<dyn LoadableState>),
        );

        let err = binding.load().await.unwrap_err();
        assert!(!err.is_resource_error());
        assert!(matches!(err.error().as_ref(), ResourceError::Dependency { .. }));
        assert!(resource.get_exception(&key("conn-1")).is_none());
    }
}
