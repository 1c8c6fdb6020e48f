//! Property-based tests using proptest
//!
//! These tests verify key equality and intersection rules, usage-token
//! reference counting and cursor pagination using randomized inputs.

use proptest::prelude::*;
use rescache::pagination::Pagination;
use rescache::resource::{
    CachedMapResource, Includes, MemoryLoader, Resource, ResourceKey, ResourceKeyAlias,
};
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build test runtime")
}

/// Generate arbitrary ids from a small alphabet so keys overlap often
fn arb_id() -> impl Strategy<Value = String> {
    "[a-e]"
}

fn arb_key() -> impl Strategy<Value = ResourceKey<String>> {
    prop_oneof![
        arb_id().prop_map(ResourceKey::Scalar),
        prop::collection::vec(arb_id(), 0..4).prop_map(ResourceKey::List),
        ("[a-c]", 1usize..5).prop_map(|(name, size)| {
            ResourceKey::Alias(ResourceKeyAlias::new(&name).with_param("size", size))
        }),
    ]
}

proptest! {
    /// Key equality is symmetric and implies intersection
    #[test]
    fn test_key_equality_symmetric(a in arb_key(), b in arb_key()) {
        prop_assert_eq!(a.is_key_equal(&b), b.is_key_equal(&a));
        if a.is_key_equal(&b) && a.expand(|_| None).is_some_and(|ids| !ids.is_empty()) {
            prop_assert!(a.intersects(&b));
        }
    }

    /// Intersection is symmetric
    #[test]
    fn test_intersection_symmetric(a in arb_key(), b in arb_key()) {
        prop_assert_eq!(a.intersects(&b), b.intersects(&a));
    }

    /// A scalar equals the one-element list of the same id
    #[test]
    fn test_scalar_equals_singleton_list(id in arb_id()) {
        let scalar = ResourceKey::Scalar(id.clone());
        let list = ResourceKey::List(vec![id]);
        prop_assert!(scalar.is_key_equal(&list));
        prop_assert!(list.is_key_equal(&scalar));
    }

    /// N uses freed with their tokens, in any order, bring the count back to zero
    #[test]
    fn test_use_free_restores_refcount(
        uses in 1usize..8,
        order in Just((0..8).collect::<Vec<usize>>()).prop_shuffle(),
    ) {
        let rt = runtime();
        let resource = CachedMapResource::new("props", MemoryLoader::new([("k", 1u32)]));
        let key = ResourceKey::Scalar("k".to_string());
        rt.block_on(resource.load(&key, &Includes::none())).expect("load failed");

        let tokens: Vec<_> = (0..uses).map(|_| resource.use_key(&key)).collect();
        prop_assert_eq!(resource.ref_count(&key), uses);
        prop_assert!(!resource.is_eviction_eligible(&"k".to_string()));

        let mut freed = 0;
        for index in order.into_iter().filter(|index| *index < uses) {
            prop_assert!(resource.free(&key, &tokens[index]).is_ok());
            freed += 1;
            prop_assert_eq!(resource.ref_count(&key), uses - freed);
        }

        prop_assert_eq!(resource.ref_count(&key), 0);
        prop_assert!(resource.is_eviction_eligible(&"k".to_string()));
        // A second free of any token is a contract violation
        prop_assert!(resource.free(&key, &tokens[0]).is_err());
    }

    /// Walking every page lists each record exactly once, in order
    #[test]
    fn test_pagination_walk_lists_everything(count in 0u32..40, page_size in 1usize..10) {
        let rt = runtime();
        let records: Vec<(String, u32)> = (0..count).map(|n| (format!("r{:03}", n), n)).collect();
        let resource = Arc::new(CachedMapResource::new("walk", MemoryLoader::new(records)));
        let pages = Pagination::alias(Arc::clone(&resource), "walk", page_size);

        rt.block_on(pages.load()).expect("first page failed");
        while pages.load_more() {
            let after = pages.after();
            prop_assert!(after.is_some());
            rt.block_on(pages.load()).expect("next page failed");
        }

        let expected_pages = (count as usize).div_ceil(page_size).max(1);
        prop_assert_eq!(pages.loaded().len(), expected_pages);
        prop_assert_eq!(pages.items(), (0..count).collect::<Vec<u32>>());
        prop_assert!(!pages.has_next_page());
    }
}
