//! Resource Keys
//!
//! A key addresses either one cached id, an ordered list of ids, or a named
//! parametrized query (an alias) that the loader resolves to a list of ids.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// Bounds every scalar id must satisfy
pub trait ResourceId: Clone + Eq + Hash + Ord + fmt::Debug + Send + Sync + 'static {}

impl<T> ResourceId for T where T: Clone + Eq + Hash + Ord + fmt::Debug + Send + Sync + 'static {}

/// Parameter carrying the page size of a paged alias
pub const PAGE_SIZE_PARAM: &str = "size";
/// Parameter carrying the cursor of a paged alias
pub const PAGE_AFTER_PARAM: &str = "after";

/// Named, parametrized query resolved by the loader
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKeyAlias {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl ResourceKeyAlias {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            params: BTreeMap::new(),
        }
    }

    /// Add a parameter (builder style)
    pub fn with_param(mut self, name: &str, value: impl ToString) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    /// "page of `size` items after `after`"
    pub fn page(name: &str, size: usize, after: Option<&str>) -> Self {
        let alias = Self::new(name).with_param(PAGE_SIZE_PARAM, size);
        match after {
            Some(cursor) => alias.with_param(PAGE_AFTER_PARAM, cursor),
            None => alias,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }

    pub fn page_size(&self) -> Option<usize> {
        self.param(PAGE_SIZE_PARAM)?.parse().ok()
    }

    pub fn after(&self) -> Option<&str> {
        self.param(PAGE_AFTER_PARAM)
    }
}

impl fmt::Display for ResourceKeyAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            write!(f, "({})", params.join(", "))?;
        }
        Ok(())
    }
}

/// Address of one or more cache entries
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey<K> {
    Scalar(K),
    List(Vec<K>),
    Alias(ResourceKeyAlias),
}

impl<K: ResourceId> ResourceKey<K> {
    pub fn scalar(id: K) -> Self {
        Self::Scalar(id)
    }

    pub fn list(ids: impl IntoIterator<Item = K>) -> Self {
        Self::List(ids.into_iter().collect())
    }

    pub fn alias(alias: ResourceKeyAlias) -> Self {
        Self::Alias(alias)
    }

    /// Paged alias key, see [`ResourceKeyAlias::page`]
    pub fn page(name: &str, size: usize, after: Option<&str>) -> Self {
        Self::Alias(ResourceKeyAlias::page(name, size, after))
    }

    pub fn as_alias(&self) -> Option<&ResourceKeyAlias> {
        match self {
            Self::Alias(alias) => Some(alias),
            _ => None,
        }
    }

    /// Whether the key addresses a collection (list or alias)
    pub fn is_collection(&self) -> bool {
        !matches!(self, Self::Scalar(_))
    }

    /// Expand the key to the ids it addresses.
    ///
    /// Aliases go through `resolve`; `None` means the alias has not been
    /// resolved yet.
    pub fn expand<F>(&self, resolve: F) -> Option<Vec<K>>
    where
        F: Fn(&ResourceKeyAlias) -> Option<Vec<K>>,
    {
        match self {
            Self::Scalar(id) => Some(vec![id.clone()]),
            Self::List(ids) => Some(ids.clone()),
            Self::Alias(alias) => resolve(alias),
        }
    }

    /// Key equivalence.
    ///
    /// Two aliases are equal when name and params are equal. An alias is
    /// never equal to a scalar or list, even if it currently resolves to the
    /// same ids: the alias may resolve differently on the next load. Scalars
    /// and lists compare as ordered id sequences, so `Scalar(a)` equals
    /// `List([a])`.
    pub fn is_key_equal(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Alias(a), Self::Alias(b)) => a == b,
            (Self::Alias(_), _) | (_, Self::Alias(_)) => false,
            (Self::Scalar(a), Self::Scalar(b)) => a == b,
            (Self::Scalar(a), Self::List(b)) | (Self::List(b), Self::Scalar(a)) => {
                b.len() == 1 && &b[0] == a
            }
            (Self::List(a), Self::List(b)) => a == b,
        }
    }

    /// Key intersection.
    ///
    /// Keys intersect when the id sets they address overlap. Aliases that
    /// `resolve` cannot expand are treated conservatively: two unresolved
    /// aliases intersect when they share a name, and an unresolved alias
    /// intersects any scalar or list.
    pub fn intersects_with<F>(&self, other: &Self, resolve: F) -> bool
    where
        F: Fn(&ResourceKeyAlias) -> Option<Vec<K>>,
    {
        if let (Self::Alias(a), Self::Alias(b)) = (self, other) {
            if a == b {
                return true;
            }
        }

        match (self.expand(&resolve), other.expand(&resolve)) {
            (Some(left), Some(right)) => {
                let left: HashSet<&K> = left.iter().collect();
                right.iter().any(|id| left.contains(id))
            }
            _ => match (self, other) {
                (Self::Alias(a), Self::Alias(b)) => a.name == b.name,
                _ => true,
            },
        }
    }

    /// Intersection without alias resolution
    pub fn intersects(&self, other: &Self) -> bool {
        self.intersects_with(other, |_| None)
    }
}

impl<K: fmt::Debug> fmt::Display for ResourceKey<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(id) => write!(f, "{:?}", id),
            Self::List(ids) => write!(f, "{:?}", ids),
            Self::Alias(alias) => write!(f, "{}", alias),
        }
    }
}

impl<K: ResourceId> From<K> for ResourceKey<K> {
    fn from(id: K) -> Self {
        Self::Scalar(id)
    }
}

/// Cursor metadata attached to a resolved paged alias
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(id: &str) -> ResourceKey<String> {
        ResourceKey::Scalar(id.to_string())
    }

    fn l(ids: &[&str]) -> ResourceKey<String> {
        ResourceKey::list(ids.iter().map(|s| s.to_string()))
    }

    #[test]
    fn test_scalar_equals_single_element_list() {
        assert!(s("a").is_key_equal(&l(&["a"])));
        assert!(l(&["a"]).is_key_equal(&s("a")));
        assert!(!s("a").is_key_equal(&l(&["a", "b"])));
    }

    #[test]
    fn test_list_equality_is_order_sensitive() {
        assert!(l(&["a", "b"]).is_key_equal(&l(&["a", "b"])));
        assert!(!l(&["a", "b"]).is_key_equal(&l(&["b", "a"])));
    }

    #[test]
    fn test_alias_equality() {
        let a = ResourceKey::<String>::page("connections", 10, None);
        let b = ResourceKey::<String>::page("connections", 10, None);
        let c = ResourceKey::<String>::page("connections", 10, Some("conn-9"));
        assert!(a.is_key_equal(&b));
        assert!(!a.is_key_equal(&c));
        assert!(!a.is_key_equal(&s("conn-1")));
    }

    #[test]
    fn test_list_intersection() {
        assert!(l(&["a", "b"]).intersects(&l(&["b", "c"])));
        assert!(!l(&["a", "b"]).intersects(&l(&["c", "d"])));
        assert!(s("b").intersects(&l(&["a", "b"])));
        assert!(!s("z").intersects(&l(&["a", "b"])));
    }

    #[test]
    fn test_unresolved_alias_intersects_conservatively() {
        let page = ResourceKey::<String>::page("connections", 10, None);
        let other_page = ResourceKey::<String>::page("connections", 10, Some("c"));
        let foreign = ResourceKey::<String>::alias(ResourceKeyAlias::new("drivers"));

        assert!(page.intersects(&s("a")));
        assert!(page.intersects(&other_page));
        assert!(!page.intersects(&foreign));
    }

    #[test]
    fn test_resolved_alias_intersection() {
        let page = ResourceKey::<String>::page("connections", 2, None);
        let resolve = |alias: &ResourceKeyAlias| {
            (alias.name == "connections").then(|| vec!["a".to_string(), "b".to_string()])
        };
        assert!(page.intersects_with(&s("a"), resolve));
        assert!(!page.intersects_with(&s("z"), resolve));
    }

    #[test]
    fn test_page_alias_params() {
        let alias = ResourceKeyAlias::page("connections", 25, Some("conn-7"));
        assert_eq!(alias.page_size(), Some(25));
        assert_eq!(alias.after(), Some("conn-7"));
        assert_eq!(alias.to_string(), "@connections(after=conn-7, size=25)");

        let first = ResourceKeyAlias::page("connections", 25, None);
        assert_eq!(first.after(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(s("conn-1").to_string(), "\"conn-1\"");
        assert_eq!(l(&["a", "b"]).to_string(), "[\"a\", \"b\"]");
    }
}
