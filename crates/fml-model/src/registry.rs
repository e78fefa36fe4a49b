//! Concurrent map registry and import resolution

use crate::model::StructureMap;
use crate::{Error, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Supplies the documents an `imports` declaration refers to
pub trait ImportResolver {
    /// All documents matching `url`, which may contain one `*` wildcard
    fn resolve_import(&self, url: &str) -> Vec<Arc<StructureMap>>;
}

impl<F> ImportResolver for F
where
    F: Fn(&str) -> Vec<Arc<StructureMap>>,
{
    fn resolve_import(&self, url: &str) -> Vec<Arc<StructureMap>> {
        self(url)
    }
}

/// True if `url` matches an import pattern
///
/// A single `*` matches any run of characters; without one the pattern must
/// equal the url.
#[must_use]
pub fn import_matches(pattern: &str, url: &str) -> bool {
    match pattern.split_once('*') {
        Some((prefix, suffix)) => {
            url.len() >= prefix.len() + suffix.len()
                && url.starts_with(prefix)
                && url.ends_with(suffix)
        }
        None => pattern == url,
    }
}

/// Thread-safe store of compiled map documents keyed by url
#[derive(Debug, Default)]
pub struct MapRegistry {
    maps: DashMap<String, Arc<StructureMap>>,
}

impl MapRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document under its url, replacing any previous one
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFormat`] when the document has no url.
    pub fn register(&self, map: impl Into<Arc<StructureMap>>) -> Result<Arc<StructureMap>> {
        let map = map.into();
        let url = map
            .url
            .clone()
            .ok_or_else(|| Error::InvalidFormat("Map document has no url".to_string()))?;
        debug!(url = %url, "Registering map document");
        self.maps.insert(url, Arc::clone(&map));
        Ok(map)
    }

    #[must_use]
    pub fn get(&self, url: &str) -> Option<Arc<StructureMap>> {
        self.maps.get(url).map(|entry| Arc::clone(entry.value()))
    }

    #[must_use]
    pub fn contains(&self, url: &str) -> bool {
        self.maps.contains_key(url)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    /// Documents matching an exact url or a wildcard pattern, sorted by url
    #[must_use]
    pub fn resolve(&self, pattern: &str) -> Vec<Arc<StructureMap>> {
        if !pattern.contains('*') {
            return self.get(pattern).into_iter().collect();
        }

        let mut matches: Vec<(String, Arc<StructureMap>)> = self
            .maps
            .iter()
            .filter(|entry| import_matches(pattern, entry.key()))
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));
        trace!(pattern, count = matches.len(), "Resolved wildcard import");
        matches.into_iter().map(|(_, map)| map).collect()
    }
}

impl ImportResolver for MapRegistry {
    fn resolve_import(&self, url: &str) -> Vec<Arc<StructureMap>> {
        self.resolve(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(url: &str) -> StructureMap {
        StructureMap {
            url: Some(url.to_string()),
            ..StructureMap::default()
        }
    }

    #[test]
    fn test_import_matches() {
        assert!(import_matches("http://x/*", "http://x/a"));
        assert!(import_matches("http://x/*-v2", "http://x/a-v2"));
        assert!(!import_matches("http://x/*-v2", "http://x/a-v1"));
        assert!(!import_matches("http://x/ab*b", "http://x/ab"));
        assert!(import_matches("http://x/a", "http://x/a"));
        assert!(!import_matches("http://x/a", "http://x/ab"));
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = MapRegistry::new();
        registry.register(map("http://x/b")).unwrap();
        registry.register(map("http://x/a")).unwrap();
        registry.register(map("http://y/c")).unwrap();

        assert_eq!(registry.len(), 3);
        assert!(registry.contains("http://x/a"));

        let urls: Vec<_> = registry
            .resolve("http://x/*")
            .iter()
            .filter_map(|m| m.url.clone())
            .collect();
        assert_eq!(urls, vec!["http://x/a", "http://x/b"]);
        assert_eq!(registry.resolve("http://y/c").len(), 1);
        assert!(registry.resolve("http://z/*").is_empty());
    }

    #[test]
    fn test_register_requires_url() {
        let registry = MapRegistry::new();
        assert!(matches!(
            registry.register(StructureMap::new()),
            Err(Error::InvalidFormat(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_closure_resolver() {
        let shared = Arc::new(map("http://x/a"));
        let resolver = move |url: &str| {
            if url == "http://x/a" {
                vec![Arc::clone(&shared)]
            } else {
                Vec::new()
            }
        };
        assert_eq!(resolver.resolve_import("http://x/a").len(), 1);
        assert!(resolver.resolve_import("http://x/b").is_empty());
    }
}
