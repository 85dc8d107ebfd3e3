//! Advisory resource cache.
//!
//! The object store is the source of truth; the cache only saves listing
//! calls. It is keyed by rooted protocol path (see
//! [`VirtualPath::cache_key`]) and every mutation goes through this type.

use crate::path::VirtualPath;
use crate::resource::Resource;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared handle to the path → [`Resource`] map.
///
/// Cloning is cheap and every clone sees the same entries. The root entry is
/// always present and can't be evicted. There is no eviction policy beyond
/// explicit invalidation.
#[derive(Debug, Clone)]
pub struct ResourceCache {
    entries: Arc<RwLock<HashMap<String, Resource>>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        let mut entries = HashMap::new();
        entries.insert(VirtualPath::root().cache_key(), Resource::root());
        Self { entries: Arc::new(RwLock::new(entries)) }
    }

    pub async fn get(&self, path: &VirtualPath) -> Option<Resource> {
        self.entries.read().await.get(&path.cache_key()).cloned()
    }

    pub async fn contains(&self, path: &VirtualPath) -> bool {
        self.entries.read().await.contains_key(&path.cache_key())
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Insert or replace an entry, carrying over the locks and properties of
    /// the entry it replaces.
    pub async fn insert(&self, path: &VirtualPath, mut resource: Resource) {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.remove(&path.cache_key()) {
            resource.locks = existing.locks;
            resource.properties = existing.properties;
        }
        entries.insert(path.cache_key(), resource);
    }

    /// Insert unless an entry already exists. Returns the cached entry either
    /// way.
    pub async fn insert_if_absent(&self, path: &VirtualPath, resource: Resource) -> Resource {
        self.entries.write().await.entry(path.cache_key()).or_insert(resource).clone()
    }

    /// Drop a cached entry. The root stays.
    pub async fn evict(&self, path: &VirtualPath) -> Option<Resource> {
        if path.is_root() {
            return None;
        }
        self.entries.write().await.remove(&path.cache_key())
    }

    /// Drop the entries of a batch of object-store keys. Returns how many
    /// entries were removed.
    pub async fn evict_keys(&self, keys: &[String]) -> usize {
        let mut entries = self.entries.write().await;
        keys.iter()
            .filter_map(|key| VirtualPath::from_key(key).ok())
            .filter(|path| !path.is_root())
            .filter(|path| entries.remove(&path.cache_key()).is_some())
            .count()
    }

    /// Drop `path` and every cached entry below it, including directories
    /// that were only ever synthesized from a common prefix.
    pub async fn evict_tree(&self, path: &VirtualPath) -> usize {
        let root = path.cache_key();
        let below = format!("{}/", root.trim_end_matches('/'));
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| key == "/" || (*key != root && !key.starts_with(&below)));
        before - entries.len()
    }

    /// Mutate a cached entry in place. Returns `None` if there is no entry.
    pub async fn update<T>(&self, path: &VirtualPath, f: impl FnOnce(&mut Resource) -> T) -> Option<T> {
        self.entries.write().await.get_mut(&path.cache_key()).map(f)
    }

    /// Sorted copy of every entry, for persisting.
    pub async fn snapshot(&self) -> BTreeMap<String, Resource> {
        self.entries.read().await.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Replace every entry with `resources`. A root entry is created if the
    /// snapshot lacks one.
    pub async fn restore(&self, resources: impl IntoIterator<Item = (String, Resource)>) {
        let mut entries: HashMap<String, Resource> = resources.into_iter().collect();
        entries.entry(VirtualPath::root().cache_key()).or_insert_with(Resource::root);
        *self.entries.write().await = entries;
    }
}
impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ossdav_storage::ObjectEntry;

    fn path(p: &str) -> VirtualPath {
        VirtualPath::parse(p).unwrap()
    }

    fn file(key: &str, size: u64) -> Resource {
        Resource::from_entry(&ObjectEntry::new(key, size))
    }

    #[tokio::test]
    async fn test_root_is_always_present() {
        let cache = ResourceCache::new();
        assert!(cache.contains(&VirtualPath::root()).await);
        assert_eq!(cache.evict(&VirtualPath::root()).await, None);
        assert_eq!(cache.evict_keys(&["".to_string()]).await, 0);
        assert!(cache.contains(&VirtualPath::root()).await);
    }

    #[tokio::test]
    async fn test_insert_preserves_locks_and_properties() {
        let cache = ResourceCache::new();
        let target = path("/a.txt");
        cache.insert(&target, file("a.txt", 1)).await;
        cache.update(&target, |r| r.properties.insert("color".to_string(), "red".to_string())).await;
        cache.insert(&target, file("a.txt", 2)).await;
        let cached = cache.get(&target).await.unwrap();
        assert_eq!(cached.size, Some(2));
        assert_eq!(cached.properties.get("color").map(String::as_str), Some("red"));
    }

    #[tokio::test]
    async fn test_insert_if_absent_keeps_existing() {
        let cache = ResourceCache::new();
        let target = path("/a.txt");
        cache.insert(&target, file("a.txt", 1)).await;
        let kept = cache.insert_if_absent(&target, file("a.txt", 9)).await;
        assert_eq!(kept.size, Some(1));
    }

    #[tokio::test]
    async fn test_evict_keys_uses_rooted_paths() {
        let cache = ResourceCache::new();
        cache.insert(&path("/dir"), Resource::marker("dir/")).await;
        cache.insert(&path("/dir/x"), file("dir/x", 1)).await;
        cache.insert(&path("/other"), file("other", 1)).await;
        let removed = cache.evict_keys(&["dir/".to_string(), "dir/x".to_string(), "dir/missing".to_string()]).await;
        assert_eq!(removed, 2);
        assert!(cache.contains(&path("/other")).await);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_evict_tree() {
        let cache = ResourceCache::new();
        cache.insert(&path("/dir"), Resource::marker("dir/")).await;
        cache.insert(&path("/dir/y"), Resource::from_prefix("dir/y/")).await;
        cache.insert(&path("/dir/y/z"), file("dir/y/z", 1)).await;
        cache.insert(&path("/dirt.txt"), file("dirt.txt", 1)).await;
        assert_eq!(cache.evict_tree(&path("/dir")).await, 3);
        assert!(cache.contains(&path("/dirt.txt")).await);
        // Evicting from the root clears everything but the root itself.
        cache.evict_tree(&VirtualPath::root()).await;
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_missing_entry() {
        let cache = ResourceCache::new();
        assert_eq!(cache.update(&path("/missing"), |r| r.size).await, None);
    }

    #[tokio::test]
    async fn test_snapshot_and_restore() {
        let cache = ResourceCache::new();
        cache.insert(&path("/a.txt"), file("a.txt", 3)).await;
        let snapshot = cache.snapshot().await;
        assert_eq!(snapshot.keys().collect::<Vec<_>>(), vec!["/", "/a.txt"]);

        let restored = ResourceCache::new();
        let without_root = snapshot.into_iter().filter(|(k, _)| k != "/");
        restored.restore(without_root).await;
        assert!(restored.contains(&VirtualPath::root()).await);
        assert_eq!(restored.get(&path("/a.txt")).await.unwrap().size, Some(3));
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let cache = ResourceCache::new();
        let clone = cache.clone();
        clone.insert(&path("/a.txt"), file("a.txt", 1)).await;
        assert!(cache.contains(&path("/a.txt")).await);
    }
}
