//! Directory-level copy and move as a batch of per-key calls.
//!
//! Copies run with bounded concurrency and may finish in any order. Deleting
//! the sources (for a move) only starts once every copy succeeded. There is no
//! rollback: a failed batch leaves whatever copies already landed in place and
//! every source intact.

use crate::cache::ResourceCache;
use crate::error::{Error, ErrorKind, Result};
use exn::ResultExt;
use futures::{StreamExt, TryStreamExt};
use ossdav_storage::BackendHandle;

/// Maximum number of copy calls in flight for one batch.
pub const COPY_CONCURRENCY: usize = 10;

/// One object to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyAction {
    pub source: String,
    pub destination: String,
}

/// Map every key under `source_prefix` to the same key under
/// `destination_prefix`. Keys outside the source prefix are skipped.
pub fn plan(
    source_prefix: &str,
    destination_prefix: &str,
    keys: impl IntoIterator<Item = String>,
) -> Vec<CopyAction> {
    keys.into_iter()
        .filter_map(|source| {
            let rest = source.strip_prefix(source_prefix)?;
            let destination = format!("{destination_prefix}{rest}");
            Some(CopyAction { source, destination })
        })
        .collect()
}

/// Run every copy, at most [`COPY_CONCURRENCY`] at a time.
///
/// Any failed copy fails the whole batch with
/// [`InvalidOperation`](ErrorKind::InvalidOperation) for `label`.
pub async fn copy_all(backend: &BackendHandle, actions: &[CopyAction], label: &str) -> Result<()> {
    let copies = futures::stream::iter(actions).map(Ok::<_, Error>).try_for_each_concurrent(COPY_CONCURRENCY, |action| async move {
        backend.copy(&action.destination, &action.source).await.or_raise(|| ErrorKind::Backend)
    });
    match copies.await {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::warn!(path = label, copies = actions.len(), "Tree copy failed; copied objects are left in place");
            Err(err.raise(ErrorKind::InvalidOperation(label.to_string())))
        },
    }
}

/// Bulk-delete the sources of a finished batch and forget them.
pub async fn delete_sources(backend: &BackendHandle, cache: &ResourceCache, actions: &[CopyAction]) -> Result<()> {
    let keys: Vec<String> = actions.iter().map(|action| action.source.clone()).collect();
    if keys.is_empty() {
        return Ok(());
    }
    backend.delete_multi(&keys, true).await.or_raise(|| ErrorKind::Backend)?;
    let evicted = cache.evict_keys(&keys).await;
    tracing::debug!(deleted = keys.len(), evicted, "Tree sources removed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::VirtualPath;
    use crate::resource::Resource;
    use ossdav_storage::backend::MockBackend;
    use std::sync::Arc;

    fn actions(pairs: &[(&str, &str)]) -> Vec<CopyAction> {
        pairs
            .iter()
            .map(|(source, destination)| CopyAction { source: source.to_string(), destination: destination.to_string() })
            .collect()
    }

    #[test]
    fn test_plan_replaces_prefix() {
        let keys = ["dir/", "dir/x", "dir/y/z", "dirt.txt"].map(str::to_string);
        let planned = plan("dir/", "dir2/", keys);
        assert_eq!(planned, actions(&[("dir/", "dir2/"), ("dir/x", "dir2/x"), ("dir/y/z", "dir2/y/z")]));
    }

    #[test]
    fn test_plan_into_nested_destination() {
        let planned = plan("a/", "b/c/", ["a/1".to_string()]);
        assert_eq!(planned, actions(&[("a/1", "b/c/1")]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_copy_all_bounds_concurrency() {
        let keys: Vec<String> = (0..40).map(|i| format!("src/{i:02}")).collect();
        let mock = Arc::new(MockBackend::with_objects(keys.iter().map(|k| (k.clone(), "x"))));
        let handle: BackendHandle = mock.clone();
        let planned = plan("src/", "dst/", keys);
        copy_all(&handle, &planned, "/src").await.unwrap();
        assert_eq!(mock.copy_calls(), 40);
        assert!(mock.max_concurrent_copies() <= COPY_CONCURRENCY);
        assert!(mock.max_concurrent_copies() > 1);
        assert!(mock.contains("dst/39").await);
    }

    #[tokio::test]
    async fn test_copy_all_failure_is_invalid_operation() {
        let mock = Arc::new(MockBackend::with_objects([("src/a", "a"), ("src/b", "b")]).with_failing_copy("src/b"));
        let handle: BackendHandle = mock.clone();
        let planned = plan("src/", "dst/", ["src/a".to_string(), "src/b".to_string()]);
        let err = copy_all(&handle, &planned, "/src").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidOperation(p) if p == "/src"));
        assert!(mock.contains("src/a").await);
        assert!(mock.contains("src/b").await);
    }

    #[tokio::test]
    async fn test_delete_sources_evicts_cache() {
        let mock = Arc::new(MockBackend::with_objects([("src/a", "a"), ("keep", "k")]));
        let handle: BackendHandle = mock.clone();
        let cache = ResourceCache::new();
        let cached = VirtualPath::parse("/src/a").unwrap();
        cache.insert(&cached, Resource::from_prefix("src/a")).await;
        delete_sources(&handle, &cache, &actions(&[("src/a", "dst/a")])).await.unwrap();
        assert_eq!(mock.keys().await, vec!["keep"]);
        assert!(!cache.contains(&cached).await);
        assert_eq!(mock.delete_multi_calls(), 1);
        delete_sources(&handle, &cache, &[]).await.unwrap();
        assert_eq!(mock.delete_multi_calls(), 1);
    }
}
