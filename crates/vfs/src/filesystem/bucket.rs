//! Filesystem over one object-store bucket.

use crate::cache::ResourceCache;
use crate::error::{ErrorKind, Result};
use crate::filesystem::FileSystem;
use crate::listing;
use crate::locks::{LockManager, PropertyManager};
use crate::path::VirtualPath;
use crate::resource::{Resource, ResourceType};
use crate::tree;
use crate::upload::UploadWriter;
use async_trait::async_trait;
use bytes::Bytes;
use exn::ResultExt;
use ossdav_storage::error::ErrorKind as StorageErrorKind;
use ossdav_storage::{BackendHandle, ByteStream, ListRequest};
use serde::{Deserialize, Serialize};
use std::fmt;

const DELIMITER: &str = "/";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub key_id: String,
    pub key_secret: String,
}
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("key_id", &self.key_id).field("key_secret", &"<redacted>").finish()
    }
}

/// Which bucket a filesystem is mounted on, and as whom.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountIdentity {
    pub region: String,
    pub bucket: String,
    pub credentials: Credentials,
}

/// How a move or copy from one path to another is carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relocation {
    /// Same parent, new name.
    Rename(String),
    /// Different parent.
    Move,
    /// Source and destination are the same path.
    Noop,
}

/// Tell a rename apart from a move.
pub fn classify(from: &VirtualPath, to: &VirtualPath) -> Relocation {
    if from == to {
        return Relocation::Noop;
    }
    match from.parent() == to.parent() {
        true => Relocation::Rename(to.name().to_string()),
        false => Relocation::Move,
    }
}

fn invalid(path: &VirtualPath) -> exn::Exn<ErrorKind> {
    exn::Exn::from(ErrorKind::InvalidOperation(path.cache_key()))
}

fn not_found(path: &VirtualPath) -> exn::Exn<ErrorKind> {
    exn::Exn::from(ErrorKind::ResourceNotFound(path.cache_key()))
}

/// Hierarchical view of a flat bucket.
///
/// Directories are either zero-byte objects whose key ends in `/` or common
/// prefixes of other keys. Metadata is cached per path; the bucket stays the
/// source of truth.
///
/// # Examples
///
/// ```
/// use ossdav_storage::backend::MockBackend;
/// use ossdav_vfs::{BucketFileSystem, Credentials, FileSystem, MountIdentity, ResourceType, VirtualPath};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let identity = MountIdentity {
///     region: "oss-cn-hangzhou".to_string(),
///     bucket: "bucket".to_string(),
///     credentials: Credentials { key_id: "id".to_string(), key_secret: "secret".to_string() },
/// };
/// let backend = Arc::new(MockBackend::with_objects([("docs/report.pdf", "%PDF-1.7")]));
/// let fs = BucketFileSystem::new(identity, backend);
///
/// let docs = VirtualPath::parse("/docs").unwrap();
/// assert_eq!(fs.resource_type(&docs).await.unwrap(), ResourceType::Directory);
/// let children = fs.read_dir(&docs).await.unwrap();
/// assert_eq!(children, vec![VirtualPath::parse("/docs/report.pdf").unwrap()]);
/// # }
/// ```
#[derive(Clone)]
pub struct BucketFileSystem {
    identity: MountIdentity,
    backend: BackendHandle,
    cache: ResourceCache,
    strict_delete: bool,
}

impl BucketFileSystem {
    pub fn new(identity: MountIdentity, backend: BackendHandle) -> Self {
        Self { identity, backend, cache: ResourceCache::new(), strict_delete: false }
    }

    /// Start from an already warm cache.
    pub fn with_cache(mut self, cache: ResourceCache) -> Self {
        self.cache = cache;
        self
    }

    /// When set, deleting a path whose listing comes back empty is a
    /// [`ResourceNotFound`](ErrorKind::ResourceNotFound) instead of a no-op.
    pub fn with_strict_delete(mut self, strict_delete: bool) -> Self {
        self.strict_delete = strict_delete;
        self
    }

    pub fn identity(&self) -> &MountIdentity {
        &self.identity
    }

    pub fn backend(&self) -> &BackendHandle {
        &self.backend
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    /// Resolve a path against the bucket, bypassing the cache.
    ///
    /// Exactly one of the file key and the directory key must be present;
    /// none or both is a not-found.
    async fn lookup(&self, path: &VirtualPath) -> Result<Resource> {
        let (file_key, dir_key) = (path.file_key(), path.dir_key());
        let request = ListRequest::new(file_key.clone()).with_delimiter(DELIMITER);
        let listing = listing::list(&self.backend, request).await?;
        let mut matches = listing.resources.into_iter().filter(|r| r.path == file_key || r.path == dir_key);
        match (matches.next(), matches.next()) {
            (Some(resource), None) => Ok(resource),
            (Some(_), Some(_)) => {
                tracing::warn!(path = %path, "Path is both a file and a directory; treating as missing");
                Err(not_found(path))
            },
            _ => Err(not_found(path)),
        }
    }

    /// Copy `from` to `to`, then remove the source unless `keep_source`.
    async fn relocate(&self, from: &VirtualPath, to: &VirtualPath, keep_source: bool) -> Result<()> {
        if from.is_root() {
            return Err(invalid(from));
        }
        if to.is_root() || (to != from && to.starts_with(from)) {
            return Err(invalid(to));
        }
        let relocation = classify(from, to);
        if relocation == Relocation::Noop {
            tracing::debug!("Source and destination are the same path; nothing to do");
            return Ok(());
        }
        let source = self.metadata(from).await?;
        tracing::debug!(?relocation, resource_type = ?source.resource_type(), keep_source, "Relocating");
        match source.resource_type() {
            ResourceType::File => {
                let source_key = from.file_key();
                self.backend.copy(&to.file_key(), &source_key).await.or_raise(|| ErrorKind::Backend)?;
                self.cache.evict(to).await;
                if !keep_source {
                    self.backend.delete(&source_key).await.or_raise(|| ErrorKind::Backend)?;
                    self.cache.evict(from).await;
                }
            },
            ResourceType::Directory => {
                let source_prefix = from.dir_key();
                let listing = listing::list(&self.backend, ListRequest::new(source_prefix.clone())).await?;
                let actions = tree::plan(&source_prefix, &to.dir_key(), listing.keys());
                tree::copy_all(&self.backend, &actions, &from.cache_key()).await?;
                self.cache.evict_tree(to).await;
                if !keep_source {
                    tree::delete_sources(&self.backend, &self.cache, &actions).await?;
                    self.cache.evict_tree(from).await;
                }
                tracing::info!(objects = actions.len(), keep_source, "Tree relocated");
            },
        }
        Ok(())
    }
}

#[async_trait]
impl FileSystem for BucketFileSystem {
    #[tracing::instrument(skip_all, fields(path = %path, ?resource_type))]
    async fn create(&self, path: &VirtualPath, resource_type: ResourceType) -> Result<()> {
        if path.is_root() {
            return Err(invalid(path));
        }
        match resource_type {
            ResourceType::Directory => {
                let key = path.dir_key();
                self.backend.put(&key, Bytes::new()).await.or_raise(|| ErrorKind::Backend)?;
                self.cache.insert(path, Resource::marker(&key)).await;
            },
            ResourceType::File => tracing::debug!("File contents arrive through the write stream"),
        }
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(path = %path))]
    async fn delete(&self, path: &VirtualPath) -> Result<()> {
        if path.is_root() {
            return Err(invalid(path));
        }
        let (file_key, dir_key) = (path.file_key(), path.dir_key());
        let listing = listing::list(&self.backend, ListRequest::new(file_key.clone())).await?;
        if listing.not_found {
            return Err(not_found(path));
        }
        if listing.is_empty() {
            self.cache.evict_tree(path).await;
            if self.strict_delete {
                return Err(not_found(path));
            }
            tracing::debug!("Nothing under path; treating delete as done");
            return Ok(());
        }
        let keys: Vec<String> =
            listing.keys().into_iter().filter(|key| *key == file_key || key.starts_with(&dir_key)).collect();
        if keys.is_empty() {
            return Err(not_found(path));
        }
        self.backend.delete_multi(&keys, true).await.or_raise(|| ErrorKind::Backend)?;
        self.cache.evict_keys(&keys).await;
        self.cache.evict_tree(path).await;
        tracing::debug!(objects = keys.len(), "Deleted");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(path = %path))]
    async fn metadata(&self, path: &VirtualPath) -> Result<Resource> {
        if let Some(resource) = self.cache.get(path).await {
            return Ok(resource);
        }
        let resource = self.lookup(path).await?;
        Ok(self.cache.insert_if_absent(path, resource).await)
    }

    #[tracing::instrument(skip_all, fields(path = %path))]
    async fn read_stream(&self, path: &VirtualPath) -> Result<ByteStream> {
        if path.is_root() {
            return Err(invalid(path));
        }
        match self.backend.get_stream(&path.file_key()).await {
            Ok(stream) => Ok(stream),
            Err(err) if matches!(&*err, StorageErrorKind::NotFound(_)) => {
                Err(err.raise(ErrorKind::ResourceNotFound(path.cache_key())))
            },
            Err(err) => Err(err.raise(ErrorKind::Backend)),
        }
    }

    #[tracing::instrument(skip_all, fields(path = %path))]
    async fn write_stream(&self, path: &VirtualPath) -> Result<UploadWriter> {
        if path.is_root() {
            return Err(invalid(path));
        }
        Ok(UploadWriter::spawn(self.backend.clone(), self.cache.clone(), path.clone()))
    }

    #[tracing::instrument(skip_all, fields(path = %path))]
    async fn read_dir(&self, path: &VirtualPath) -> Result<Vec<VirtualPath>> {
        let prefix = path.dir_key();
        let request = ListRequest::new(prefix.clone()).with_delimiter(DELIMITER).with_marker(prefix.clone());
        let listing =
            listing::list(&self.backend, request).await.or_raise(|| ErrorKind::ResourceNotFound(path.cache_key()))?;
        if listing.not_found {
            return Err(not_found(path));
        }
        let mut children = Vec::with_capacity(listing.resources.len());
        for resource in listing.resources {
            if resource.path == prefix {
                continue;
            }
            let child = match VirtualPath::from_key(&resource.path) {
                Ok(child) => child,
                Err(err) => {
                    tracing::warn!(key = %resource.path, error = ?err, "Skipping object with unusable key");
                    continue;
                },
            };
            self.cache.insert_if_absent(&child, resource).await;
            children.push(child);
        }
        Ok(children)
    }

    #[tracing::instrument(skip_all, fields(from = %from, new_name))]
    async fn rename(&self, from: &VirtualPath, new_name: &str) -> Result<()> {
        if from.is_root() {
            return Err(invalid(from));
        }
        let to = from.with_name(new_name)?;
        self.relocate(from, &to, false).await
    }

    #[tracing::instrument(skip_all, fields(from = %from, to = %to))]
    async fn move_to(&self, from: &VirtualPath, to: &VirtualPath) -> Result<()> {
        self.relocate(from, to, false).await
    }

    #[tracing::instrument(skip_all, fields(from = %from, to = %to))]
    async fn copy(&self, from: &VirtualPath, to: &VirtualPath) -> Result<()> {
        self.relocate(from, to, true).await
    }

    async fn lock_manager(&self, path: &VirtualPath) -> Result<LockManager> {
        self.metadata(path).await?;
        Ok(LockManager::new(self.cache.clone(), path.clone()))
    }

    async fn property_manager(&self, path: &VirtualPath) -> Result<PropertyManager> {
        self.metadata(path).await?;
        Ok(PropertyManager::new(self.cache.clone(), path.clone()))
    }
}
