//! The filesystem contract consumed by the protocol engine.
//!
//! Every operation takes a [`VirtualPath`] and resolves to a value or an
//! [`Error`](crate::error::Error) whose kind is one of
//! [`ResourceNotFound`](crate::error::ErrorKind::ResourceNotFound),
//! [`InvalidOperation`](crate::error::ErrorKind::InvalidOperation) or
//! [`Backend`](crate::error::ErrorKind::Backend).

mod bucket;

pub use self::bucket::{BucketFileSystem, Credentials, MountIdentity, Relocation, classify};
use crate::error::Result;
use crate::locks::{LockManager, PropertyManager};
use crate::path::VirtualPath;
use crate::resource::{Resource, ResourceType};
use crate::upload::UploadWriter;
use async_trait::async_trait;
use ossdav_storage::ByteStream;
use time::OffsetDateTime;

#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Create a directory (zero-byte placeholder) or accept a file whose
    /// bytes arrive later through [`write_stream()`](Self::write_stream).
    async fn create(&self, path: &VirtualPath, resource_type: ResourceType) -> Result<()>;

    /// Delete a file, or a directory and everything below it.
    async fn delete(&self, path: &VirtualPath) -> Result<()>;

    /// Resolve a path, from the cache if possible.
    ///
    /// A path that is in neither the cache nor the bucket is
    /// `ResourceNotFound`. When the bucket can't be listed the lookup fails
    /// with `Backend` instead, so an outage is never mistaken for a missing
    /// path.
    async fn metadata(&self, path: &VirtualPath) -> Result<Resource>;

    async fn read_stream(&self, path: &VirtualPath) -> Result<ByteStream>;

    async fn write_stream(&self, path: &VirtualPath) -> Result<UploadWriter>;

    /// Paths of the direct children of a directory.
    async fn read_dir(&self, path: &VirtualPath) -> Result<Vec<VirtualPath>>;

    /// Give `from` a new name inside the same parent.
    async fn rename(&self, from: &VirtualPath, new_name: &str) -> Result<()>;

    /// Relocate `from` to `to`, deleting the source.
    async fn move_to(&self, from: &VirtualPath, to: &VirtualPath) -> Result<()>;

    /// Duplicate `from` at `to`; the source stays.
    async fn copy(&self, from: &VirtualPath, to: &VirtualPath) -> Result<()>;

    async fn lock_manager(&self, path: &VirtualPath) -> Result<LockManager>;

    async fn property_manager(&self, path: &VirtualPath) -> Result<PropertyManager>;

    /// Size in bytes; `None` for directories and the root.
    async fn size(&self, path: &VirtualPath) -> Result<Option<u64>> {
        Ok(self.metadata(path).await?.size())
    }

    async fn etag(&self, path: &VirtualPath) -> Result<Option<String>> {
        Ok(self.metadata(path).await?.etag().map(str::to_string))
    }

    async fn creation_date(&self, path: &VirtualPath) -> Result<OffsetDateTime> {
        Ok(self.metadata(path).await?.creation_date())
    }

    async fn last_modified(&self, path: &VirtualPath) -> Result<OffsetDateTime> {
        Ok(self.metadata(path).await?.last_modified())
    }

    async fn display_name(&self, path: &VirtualPath) -> Result<String> {
        Ok(self.metadata(path).await?.display_name().to_string())
    }

    async fn resource_type(&self, path: &VirtualPath) -> Result<ResourceType> {
        Ok(self.metadata(path).await?.resource_type())
    }

    /// Never fails; lookup errors read as "doesn't exist".
    async fn exists(&self, path: &VirtualPath) -> bool {
        path.is_root() || self.metadata(path).await.is_ok()
    }
}
