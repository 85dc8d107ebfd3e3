//! Object store trait and implementations.
//!
//! This module defines the [`ObjectStore`] trait, the client contract that the
//! virtual filesystem consumes. Implementations wrap a flat key/value object
//! store (S3-compatible services, an in-memory map for tests) that has no
//! native notion of directories, atomic rename or locking.
//!

#[cfg(feature = "mock")]
mod mock;
mod ro;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
pub use self::ro::ReadOnlyBackend;
#[cfg(feature = "s3")]
pub use self::s3::S3Backend;
use crate::error::Result;
use crate::models::{ListPage, ListRequest};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;

/// A streamed object body.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;

/// Client contract for a flat key/value object store.
///
/// All calls are asynchronous and may fail with a backend error; callers are
/// expected to propagate those opaquely. Implementations must **not** retry
/// on behalf of the caller beyond whatever their own client does (the S3 SDK
/// applies its standard retry policy, the core adds none).
///
/// # Keys
/// All keys are relative to the backend root, have no leading slash, and
/// must pass [`validate_key`](crate::validate_key). The exceptions are keys
/// that came back from [`list`](ObjectStore::list): a listing marker, a copy
/// source and the keys of a bulk delete are passed through as listed, so
/// objects other clients wrote under odd names can still be reached. Keys
/// ending in `/` are
/// directory placeholders by convention only; the store treats them like
/// any other object.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use ossdav_storage::{ListRequest, ObjectStore, error::Result};
///
/// async fn make_directory(store: &dyn ObjectStore, key: &str) -> Result<usize> {
///     store.put(&format!("{key}/"), Bytes::new()).await?;
///     let page = store.list(&ListRequest::new(format!("{key}/")).with_delimiter("/")).await?;
///     Ok(page.objects.len())
/// }
/// ```
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// Issue exactly **one** listing call.
    ///
    /// Pagination is the caller's job: follow
    /// [`next_marker`](ListPage::next_marker) until it is `None`.
    async fn list(&self, request: &ListRequest) -> Result<ListPage>;

    /// Store an object from an in-memory buffer, overwriting any existing
    /// object at `key`.
    async fn put(&self, key: &str, data: Bytes) -> Result<()>;

    /// Store an object from a stream of chunks.
    ///
    /// The upload completes (and the returned future resolves) only once the
    /// stream has been exhausted. An error item in the stream aborts the
    /// upload and is returned.
    async fn put_stream(&self, key: &str, body: ByteStream) -> Result<()>;

    /// Open a streaming download of the object at `key`.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the object
    /// does not exist.
    async fn get_stream(&self, key: &str) -> Result<ByteStream>;

    /// Download an entire object into memory.
    ///
    /// Default implementation collects [`get_stream()`](Self::get_stream).
    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let mut stream = self.get_stream(key).await?;
        let mut data = Vec::new();
        while let Some(chunk) = stream.try_next().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// Server-side copy of `source` to `destination` (argument order follows
    /// the object store convention: target first).
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the source
    /// object does not exist.
    async fn copy(&self, destination: &str, source: &str) -> Result<()>;

    /// Delete a single object. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Delete many objects in as few calls as the backend allows.
    ///
    /// In `quiet` mode the backend is asked not to report per-key results;
    /// only a failed request is an error.
    async fn delete_multi(&self, keys: &[String], quiet: bool) -> Result<()>;
}
