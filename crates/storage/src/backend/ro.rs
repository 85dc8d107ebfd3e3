//! Readonly object store.
//!
//! This module provides an object store implementation that wraps other
//! implementations and prevents write operations from executing, but
//! indicating success on return.

use async_trait::async_trait;
use bytes::Bytes;

use crate::backend::ByteStream;
use crate::error::Result;
use crate::{BackendHandle, ListPage, ListRequest, ObjectStore};

/// Read-only object store.
///
/// Wraps another backend and silently drops all write operations, logging an
/// [`info event`](tracing::Event). Streamed uploads are drained so that the
/// writer feeding them is never left blocked.
#[derive(Clone)]
pub struct ReadOnlyBackend {
    inner: BackendHandle,
}
impl ReadOnlyBackend {
    pub fn new(inner: BackendHandle) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl ObjectStore for ReadOnlyBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list(&self, request: &ListRequest) -> Result<ListPage> {
        self.inner.list(request).await
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        tracing::info!(key, bytes = data.len(), "Skipping put during read-only mode");
        Ok(())
    }

    async fn put_stream(&self, key: &str, body: ByteStream) -> Result<()> {
        use futures::TryStreamExt;
        let bytes = body.try_fold(0usize, |total, chunk| async move { Ok(total + chunk.len()) }).await?;
        tracing::info!(key, bytes, "Skipping streamed upload during read-only mode");
        Ok(())
    }

    async fn get_stream(&self, key: &str) -> Result<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn copy(&self, destination: &str, source: &str) -> Result<()> {
        tracing::info!(source, destination, "Skipping copy during read-only mode");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        tracing::info!(key, "Skipping delete during read-only mode");
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String], _quiet: bool) -> Result<()> {
        tracing::info!(count = keys.len(), "Skipping bulk delete during read-only mode");
        Ok(())
    }
}
