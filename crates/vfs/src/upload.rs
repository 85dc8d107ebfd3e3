//! Streaming upload writer.
//!
//! The protocol engine gets a writer back immediately while the object store
//! upload runs in a spawned task. Bytes are relayed through a bounded channel
//! unmodified, so a slow upload applies backpressure to the writer.

use crate::cache::ResourceCache;
use crate::error::{ErrorKind, Result};
use crate::listing;
use crate::path::VirtualPath;
use bytes::Bytes;
use exn::ResultExt;
use futures::channel::mpsc;
use futures::io::AsyncWrite;
use ossdav_storage::{BackendHandle, ListRequest};
use ossdav_storage::error::{ErrorKind as StorageErrorKind, Result as StorageResult};
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

/// Chunks buffered between the writer and the upload task.
const UPLOAD_BUFFER: usize = 8;

/// Writable end of an object upload.
///
/// Nothing is committed until [`close`](futures::io::AsyncWriteExt::close)
/// resolves, which also reports the upload's outcome. An upload that fails
/// early surfaces from the next write. Dropping the writer without closing it
/// abandons the upload.
pub struct UploadWriter {
    path: VirtualPath,
    sender: Option<mpsc::Sender<StorageResult<Bytes>>>,
    upload: Option<JoinHandle<Result<()>>>,
    failure: Option<String>,
}

impl UploadWriter {
    /// Start uploading to `path` in the background.
    ///
    /// Must be called from within a Tokio runtime. Once the upload succeeds a
    /// cached entry for `path` gets the object's new metadata and keeps its
    /// locks and properties.
    pub(crate) fn spawn(backend: BackendHandle, cache: ResourceCache, path: VirtualPath) -> Self {
        let (sender, receiver) = mpsc::channel(UPLOAD_BUFFER);
        let key = path.file_key();
        let target = path.clone();
        let upload = tokio::spawn(async move {
            backend.put_stream(&key, Box::pin(receiver)).await.or_raise(|| ErrorKind::Backend)?;
            refresh(&backend, &cache, &target, &key).await;
            tracing::debug!(path = %target, "Upload complete");
            Ok(())
        });
        Self { path, sender: Some(sender), upload: Some(upload), failure: None }
    }

    pub fn path(&self) -> &VirtualPath {
        &self.path
    }

    /// Drive the upload task to completion and remember its outcome.
    fn poll_upload(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        if let Some(upload) = self.upload.as_mut() {
            let outcome = match Pin::new(upload).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(Ok(()))) => None,
                Poll::Ready(Ok(Err(err))) => {
                    tracing::warn!(path = %self.path, error = ?err, "Upload failed");
                    Some(format!("upload to {} failed: {err}", self.path))
                },
                Poll::Ready(Err(join)) => Some(format!("upload to {} aborted: {join}", self.path)),
            };
            self.upload = None;
            self.failure = outcome;
        }
        Poll::Ready(match &self.failure {
            Some(message) => Err(io::Error::other(message.clone())),
            None => Ok(()),
        })
    }

    /// The upload stopped reading early; report why.
    fn poll_broken(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<usize>> {
        self.sender = None;
        self.poll_upload(cx).map(|result| {
            result?;
            Err(io::Error::new(io::ErrorKind::BrokenPipe, format!("upload to {} stopped early", self.path)))
        })
    }
}

/// Re-read the metadata of a freshly uploaded object into its cache entry.
///
/// A path that isn't cached is left alone. If the object can't be listed the
/// stale entry is dropped, unless it holds locks or properties.
async fn refresh(backend: &BackendHandle, cache: &ResourceCache, path: &VirtualPath, key: &str) {
    if !cache.contains(path).await {
        return;
    }
    let request = ListRequest::new(key).with_delimiter("/");
    let listed = match listing::list(backend, request).await {
        Ok(listing) => listing.resources.into_iter().find(|resource| resource.path == key),
        Err(err) => {
            tracing::warn!(path = %path, error = ?err, "Could not refresh uploaded object");
            None
        },
    };
    match listed {
        Some(resource) => cache.insert(path, resource).await,
        None => {
            let stateless = cache.update(path, |entry| entry.locks.is_empty() && entry.properties.is_empty()).await;
            if stateless == Some(true) {
                cache.evict(path).await;
            }
        },
    }
}

impl AsyncWrite for UploadWriter {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(sender) = this.sender.as_mut() else {
            if this.upload.is_some() {
                // Stopped early and still waiting on the upload's outcome.
                return this.poll_broken(cx);
            }
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::NotConnected, "upload already closed")));
        };
        match sender.poll_ready(cx) {
            Poll::Pending => return Poll::Pending,
            Poll::Ready(Ok(())) => {},
            Poll::Ready(Err(_)) => return this.poll_broken(cx),
        }
        match sender.start_send(Ok(Bytes::copy_from_slice(buf))) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => this.poll_broken(cx),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Chunks can't be forced through to the object store before close.
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        // Dropping the sender ends the body stream, which lets the upload finish.
        this.sender = None;
        this.poll_upload(cx)
    }
}

impl Drop for UploadWriter {
    fn drop(&mut self) {
        let Some(upload) = self.upload.take() else {
            return;
        };
        if let Some(mut sender) = self.sender.take() {
            // Poison the body first so a backend that already consumed the
            // stream's end can't commit a truncated object.
            let abandoned = io::Error::new(io::ErrorKind::Interrupted, "upload abandoned");
            let _ = sender.try_send(Err(exn::Exn::from(StorageErrorKind::Io(abandoned))));
        }
        upload.abort();
        tracing::debug!(path = %self.path, "Upload abandoned before close");
    }
}
