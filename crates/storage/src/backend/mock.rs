//! In-memory object store for testing.

use crate::ObjectStore;
use crate::backend::ByteStream;
use crate::error::{ErrorKind, Result};
use crate::models::{ListPage, ListRequest, ObjectEntry};
use crate::path::validate as validate_key;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use std::collections::{BTreeMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Same page cap as S3.
const DEFAULT_MAX_KEYS: usize = 1000;
/// Downloads are chunked so consumers exercise their streaming paths.
const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;
/// How many times an in-flight copy yields back to the runtime, giving other
/// copies a chance to overlap with it.
const COPY_YIELDS: usize = 4;

#[derive(Clone)]
struct MockObject {
    data: Bytes,
    etag: String,
    modified: OffsetDateTime,
}
impl MockObject {
    fn new(data: Bytes) -> Self {
        let etag = format!("\"{}\"", blake3::hash(&data));
        Self { data, etag, modified: OffsetDateTime::now_utc() }
    }
}

/// In-memory object store for testing.
///
/// Objects are stored in a sorted map behind a [`RwLock`], so all trait
/// methods can operate on `&self` without external synchronisation. Listing
/// follows V1 S3 semantics (marker, prefix, delimiter, max-keys) so the
/// pagination and common-prefix handling of callers can be tested without
/// network access.
///
/// # Examples
///
/// ```
/// use ossdav_storage::backend::MockBackend;
/// use ossdav_storage::{ListRequest, ObjectStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_objects([
///     ("docs/", ""),
///     ("docs/report.pdf", "%PDF-1.7"),
///     ("docs/2024/q1.pdf", "%PDF-1.7"),
/// ]);
/// let request = ListRequest::new("docs/").with_delimiter("/").with_marker("docs/");
/// let page = backend.list(&request).await.unwrap();
/// assert_eq!(page.objects.len(), 1);
/// assert_eq!(page.prefixes, vec!["docs/2024/".to_string()]);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<BTreeMap<String, MockObject>>,
    page_size: usize,
    missing_bucket: bool,
    unreachable: bool,
    failing_copies: HashSet<String>,
    failing_uploads: HashSet<String>,
    interrupted_uploads: HashSet<String>,
    copies_in_flight: AtomicUsize,
    max_copies_in_flight: AtomicUsize,
    copy_calls: AtomicUsize,
    list_calls: AtomicUsize,
    delete_multi_calls: AtomicUsize,
}

impl MockBackend {
    /// Create a mock backend pre-populated with objects.
    ///
    /// Panics if any key fails validation. If test setup is wrong, then test
    /// should not pass.
    pub fn with_objects(objects: impl IntoIterator<Item = (impl Into<String>, impl Into<Bytes>)>) -> Self {
        let mut map = BTreeMap::new();
        for (key, data) in objects {
            let key = key.into();
            if validate_key(&key).is_err() {
                // The panic here is DELIBERATE. MockBackend is intended to be
                // used in tests; panics are expected. There is no error result.
                panic!("MockBackend::with_objects: invalid key {key}");
            }
            map.insert(key, MockObject::new(data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            page_size: DEFAULT_MAX_KEYS,
            missing_bucket: false,
            unreachable: false,
            failing_copies: HashSet::new(),
            failing_uploads: HashSet::new(),
            interrupted_uploads: HashSet::new(),
            copies_in_flight: AtomicUsize::new(0),
            max_copies_in_flight: AtomicUsize::new(0),
            copy_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
            delete_multi_calls: AtomicUsize::new(0),
        }
    }

    /// Change the name of the mock backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Cap every listing page at `page_size` entries, regardless of the
    /// requested max-keys, to force callers through pagination.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Make every listing answer as if the bucket did not exist.
    pub fn with_missing_bucket(mut self) -> Self {
        self.missing_bucket = true;
        self
    }

    /// Make every listing fail with a network error.
    pub fn with_unreachable_listing(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Fail any copy whose *source* is `key`.
    pub fn with_failing_copy(mut self, key: impl Into<String>) -> Self {
        self.failing_copies.insert(key.into());
        self
    }

    /// Fail any streamed upload to `key` after consuming its body.
    pub fn with_failing_upload(mut self, key: impl Into<String>) -> Self {
        self.failing_uploads.insert(key.into());
        self
    }

    /// Fail any streamed upload to `key` as soon as its first chunk arrives,
    /// dropping the rest of the body unread.
    pub fn with_interrupted_upload(mut self, key: impl Into<String>) -> Self {
        self.interrupted_uploads.insert(key.into());
        self
    }

    /// Snapshot of every key currently stored, in sorted order.
    pub async fn keys(&self) -> Vec<String> {
        self.storage.read().await.keys().cloned().collect()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.storage.read().await.contains_key(key)
    }

    /// Highest number of copies that were ever running at the same time.
    pub fn max_concurrent_copies(&self) -> usize {
        self.max_copies_in_flight.load(Ordering::SeqCst)
    }

    pub fn copy_calls(&self) -> usize {
        self.copy_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn delete_multi_calls(&self) -> usize {
        self.delete_multi_calls.load(Ordering::SeqCst)
    }

    fn entry(key: &str, object: &MockObject) -> ObjectEntry {
        ObjectEntry::new(key, object.data.len() as u64)
            .with_etag(object.etag.clone())
            .with_last_modified(object.modified)
            .with_storage_class("STANDARD")
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let objects: [(&str, &str); 0] = [];
        Self::with_objects(objects)
    }
}

#[async_trait]
impl ObjectStore for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, request: &ListRequest) -> Result<ListPage> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            exn::bail!(ErrorKind::Network(format!("{} is unreachable", self.name)));
        }
        if self.missing_bucket {
            return Ok(ListPage { not_found: true, ..ListPage::default() });
        }
        let prefix = request.prefix.as_deref().unwrap_or("");
        let delimiter = request.delimiter.as_deref().filter(|d| !d.is_empty());
        let marker = request.marker.as_deref();
        let limit = request.max_keys.map_or(DEFAULT_MAX_KEYS, |m| m as usize).min(self.page_size).max(1);

        let guard = self.storage.read().await;
        let range = match marker {
            Some(marker) => guard.range::<str, _>((Bound::Excluded(marker), Bound::Unbounded)),
            None => guard.range::<str, _>(..),
        };
        let mut page = ListPage::default();
        let mut returned = 0;
        let mut last: Option<&str> = None;
        for (key, object) in range {
            if !key.starts_with(prefix) {
                // Sorted keys: anything before the prefix is skipped, anything
                // after it means we're done.
                match key.as_str() < prefix {
                    true => continue,
                    false => break,
                }
            }
            let common = delimiter.and_then(|d| key[prefix.len()..].find(d).map(|i| &key[..prefix.len() + i + d.len()]));
            if let Some(common) = common {
                // Keys sharing a common prefix are contiguous, so comparing
                // against the last rolled-up prefix is enough to dedupe.
                // A marker pointing at (or past) the prefix means it was
                // already handed out on an earlier page.
                if marker.is_some_and(|m| common <= m) || page.prefixes.last().is_some_and(|p| p == common) {
                    continue;
                }
            }
            if returned == limit {
                page.next_marker = last.map(str::to_string);
                break;
            }
            returned += 1;
            match common {
                Some(common) => {
                    page.prefixes.push(common.to_string());
                    last = Some(common);
                },
                None => {
                    page.objects.push(Self::entry(key, object));
                    last = Some(key);
                },
            }
        }
        Ok(page)
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let key = validate_key(key)?;
        self.storage.write().await.insert(key.to_string(), MockObject::new(data));
        Ok(())
    }

    async fn put_stream(&self, key: &str, mut body: ByteStream) -> Result<()> {
        let key = validate_key(key)?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.try_next().await? {
            if self.interrupted_uploads.contains(key) {
                exn::bail!(ErrorKind::Network(format!("connection reset while uploading {key}")));
            }
            buffer.extend_from_slice(&chunk);
        }
        if self.failing_uploads.contains(key) {
            exn::bail!(ErrorKind::BackendError(format!("upload of {key} rejected")));
        }
        self.storage.write().await.insert(key.to_string(), MockObject::new(buffer.freeze()));
        Ok(())
    }

    async fn get_stream(&self, key: &str) -> Result<ByteStream> {
        let key = validate_key(key)?;
        let data = match self.storage.read().await.get(key) {
            Some(object) => object.data.clone(),
            None => exn::bail!(ErrorKind::NotFound(key.to_string())),
        };
        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(DOWNLOAD_CHUNK_SIZE)
            .map(|start| Ok(data.slice(start..(start + DOWNLOAD_CHUNK_SIZE).min(data.len()))))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn copy(&self, destination: &str, source: &str) -> Result<()> {
        let destination = validate_key(destination)?;
        self.copy_calls.fetch_add(1, Ordering::SeqCst);
        let running = self.copies_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_copies_in_flight.fetch_max(running, Ordering::SeqCst);
        for _ in 0..COPY_YIELDS {
            tokio::task::yield_now().await;
        }
        let result = if self.failing_copies.contains(source) {
            Err(exn::Exn::from(ErrorKind::BackendError(format!("copy of {source} rejected"))))
        } else {
            let mut guard = self.storage.write().await;
            match guard.get(source).cloned() {
                Some(object) => {
                    guard.insert(destination.to_string(), MockObject::new(object.data));
                    Ok(())
                },
                None => Err(exn::Exn::from(ErrorKind::NotFound(source.to_string()))),
            }
        };
        self.copies_in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = validate_key(key)?;
        self.storage.write().await.remove(key);
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String], _quiet: bool) -> Result<()> {
        self.delete_multi_calls.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.storage.write().await;
        for key in keys {
            guard.remove(key);
        }
        Ok(())
    }
}
