//! S3-compatible object store.
//!
//! This module provides an object store implementation for S3-compatible
//! services including AWS S3, Alibaba OSS (S3 compatibility mode), Backblaze
//! B2, MinIO, and others.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via the mount configuration. Each
//! mount specifies its own `key_id` and `key_secret`.

use crate::{
    ListPage, ListRequest, ObjectEntry, ObjectStore,
    backend::ByteStream,
    error::{Error, ErrorKind, Result},
    validate_key,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Credentials, Region, http::HttpResponse, retry::RetryConfig},
    error::{DisplayErrorContext, SdkError},
    primitives::{ByteStream as S3ByteStream, DateTime},
    types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier},
};
use bytes::{Bytes, BytesMut};
use exn::{OptionExt, ResultExt};
use futures::TryStreamExt;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Generous default for concurrent S3 requests.
const DEFAULT_CONCURRENT_REQUESTS: usize = 100;
/// S3 refuses to delete more than this many keys in one request.
const MAX_DELETE_BATCH: usize = 1000;
/// Streamed uploads switch to multipart once the body outgrows one part.
/// Must stay above the 5 MiB minimum part size.
const PART_SIZE: usize = 8 * 1024 * 1024;
/// Characters left as-is when a key is used in the `x-amz-copy-source` header.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'/').remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// S3-compatible object store.
///
/// Stores objects in an S3 bucket, optionally under a key prefix. All keys
/// are relative to the configured prefix (if any), so a mount can be scoped
/// to a "folder" of a shared bucket.
///
/// # Examples
///
/// ```no_run
/// use ossdav_storage::backend::S3Backend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = S3Backend::new(
///     "oss",
///     "my-bucket",
///     Some("shared/".to_string()),
///     "oss-cn-hangzhou",
///     Some("https://oss-cn-hangzhou.aliyuncs.com"),
///     "access_key_id",
///     "secret_access_key",
/// ).map_err(|e| format!("{e:?}"))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct S3Backend {
    name: String,
    client: Client,
    bucket: String,
    prefix: Option<String>,
    /// Rate limiter for concurrent S3 requests.
    rate_limiter: Arc<Semaphore>,
}

impl S3Backend {
    /// Create a new S3 object store.
    ///
    /// # Arguments
    /// * `name` - A name for this backend (used in logging)
    /// * `bucket` - S3 bucket name
    /// * `prefix` - Optional key prefix (acts as the mount root)
    /// * `region` - Region identifier (e.g., "us-west-004" for Backblaze)
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - Access key ID
    /// * `key_secret` - Secret access key
    pub fn new(
        name: impl Into<String>,
        bucket: impl Into<String>,
        prefix: Option<String>,
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let prefix = match prefix {
            Some(prefix) => Some(validate_key(&prefix)?.trim_end_matches('/').to_string()),
            None => None,
        };
        let name = name.into();
        let bucket = bucket.into();
        let region = Region::new(region.into());
        let credentials = Credentials::new(key_id, key_secret, None, None, "ossdav-config");
        let mut config_builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(region)
            // Configure retry policy with exponential backoff (1 initial + 3 retries)
            .retry_config(RetryConfig::standard().with_max_attempts(4))
            // Use path-style addressing for better compatibility with
            // S3-compatible services (MinIO, etc.)
            .force_path_style(true);
        // Set custom endpoint for non-AWS services
        if let Some(endpoint_url) = endpoint {
            config_builder = config_builder.endpoint_url(endpoint_url);
        }
        let client = Client::from_conf(config_builder.build());
        let rate_limiter = Arc::new(Semaphore::new(DEFAULT_CONCURRENT_REQUESTS));
        Ok(Self {
            name,
            client,
            bucket,
            prefix,
            rate_limiter,
        })
    }

    /// Construct the full S3 key from a mount-relative key.
    ///
    /// The empty key is allowed and maps to the mount root (used when
    /// listing from the top).
    fn full_key(&self, key: &str) -> Result<String> {
        if !key.is_empty() {
            validate_key(key)?;
        }
        Ok(join_key(self.prefix.as_deref(), key))
    }

    /// Full S3 key for a key that came back from a listing. Buckets written
    /// by other clients can hold keys `validate_key` would refuse, and those
    /// still have to page, copy and delete.
    fn listed_key(&self, key: &str) -> String {
        join_key(self.prefix.as_deref(), key)
    }

    /// Acquire a rate limiter permit before making an S3 API call.
    async fn acquire_permit(&self) -> OwnedSemaphorePermit {
        // unwrap is safe: semaphore is never closed
        self.rate_limiter.clone().acquire_owned().await.unwrap()
    }

    /// Convert AWS DateTime to OffsetDateTime.
    fn parse_datetime(dt: &DateTime) -> Result<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos())
            .or_raise(|| ErrorKind::BackendError("S3 datetime out of range".to_string()))
    }

    async fn put_object(&self, full_key: &str, data: Bytes) -> Result<()> {
        let _permit = self.acquire_permit().await;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(full_key)
            .body(S3ByteStream::from(data))
            .send()
            .await
            .map_err(|e| map_sdk_error(e, full_key))?;
        Ok(())
    }

    async fn upload_parts(
        &self,
        full_key: &str,
        upload_id: &str,
        mut buffer: BytesMut,
        mut body: ByteStream,
    ) -> Result<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        loop {
            let next = body.try_next().await?;
            let finished = next.is_none();
            if let Some(chunk) = next {
                buffer.extend_from_slice(&chunk);
            }
            while buffer.len() >= PART_SIZE || (finished && !buffer.is_empty()) {
                let data = buffer.split_to(PART_SIZE.min(buffer.len())).freeze();
                let number = i32::try_from(parts.len() + 1)
                    .or_raise(|| ErrorKind::BackendError(format!("too many parts for {full_key}")))?;
                let _permit = self.acquire_permit().await;
                let output = self
                    .client
                    .upload_part()
                    .bucket(&self.bucket)
                    .key(full_key)
                    .upload_id(upload_id)
                    .part_number(number)
                    .body(S3ByteStream::from(data))
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, full_key))?;
                parts.push(CompletedPart::builder().set_e_tag(output.e_tag().map(str::to_string)).part_number(number).build());
            }
            if finished {
                return Ok(parts);
            }
        }
    }

    async fn multipart_upload(&self, full_key: &str, buffer: BytesMut, body: ByteStream) -> Result<()> {
        let created = {
            let _permit = self.acquire_permit().await;
            self.client
                .create_multipart_upload()
                .bucket(&self.bucket)
                .key(full_key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, full_key))?
        };
        let upload_id = created
            .upload_id()
            .ok_or_raise(|| ErrorKind::BackendError(format!("no upload id issued for {full_key}")))?
            .to_string();
        let parts = match self.upload_parts(full_key, &upload_id, buffer, body).await {
            Ok(parts) => parts,
            Err(err) => {
                // Leaving the upload open would keep billing for the stored
                // parts; failing to abort it is logged but not reported.
                let _permit = self.acquire_permit().await;
                if let Err(abort) =
                    self.client.abort_multipart_upload().bucket(&self.bucket).key(full_key).upload_id(&upload_id).send().await
                {
                    tracing::warn!(key = full_key, error = %DisplayErrorContext(&abort), "Failed to abort multipart upload");
                }
                return Err(err);
            },
        };
        let _permit = self.acquire_permit().await;
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(full_key)
            .upload_id(&upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
            .send()
            .await
            .map_err(|e| map_sdk_error(e, full_key))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, request: &ListRequest) -> Result<ListPage> {
        let prefix = self.full_key(request.prefix.as_deref().unwrap_or(""))?;
        let mut call = self.client.list_objects().bucket(&self.bucket);
        if !prefix.is_empty() {
            call = call.prefix(&prefix);
        }
        if let Some(delimiter) = &request.delimiter {
            call = call.delimiter(delimiter);
        }
        if let Some(marker) = &request.marker {
            call = call.marker(self.listed_key(marker));
        }
        if let Some(max_keys) = request.max_keys {
            call = call.max_keys(i32::try_from(max_keys).unwrap_or(i32::MAX));
        }
        let output = {
            let _permit = self.acquire_permit().await;
            match call.send().await {
                Ok(output) => output,
                Err(err) if status_of(&err) == Some(404) => {
                    tracing::debug!(backend = %self.name, bucket = %self.bucket, "Bucket not found during listing");
                    return Ok(ListPage { not_found: true, ..ListPage::default() });
                },
                Err(err) => return Err(map_sdk_error(err, &prefix)),
            }
        };

        let mut page = ListPage::default();
        for object in output.contents() {
            let Some(key) = object.key().map(|k| strip_key(self.prefix.as_deref(), k)).filter(|k| !k.is_empty()) else {
                continue;
            };
            let mut entry = ObjectEntry::new(key, object.size().and_then(|s| u64::try_from(s).ok()).unwrap_or(0));
            entry.etag = object.e_tag().map(str::to_string);
            entry.last_modified = object.last_modified().map(Self::parse_datetime).transpose()?;
            entry.storage_class = object.storage_class().map(|c| c.as_str().to_string());
            page.objects.push(entry);
        }
        page.prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix())
            .map(|p| strip_key(self.prefix.as_deref(), p).to_string())
            .collect();
        if output.is_truncated().unwrap_or(false) {
            // NextMarker is only returned when a delimiter was requested;
            // otherwise the last key of the page is the continuation point.
            let last_object = output.contents().last().and_then(|o| o.key());
            let last_prefix = output.common_prefixes().last().and_then(|p| p.prefix());
            page.next_marker = output
                .next_marker()
                .or(last_object.max(last_prefix))
                .map(|marker| strip_key(self.prefix.as_deref(), marker).to_string());
        }
        Ok(page)
    }

    async fn put(&self, key: &str, data: Bytes) -> Result<()> {
        let full_key = self.full_key(key)?;
        self.put_object(&full_key, data).await
    }

    async fn put_stream(&self, key: &str, mut body: ByteStream) -> Result<()> {
        let full_key = self.full_key(key)?;
        let mut buffer = BytesMut::new();
        // Small bodies go up as a single PUT.
        while buffer.len() < PART_SIZE {
            match body.try_next().await? {
                Some(chunk) => buffer.extend_from_slice(&chunk),
                None => return self.put_object(&full_key, buffer.freeze()).await,
            }
        }
        self.multipart_upload(&full_key, buffer, body).await
    }

    async fn get_stream(&self, key: &str) -> Result<ByteStream> {
        let full_key = self.full_key(key)?;
        let output = {
            let _permit = self.acquire_permit().await;
            self.client
                .get_object()
                .bucket(&self.bucket)
                .key(&full_key)
                .send()
                .await
                .map_err(|e| map_sdk_error(e, key))?
        };
        let mut body = output.body;
        Ok(Box::pin(stream! {
            loop {
                match body.try_next().await {
                    Ok(Some(chunk)) => yield Ok(chunk),
                    Ok(None) => break,
                    Err(err) => {
                        yield Err(exn::Exn::from(ErrorKind::Network(format!("{full_key}: {err}"))));
                        break;
                    },
                }
            }
        }))
    }

    async fn copy(&self, destination: &str, source: &str) -> Result<()> {
        let destination = self.full_key(destination)?;
        let source = self.listed_key(source);
        let copy_source = format!("{}/{}", self.bucket, utf8_percent_encode(&source, COPY_SOURCE));
        let _permit = self.acquire_permit().await;
        self.client
            .copy_object()
            .bucket(&self.bucket)
            .key(&destination)
            .copy_source(copy_source)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &source))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let full_key = self.full_key(key)?;
        let _permit = self.acquire_permit().await;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&full_key)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, &full_key))?;
        Ok(())
    }

    async fn delete_multi(&self, keys: &[String], quiet: bool) -> Result<()> {
        for batch in keys.chunks(MAX_DELETE_BATCH) {
            let mut objects = Vec::with_capacity(batch.len());
            for key in batch {
                let identifier = ObjectIdentifier::builder()
                    .key(self.listed_key(key))
                    .build()
                    .or_raise(|| ErrorKind::BackendError(format!("invalid delete request for {key}")))?;
                objects.push(identifier);
            }
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(quiet)
                .build()
                .or_raise(|| ErrorKind::BackendError("invalid bulk delete request".to_string()))?;
            let output = {
                let _permit = self.acquire_permit().await;
                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(|e| map_sdk_error(e, &batch[0]))?
            };
            if let Some(failed) = output.errors().first() {
                exn::bail!(ErrorKind::BackendError(format!(
                    "failed to delete {}: {}",
                    failed.key().unwrap_or_default(),
                    failed.message().unwrap_or_default()
                )));
            }
        }
        Ok(())
    }
}

/// Prefix a mount-relative key with the mount's key prefix.
fn join_key(prefix: Option<&str>, key: &str) -> String {
    match prefix {
        Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), key),
        None => key.to_string(),
    }
}

/// Strip the mount's key prefix from a full S3 key.
fn strip_key<'a>(prefix: Option<&str>, key: &'a str) -> &'a str {
    match prefix {
        Some(prefix) => {
            let prefix_normalized = prefix.trim_end_matches('/');
            key.strip_prefix(prefix_normalized).and_then(|s| s.strip_prefix('/')).unwrap_or(key)
        },
        None => key,
    }
}

fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

/// Classify an SDK failure into an actionable storage error.
fn map_sdk_error<E>(err: SdkError<E, HttpResponse>, key: &str) -> Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let kind = match (&err, status_of(&err)) {
        (_, Some(404)) => ErrorKind::NotFound(key.to_string()),
        (_, Some(403)) => ErrorKind::PermissionDenied(key.to_string()),
        (SdkError::DispatchFailure(_) | SdkError::TimeoutError(_), _) => {
            ErrorKind::Network(DisplayErrorContext(&err).to_string())
        },
        _ => ErrorKind::BackendError(DisplayErrorContext(&err).to_string()),
    };
    exn::Exn::from(kind)
}
