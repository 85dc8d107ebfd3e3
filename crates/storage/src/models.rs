//! Storage models.
//!
//! These types describe a single listing call against an object store and
//! the objects it returns. Keys are always relative to the backend's root
//! (no leading slash); "directory" keys end in `/`.

use time::OffsetDateTime;

/// Parameters for a single (paginated) listing call.
///
/// Mirrors the V1 S3 `ListObjects` request: results start strictly *after*
/// `marker`, only keys beginning with `prefix` are returned, and keys that
/// contain `delimiter` after the prefix are rolled up into common prefixes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListRequest {
    pub prefix: Option<String>,
    pub delimiter: Option<String>,
    pub marker: Option<String>,
    pub max_keys: Option<u32>,
}
impl ListRequest {
    /// An empty prefix lists the whole backend.
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self {
            prefix: (!prefix.is_empty()).then_some(prefix),
            ..Self::default()
        }
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = Some(delimiter.into());
        self
    }

    /// An empty marker starts from the beginning of the listing.
    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        let marker = marker.into();
        self.marker = (!marker.is_empty()).then_some(marker);
        self
    }

    pub fn with_max_keys(mut self, max_keys: u32) -> Self {
        self.max_keys = Some(max_keys);
        self
    }
}

/// One object returned by a listing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    /// Object key, relative to the backend root
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    pub etag: Option<String>,
    pub last_modified: Option<OffsetDateTime>,
    pub storage_class: Option<String>,
    /// Backend-issued access URL, if the backend hands them out
    pub url: Option<String>,
}
impl ObjectEntry {
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        Self {
            key: key.into(),
            size,
            etag: None,
            last_modified: None,
            storage_class: None,
            url: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn with_last_modified(mut self, last_modified: OffsetDateTime) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    pub fn with_storage_class(mut self, storage_class: impl Into<String>) -> Self {
        self.storage_class = Some(storage_class.into());
        self
    }
}

/// A single page of listing results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Exact keys under the requested prefix
    pub objects: Vec<ObjectEntry>,
    /// Common prefixes (each ends with the requested delimiter)
    pub prefixes: Vec<String>,
    /// Continuation marker; `None` once the listing is exhausted
    pub next_marker: Option<String>,
    /// The backend answered with a 404-equivalent status (e.g. missing
    /// bucket). Any objects in the page are still valid.
    pub not_found: bool,
}
impl ListPage {
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.prefixes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_prefix_and_marker_are_dropped() {
        let request = ListRequest::new("").with_marker("");
        assert_eq!(request.prefix, None);
        assert_eq!(request.marker, None);
    }

    #[test]
    fn test_request_builder() {
        let request = ListRequest::new("dir/").with_delimiter("/").with_marker("dir/").with_max_keys(10);
        assert_eq!(request.prefix.as_deref(), Some("dir/"));
        assert_eq!(request.delimiter.as_deref(), Some("/"));
        assert_eq!(request.marker.as_deref(), Some("dir/"));
        assert_eq!(request.max_keys, Some(10));
    }
}
