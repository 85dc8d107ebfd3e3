//! In-memory metadata for one filesystem entry.

use crate::locks::Lock;
use crate::path::{is_dir_key, name_of_key};
use ossdav_storage::ObjectEntry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

/// Where a resource came from.
///
/// Both [`Marker`](Self::Marker) and [`Prefix`](Self::Prefix) are valid
/// directory representations; the object store decides which one exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// The mount root, never backed by an object.
    Root,
    /// A regular object.
    File,
    /// A zero-byte placeholder object whose key ends in `/`.
    Marker,
    /// Synthesized from a common prefix returned by a listing.
    Prefix,
}
impl ResourceKind {
    pub fn resource_type(self) -> ResourceType {
        match self {
            Self::File => ResourceType::File,
            Self::Root | Self::Marker | Self::Prefix => ResourceType::Directory,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceType {
    File,
    Directory,
}

/// One file or directory, as last seen in the object store.
///
/// `locks` and `properties` only live in process memory (and in the mount
/// state file); they are never written to the object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Last path segment.
    pub name: String,
    /// Object-store key; directories end in `/`, the root is empty.
    pub path: String,
    pub kind: ResourceKind,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub storage_class: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_modified: Option<OffsetDateTime>,
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub locks: Vec<Lock>,
}

impl Resource {
    fn empty(name: impl Into<String>, path: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kind,
            size: None,
            etag: None,
            url: None,
            storage_class: None,
            last_modified: None,
            properties: BTreeMap::new(),
            locks: Vec::new(),
        }
    }

    pub fn root() -> Self {
        Self::empty("", "", ResourceKind::Root)
    }

    /// A directory placeholder object at `key` (which must end in `/`).
    pub fn marker(key: &str) -> Self {
        Self { size: Some(0), ..Self::empty(name_of_key(key), key, ResourceKind::Marker) }
    }

    /// A directory synthesized from a listing's common prefix.
    pub fn from_prefix(prefix: &str) -> Self {
        Self { size: Some(0), ..Self::empty(name_of_key(prefix), prefix, ResourceKind::Prefix) }
    }

    /// A file or placeholder object returned by a listing.
    pub fn from_entry(entry: &ObjectEntry) -> Self {
        let kind = match is_dir_key(&entry.key) {
            true => ResourceKind::Marker,
            false => ResourceKind::File,
        };
        Self {
            size: Some(entry.size),
            etag: entry.etag.clone(),
            url: entry.url.clone(),
            storage_class: entry.storage_class.clone(),
            last_modified: entry.last_modified,
            ..Self::empty(name_of_key(&entry.key), entry.key.clone(), kind)
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.kind.resource_type()
    }

    pub fn is_dir(&self) -> bool {
        self.resource_type() == ResourceType::Directory
    }

    /// Size in bytes; directories have none.
    pub fn size(&self) -> Option<u64> {
        match self.is_dir() {
            true => None,
            false => self.size,
        }
    }

    pub fn etag(&self) -> Option<&str> {
        match self.is_dir() {
            true => None,
            false => self.etag.as_deref(),
        }
    }

    /// Object stores don't track creation separately, so files report their
    /// last modification. Directories have no timestamp and report now.
    pub fn creation_date(&self) -> OffsetDateTime {
        self.last_modified()
    }

    pub fn last_modified(&self) -> OffsetDateTime {
        match (self.is_dir(), self.last_modified) {
            (false, Some(modified)) => modified,
            _ => OffsetDateTime::now_utc(),
        }
    }

    pub fn display_name(&self) -> &str {
        match self.kind {
            ResourceKind::Root => "/",
            _ => &self.name,
        }
    }
}
