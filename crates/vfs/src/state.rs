//! Mount state persisted across restarts.
//!
//! Only the mount identity and the resource cache (with its locks and
//! properties) are kept. The file is a warm-start hint: when it's missing the
//! mount starts with a cold cache.

use crate::cache::ResourceCache;
use crate::error::{ErrorKind, Result};
use crate::filesystem::{BucketFileSystem, Credentials, MountIdentity};
use crate::path::VirtualPath;
use crate::resource::Resource;
use exn::ResultExt;
use ossdav_storage::BackendHandle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

/// Format marker written into every state file.
pub const STATE_UID: &str = "ossdav-mount-state-1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountState {
    pub uid: String,
    pub region: String,
    pub bucket: String,
    pub credentials: Credentials,
    /// Cache entries keyed by rooted path.
    #[serde(default)]
    pub resources: BTreeMap<String, Resource>,
}

impl MountState {
    /// Snapshot a mounted filesystem.
    pub async fn capture(fs: &BucketFileSystem) -> Self {
        let identity = fs.identity().clone();
        Self {
            uid: STATE_UID.to_string(),
            region: identity.region,
            bucket: identity.bucket,
            credentials: identity.credentials,
            resources: fs.cache().snapshot().await,
        }
    }

    /// Rebuild a filesystem on `backend` with the captured cache.
    ///
    /// Entries whose key isn't a usable path are dropped.
    pub async fn restore(self, backend: BackendHandle) -> Result<BucketFileSystem> {
        if self.uid != STATE_UID {
            exn::bail!(ErrorKind::State(format!("unsupported mount state format {:?}", self.uid)));
        }
        let resources = self.resources.into_iter().filter_map(|(key, resource)| match VirtualPath::parse(&key) {
            Ok(path) => Some((path.cache_key(), resource)),
            Err(_) => {
                tracing::warn!(key = %key, "Dropping cached resource with unusable path");
                None
            },
        });
        let cache = ResourceCache::new();
        cache.restore(resources).await;
        tracing::debug!(entries = cache.len().await, bucket = %self.bucket, "Mount state restored");
        let identity = MountIdentity { region: self.region, bucket: self.bucket, credentials: self.credentials };
        Ok(BucketFileSystem::new(identity, backend).with_cache(cache))
    }

    /// Write the state as JSON, replacing the file atomically.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let state_error = || ErrorKind::State(path.display().to_string());
        let json = serde_json::to_vec_pretty(self).or_raise(state_error)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.or_raise(state_error)?;
        }
        let partial = path.with_extension("json.partial");
        tokio::fs::write(&partial, json).await.or_raise(state_error)?;
        tokio::fs::rename(&partial, path).await.or_raise(state_error)?;
        Ok(())
    }

    /// Read a state file. A missing file is `None`.
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        let state_error = || ErrorKind::State(path.display().to_string());
        let json = match tokio::fs::read(path).await {
            Ok(json) => json,
            Err(err) if err.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(exn::Exn::from(err).raise(state_error())),
        };
        let state: Self = serde_json::from_slice(&json).or_raise(state_error)?;
        if state.uid != STATE_UID {
            exn::bail!(ErrorKind::State(format!("unsupported mount state format {:?}", state.uid)));
        }
        Ok(Some(state))
    }
}
