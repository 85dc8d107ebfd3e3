//! Process-local lock and dead-property state.
//!
//! Neither is written to the object store; other processes sharing the same
//! bucket never see them. Both managers are small handles bound to one path
//! that read and write through the [`ResourceCache`].

use crate::cache::ResourceCache;
use crate::error::{ErrorKind, Result};
use crate::path::VirtualPath;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    Exclusive,
    Shared,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockDepth {
    Zero,
    Infinity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// `urn:uuid:` lock token.
    pub token: String,
    pub owner: String,
    pub scope: LockScope,
    pub depth: LockDepth,
    /// Requested timeout in seconds, `None` for infinite.
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(with = "time::serde::rfc3339")]
    pub created: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires: Option<OffsetDateTime>,
}

impl Lock {
    pub fn new(owner: impl Into<String>, scope: LockScope, depth: LockDepth, timeout: Option<Duration>) -> Self {
        let created = OffsetDateTime::now_utc();
        Self {
            token: format!("urn:uuid:{}", uuid::Uuid::new_v4()),
            owner: owner.into(),
            scope,
            depth,
            timeout: timeout.map(|t| t.as_secs()),
            created,
            expires: timeout.map(|t| created + t),
        }
    }

    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    /// Restart the timeout from now, optionally with a new duration.
    pub fn refresh(&mut self, timeout: Option<Duration>) {
        if let Some(timeout) = timeout {
            self.timeout = Some(timeout.as_secs());
        }
        self.expires = self.timeout.map(|secs| OffsetDateTime::now_utc() + Duration::from_secs(secs));
    }
}

fn not_found(path: &VirtualPath) -> exn::Exn<ErrorKind> {
    exn::Exn::from(ErrorKind::ResourceNotFound(path.cache_key()))
}

/// Lock state of one path.
#[derive(Debug, Clone)]
pub struct LockManager {
    cache: ResourceCache,
    path: VirtualPath,
}

impl LockManager {
    pub(crate) fn new(cache: ResourceCache, path: VirtualPath) -> Self {
        Self { cache, path }
    }

    pub fn path(&self) -> &VirtualPath {
        &self.path
    }

    /// Active locks. Expired ones are dropped on the way.
    pub async fn locks(&self) -> Result<Vec<Lock>> {
        let now = OffsetDateTime::now_utc();
        self.cache
            .update(&self.path, |resource| {
                resource.locks.retain(|lock| !lock.is_expired(now));
                resource.locks.clone()
            })
            .await
            .ok_or_else(|| not_found(&self.path))
    }

    /// Store a lock as-is, replacing any lock with the same token.
    pub async fn set_lock(&self, lock: Lock) -> Result<()> {
        self.cache
            .update(&self.path, |resource| {
                resource.locks.retain(|existing| existing.token != lock.token);
                resource.locks.push(lock);
            })
            .await
            .ok_or_else(|| not_found(&self.path))
    }

    /// Create and store a new lock.
    ///
    /// An exclusive lock can't join any active lock, and a shared lock can't
    /// join an exclusive one; both are an
    /// [`InvalidOperation`](ErrorKind::InvalidOperation).
    pub async fn lock(
        &self,
        owner: impl Into<String>,
        scope: LockScope,
        depth: LockDepth,
        timeout: Option<Duration>,
    ) -> Result<Lock> {
        let lock = Lock::new(owner, scope, depth, timeout);
        let now = OffsetDateTime::now_utc();
        let granted = self
            .cache
            .update(&self.path, |resource| {
                resource.locks.retain(|existing| !existing.is_expired(now));
                let conflict = resource
                    .locks
                    .iter()
                    .any(|existing| scope == LockScope::Exclusive || existing.scope == LockScope::Exclusive);
                if !conflict {
                    resource.locks.push(lock.clone());
                }
                !conflict
            })
            .await
            .ok_or_else(|| not_found(&self.path))?;
        if !granted {
            exn::bail!(ErrorKind::InvalidOperation(self.path.cache_key()));
        }
        tracing::debug!(path = %self.path, token = %lock.token, "Lock granted");
        Ok(lock)
    }

    pub async fn get_lock(&self, token: &str) -> Result<Option<Lock>> {
        Ok(self.locks().await?.into_iter().find(|lock| lock.token == token))
    }

    /// Extend a lock's expiry. Unknown (or expired) tokens are not found.
    pub async fn refresh(&self, token: &str, timeout: Option<Duration>) -> Result<Lock> {
        let now = OffsetDateTime::now_utc();
        self.cache
            .update(&self.path, |resource| {
                resource.locks.retain(|lock| !lock.is_expired(now));
                resource.locks.iter_mut().find(|lock| lock.token == token).map(|lock| {
                    lock.refresh(timeout);
                    lock.clone()
                })
            })
            .await
            .ok_or_else(|| not_found(&self.path))?
            .ok_or_else(|| exn::Exn::from(ErrorKind::ResourceNotFound(format!("{} ({token})", self.path))))
    }

    /// Returns whether a lock with that token was held.
    pub async fn remove_lock(&self, token: &str) -> Result<bool> {
        self.cache
            .update(&self.path, |resource| {
                let before = resource.locks.len();
                resource.locks.retain(|lock| lock.token != token);
                resource.locks.len() != before
            })
            .await
            .ok_or_else(|| not_found(&self.path))
    }
}

/// Dead properties of one path.
#[derive(Debug, Clone)]
pub struct PropertyManager {
    cache: ResourceCache,
    path: VirtualPath,
}

impl PropertyManager {
    pub(crate) fn new(cache: ResourceCache, path: VirtualPath) -> Self {
        Self { cache, path }
    }

    pub fn path(&self) -> &VirtualPath {
        &self.path
    }

    pub async fn properties(&self) -> Result<BTreeMap<String, String>> {
        self.cache.get(&self.path).await.map(|resource| resource.properties).ok_or_else(|| not_found(&self.path))
    }

    pub async fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self.properties().await?.remove(name))
    }

    pub async fn set(&self, name: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let (name, value) = (name.into(), value.into());
        self.cache
            .update(&self.path, |resource| {
                resource.properties.insert(name, value);
            })
            .await
            .ok_or_else(|| not_found(&self.path))
    }

    /// Returns whether the property existed.
    pub async fn remove(&self, name: &str) -> Result<bool> {
        self.cache
            .update(&self.path, |resource| resource.properties.remove(name).is_some())
            .await
            .ok_or_else(|| not_found(&self.path))
    }
}
