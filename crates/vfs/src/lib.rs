//! Hierarchical filesystem over a flat object store.
//!
//! The protocol engine talks to a [`FileSystem`]; [`BucketFileSystem`]
//! implements it on top of any [`ObjectStore`](ossdav_storage::ObjectStore)
//! by emulating directories with `/`-suffixed keys and common prefixes.
//! Metadata is cached in a [`ResourceCache`] that can be persisted across
//! restarts with [`MountState`].

mod cache;
pub mod error;
mod filesystem;
pub mod listing;
mod locks;
mod path;
mod resource;
mod state;
pub mod tree;
mod upload;

pub use crate::cache::ResourceCache;
pub use crate::filesystem::{BucketFileSystem, Credentials, FileSystem, MountIdentity, Relocation, classify};
pub use crate::locks::{Lock, LockDepth, LockManager, LockScope, PropertyManager};
pub use crate::path::{VirtualPath, is_dir_key, name_of_key};
pub use crate::resource::{Resource, ResourceKind, ResourceType};
pub use crate::state::{MountState, STATE_UID};
pub use crate::upload::UploadWriter;
