//! Filesystem Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Storage failures are raised into
//! [`ErrorKind::Backend`] so the original object store error stays available
//! as a child of the tree.

use derive_more::{Display, Error};

/// A filesystem error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for filesystem operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy exposed to the protocol engine.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Path (or listing) yields no matching entry
    #[display("resource not found: {_0}")]
    ResourceNotFound(#[error(not(source))] String),
    /// Mutating the root, relocating a directory into itself, or a tree
    /// operation with at least one failed copy
    #[display("invalid operation on {_0}")]
    InvalidOperation(#[error(not(source))] String),
    /// Path contains NUL bytes or escapes the root
    #[display("invalid path: {_0}")]
    InvalidPath(#[error(not(source))] String),
    /// Opaque object store failure
    #[display("object store request failed")]
    Backend,
    /// Mount state could not be read, written or understood
    #[display("mount state error: {_0}")]
    State(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend)
    }
}
