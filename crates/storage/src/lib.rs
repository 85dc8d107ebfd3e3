pub mod backend;
pub mod error;
mod models;
mod path;

pub use crate::backend::{ByteStream, ObjectStore};
pub use crate::models::{ListPage, ListRequest, ObjectEntry};
pub use crate::path::validate as validate_key;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn ObjectStore + Send + Sync>;
