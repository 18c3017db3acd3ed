//! SQLite-backed metadata for filegate.
//!
//! Three stores share one [`Database`]:
//!
//! - [`FileStore`]: logical files and their INIT/READY lifecycle.
//! - [`PartStore`]: the `(file_id, part_id) -> blob_key` mapping.
//! - [`Directory`]: the path namespace linking names to file IDs.
//!
//! Each store keeps a bounded in-process cache in front of point reads and
//! invalidates affected keys on write.

mod db;
pub mod dir;
pub mod error;
mod file_store;
pub mod models;
mod part_store;

pub use crate::db::Database;
pub use crate::dir::{DirPath, Directory};
pub use crate::file_store::{DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL, FileCache, FileStore};
pub use crate::models::{Entry, EntryKind, FileRecord, FileState, PartRecord};
pub use crate::part_store::{PartCache, PartStore};
