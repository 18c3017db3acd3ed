//! The file manager: turns a block backend and the metadata stores into a
//! file system of arbitrarily large files.
//!
//! ## Uploading
//!
//! A file of `size` bytes is split into `ceil(size / block_size)` parts,
//! where `block_size` is the backend's
//! [`max_file_size`](filegate_blockio::BlockBackend::max_file_size). Each
//! part becomes one blob. The file record starts as a draft (INIT) and only
//! becomes readable after [`finish_create`](FileManager::finish_create).
//!
//! ## Reading
//!
//! [`open`](FileManager::open) returns a seekable stream that opens the blob
//! under the cursor on demand, passing through the IO cache.
//!
//! ## Namespace
//!
//! Paths are linked to file IDs through the directory engine. Unlinked files
//! (including abandoned drafts) are reclaimed by [`purge`](FileManager::purge).

pub mod error;
mod layout;
mod link;
mod purge;
mod reader;
mod service;
mod upload;

#[cfg(test)]
mod tests;

pub use crate::layout::Layout;
pub use crate::reader::FileReader;
pub use crate::service::{FileService, WalkFn};
use filegate_blockio::BackendHandle;
use filegate_iocache::IoCache;
use filegate_meta::{Database, Directory, FileStore, PartStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct FileManager {
    backend: BackendHandle,
    files: FileStore,
    parts: PartStore,
    dir: Directory,
    io_cache: Arc<IoCache>,
}

impl FileManager {
    pub fn new(db: &Database, backend: BackendHandle, io_cache: IoCache) -> Self {
        tracing::debug!(backend = backend.name(), block_size = backend.max_file_size(), "Creating file manager");
        Self {
            backend,
            files: FileStore::from(db),
            parts: PartStore::from(db),
            dir: Directory::from(db),
            io_cache: Arc::new(io_cache),
        }
    }

    /// Size of every part except possibly the last.
    pub fn block_size(&self) -> u64 {
        self.backend.max_file_size()
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}
