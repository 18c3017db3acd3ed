//! Read-through cache for assembled files, keyed by `file_id`.
//!
//! - **L1 (memory)** holds files no larger than `mem_key_size_limit` as
//!   in-memory buffers.
//! - **L2 (disk)** holds files no larger than `file_key_size_limit` that did
//!   not fit L1, as whole files under `file_cache_dir`. It survives restarts.
//!
//! Anything larger bypasses both tiers. File content never changes once it
//! is readable, so entries are never invalidated; stale entries for purged
//! files simply age out.

mod config;
mod disk;
pub mod error;
mod mem;

pub use crate::config::IoCacheConfig;
use crate::disk::DiskTier;
use crate::error::{ErrorKind, Result};
use crate::mem::MemTier;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncSeek};

/// A readable, seekable byte stream.
pub trait ReadSeek: AsyncRead + AsyncSeek + Send + Unpin {}
impl<T: AsyncRead + AsyncSeek + Send + Unpin> ReadSeek for T {}

pub type FileStream = Box<dyn ReadSeek>;

#[derive(Default)]
pub struct IoCache {
    mem: Option<MemTier>,
    disk: Option<DiskTier>,
}

impl IoCache {
    /// A cache that always calls through to the source.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Build the enabled tiers. Opening the disk tier rescans its directory.
    pub async fn new(config: &IoCacheConfig) -> Result<Self> {
        let mem = match config.enable_mem {
            true if config.mem_key_count == 0 => {
                exn::bail!(ErrorKind::InvalidConfig("mem_key_count must be positive".to_string()))
            },
            true => Some(MemTier::new(config.mem_key_count, config.mem_key_size_limit)),
            false => None,
        };
        let disk = match config.enable_file {
            true if config.file_key_count == 0 => {
                exn::bail!(ErrorKind::InvalidConfig("file_key_count must be positive".to_string()))
            },
            true if config.file_cache_dir.as_os_str().is_empty() => {
                exn::bail!(ErrorKind::InvalidConfig("file_cache_dir must be set".to_string()))
            },
            true => Some(
                DiskTier::open(&config.file_cache_dir, config.file_key_count, config.file_key_size_limit).await?,
            ),
            false => None,
        };
        Ok(Self { mem, disk })
    }

    /// Open `file_id` (of `size` bytes) through the cache. `miss` is only
    /// invoked when no tier can serve the file.
    ///
    /// Errors produced by the source (either `miss` itself or reading the
    /// stream it returns) surface as [`ErrorKind::Source`] carrying the
    /// original `io::Error`.
    pub async fn load<F, Fut>(&self, file_id: u64, size: u64, miss: F) -> Result<FileStream>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::io::Result<FileStream>>,
    {
        if let Some(mem) = self.mem.as_ref().filter(|mem| size <= mem.size_limit) {
            if let Some(stream) = mem.get(file_id) {
                tracing::trace!(file_id, "Memory cache hit");
                return Ok(stream);
            }
            let source = miss().await.map_err(ErrorKind::Source)?;
            return mem.fill(file_id, size, source).await;
        }
        if let Some(disk) = self.disk.as_ref().filter(|disk| size <= disk.size_limit) {
            if let Some(stream) = disk.get(file_id).await? {
                tracing::trace!(file_id, "Disk cache hit");
                return Ok(stream);
            }
            let source = miss().await.map_err(ErrorKind::Source)?;
            return disk.fill(file_id, size, source).await;
        }
        Ok(miss().await.map_err(ErrorKind::Source)?)
    }
}
