//! Block backend trait and implementations.
//!
//! This module defines the `BlockBackend` trait, which provides a unified
//! interface for blob storage across different backends (memory, local
//! filesystem, chat service CDN, S3-compatible services).

#[cfg(feature = "chat")]
mod chat;
mod local;
mod memory;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "chat")]
pub use self::chat::{ChatBackend, DEFAULT_API_BASE, DEFAULT_URL_CACHE_SIZE, DEFAULT_URL_CACHE_TTL};
pub use self::local::LocalBackend;
pub use self::memory::MemoryBackend;
#[cfg(feature = "s3")]
pub use self::s3::{DEFAULT_S3_MAX_FILE_SIZE, S3Backend, S3Config};
use crate::BlobReader;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Default block size for backends that don't configure one (20 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;

/// Unified interface for block backends.
///
/// A backend is append-only from the caller's point of view: blobs are
/// uploaded once and read back any number of times. The `blob_key` returned
/// by [`upload()`](Self::upload) is opaque and must always fetch the same
/// bytes.
///
/// # Examples
///
/// ```
/// use filegate_blockio::backend::{BlockBackend, MemoryBackend};
/// use tokio::io::AsyncReadExt;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MemoryBackend::new(1024);
/// let key = backend.upload(&mut &b"hello world"[..]).await?;
///
/// let mut tail = String::new();
/// backend.download(&key, 6).await?.read_to_string(&mut tail).await?;
/// assert_eq!(tail, "world");
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait BlockBackend: Send + Sync {
    /// Name of the configured backend (used for logging only).
    fn name(&self) -> &str;

    /// Largest blob this backend accepts, which doubles as the block size
    /// used to split logical files.
    fn max_file_size(&self) -> u64;

    /// Store the entire stream as one blob and return its key.
    ///
    /// Reads at most `max_file_size() + 1` bytes; a longer stream fails
    /// with [`TooLarge`](crate::error::ErrorKind::TooLarge).
    async fn upload(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<String>;

    /// Stream a blob starting at `offset`.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) for unknown
    /// keys, and [`RangeUnsupported`](crate::error::ErrorKind::RangeUnsupported)
    /// when the backend cannot honour a non-zero offset.
    async fn download(&self, blob_key: &str, offset: u64) -> Result<BlobReader>;
}

/// Buffer an upload stream, enforcing the block size limit.
pub(crate) async fn read_limited(reader: &mut (dyn AsyncRead + Send + Unpin), limit: u64) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    reader
        .take(limit.saturating_add(1))
        .read_to_end(&mut data)
        .await
        .or_raise(|| ErrorKind::BackendError("failed reading upload stream".to_string()))?;
    if data.len() as u64 > limit {
        exn::bail!(ErrorKind::TooLarge(limit));
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_limited_accepts_exact_limit() {
        let data = read_limited(&mut &[7u8; 16][..], 16).await.unwrap();
        assert_eq!(data.len(), 16);
    }

    #[tokio::test]
    async fn test_read_limited_rejects_oversized() {
        let err = read_limited(&mut &[7u8; 17][..], 16).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::TooLarge(16)));
    }
}
