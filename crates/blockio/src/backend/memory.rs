//! In-memory block backend.

use super::read_limited;
use crate::error::{ErrorKind, Result};
use crate::{BlobReader, BlockBackend};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io::Cursor;
use tokio::io::AsyncRead;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Ephemeral block backend.
///
/// Blobs are stored in a `HashMap` behind a [`RwLock`], keyed by a random
/// UUID, so all trait methods can operate on `&self` without external
/// synchronisation. Everything is lost when the backend is dropped, which
/// makes it the default for tests and throwaway instances.
///
/// # Examples
///
/// ```
/// use filegate_blockio::backend::{BlockBackend, MemoryBackend};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MemoryBackend::new(4096).with_name("scratch");
/// let key = backend.upload(&mut &b"data..."[..]).await?;
/// assert_eq!(backend.blob(&key).await.as_deref(), Some(&b"data..."[..]));
/// # Ok(())
/// # }
/// ```
pub struct MemoryBackend {
    name: String,
    max_file_size: u64,
    storage: RwLock<HashMap<String, Bytes>>,
}

impl MemoryBackend {
    pub fn new(max_file_size: u64) -> Self {
        Self {
            name: "mem".to_string(),
            max_file_size,
            storage: RwLock::new(HashMap::new()),
        }
    }

    /// Change the name of the memory backend.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Raw stored bytes of a blob, bypassing any wrapper.
    pub async fn blob(&self, blob_key: &str) -> Option<Bytes> {
        self.storage.read().await.get(blob_key).cloned()
    }

    /// Number of stored blobs.
    pub async fn len(&self) -> usize {
        self.storage.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl BlockBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    async fn upload(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<String> {
        let data = read_limited(reader, self.max_file_size).await?;
        let blob_key = Uuid::new_v4().to_string();
        tracing::trace!(backend = %self.name, %blob_key, bytes = data.len(), "Stored blob in memory");
        self.storage.write().await.insert(blob_key.clone(), Bytes::from(data));
        Ok(blob_key)
    }

    async fn download(&self, blob_key: &str, offset: u64) -> Result<BlobReader> {
        let data = self.blob(blob_key).await.ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(blob_key.to_string())))?;
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
        Ok(Box::new(Cursor::new(data.slice(start..))))
    }
}
