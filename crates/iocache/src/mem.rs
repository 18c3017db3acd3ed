use crate::FileStream;
use crate::error::{ErrorKind, Result};
use bytes::Bytes;
use filegate_util::cache::{Cache, LruCache};
use std::io::Cursor;
use tokio::io::AsyncReadExt;

/// L1: whole files as shared byte buffers.
pub(crate) struct MemTier {
    entries: LruCache<u64, Bytes>,
    pub(crate) size_limit: u64,
}

impl MemTier {
    pub(crate) fn new(capacity: usize, size_limit: u64) -> Self {
        Self { entries: LruCache::new(capacity, None), size_limit }
    }

    pub(crate) fn get(&self, file_id: u64) -> Option<FileStream> {
        self.entries.get(&file_id).map(|bytes| Box::new(Cursor::new(bytes)) as FileStream)
    }

    /// Drain `source` into memory and hand back a stream over the buffer.
    pub(crate) async fn fill(&self, file_id: u64, size: u64, mut source: FileStream) -> Result<FileStream> {
        let mut buffer = Vec::with_capacity(usize::try_from(size).unwrap_or_default());
        source.read_to_end(&mut buffer).await.map_err(ErrorKind::Source)?;
        let actual = buffer.len() as u64;
        if actual != size {
            exn::bail!(ErrorKind::SizeMismatch { expected: size, actual });
        }
        let bytes = Bytes::from(buffer);
        self.entries.set(file_id, bytes.clone());
        Ok(Box::new(Cursor::new(bytes)))
    }
}
