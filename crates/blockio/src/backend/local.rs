//! Local filesystem block backend.
//!
//! Each blob is one file under the configured root directory, sharded by
//! the first two characters of its key: `<root>/<key[0..2]>/<key>`. Files
//! are written to a temporary sibling first and renamed into place, so a
//! crashed upload never leaves a truncated blob behind a valid key.

use crate::error::{ErrorKind, Result};
use crate::{BlobReader, BlockBackend};
use async_trait::async_trait;
use exn::ResultExt;
use std::fs::create_dir_all as sync_create_dir;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

/// Local filesystem block backend.
///
/// # Examples
///
/// ```no_run
/// use filegate_blockio::backend::LocalBackend;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = LocalBackend::new("disk", "/var/lib/filegate/blobs", 20 * 1024 * 1024)?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct LocalBackend {
    name: String,
    /// Root directory holding the blob shards
    root: PathBuf,
    max_file_size: u64,
}

impl LocalBackend {
    /// Create a new local filesystem backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not absolute, or exists but is not a
    /// directory.
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>, max_file_size: u64) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_absolute() {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        if root.exists() {
            if !root.is_dir() {
                exn::bail!(ErrorKind::InvalidPath(root));
            }
        } else {
            // Use non-async here; it'll only happen once on backend
            // initialization and the registry factory is the only caller.
            sync_create_dir(&root).map_err(|e| Self::map_io_error(e, &root))?;
        }
        Ok(Self { name: name.into(), root, max_file_size })
    }

    /// Absolute path of a blob, rejecting keys that could escape the root.
    fn blob_path(&self, blob_key: &str) -> Result<PathBuf> {
        let valid = blob_key.len() >= 2 && blob_key.chars().all(|c| c.is_ascii_alphanumeric() || c == '-');
        if !valid {
            exn::bail!(ErrorKind::InvalidPath(PathBuf::from(blob_key)));
        }
        Ok(self.root.join(&blob_key[..2]).join(blob_key))
    }

    fn map_io_error(e: std::io::Error, path: &Path) -> ErrorKind {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(path.display().to_string()),
            _ => ErrorKind::Io(e),
        }
    }

    /// Copy at most `max_file_size + 1` bytes into `temp`, returning the
    /// number of bytes written.
    async fn write_temp(&self, temp: &Path, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<u64> {
        let mut file = File::create(temp).await.map_err(ErrorKind::Io)?;
        let mut limited = reader.take(self.max_file_size.saturating_add(1));
        let written = tokio::io::copy(&mut limited, &mut file).await.map_err(ErrorKind::Io)?;
        file.sync_all().await.map_err(ErrorKind::Io)?;
        Ok(written)
    }
}

#[async_trait]
impl BlockBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    async fn upload(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<String> {
        let blob_key = Uuid::new_v4().to_string();
        let path = self.blob_path(&blob_key)?;
        let shard = path.parent().map(Path::to_path_buf).unwrap_or_else(|| self.root.clone());
        fs::create_dir_all(&shard).await.map_err(|e| Self::map_io_error(e, &shard))?;

        let temp = path.with_file_name(format!("{blob_key}.{}.temp", Uuid::new_v4().simple()));
        let written = match self.write_temp(&temp, reader).await {
            Ok(written) => written,
            Err(err) => {
                _ = fs::remove_file(&temp).await;
                return Err(err);
            },
        };
        if written > self.max_file_size {
            _ = fs::remove_file(&temp).await;
            exn::bail!(ErrorKind::TooLarge(self.max_file_size));
        }
        fs::rename(&temp, &path)
            .await
            .or_raise(|| ErrorKind::BackendError(format!("failed to commit blob {blob_key}")))?;
        tracing::debug!(backend = %self.name, %blob_key, bytes = written, "Stored blob on disk");
        Ok(blob_key)
    }

    async fn download(&self, blob_key: &str, offset: u64) -> Result<BlobReader> {
        let path = self.blob_path(blob_key)?;
        let mut file = File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound(blob_key.to_string()),
            _ => ErrorKind::Io(e),
        })?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await.map_err(ErrorKind::Io)?;
        }
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn read_all(mut reader: BlobReader) -> Vec<u8> {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).await.unwrap();
        out
    }

    #[test]
    fn test_relative_root_rejected() {
        let err = LocalBackend::new("local", "relative/path", 16).err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }

    #[test]
    fn test_root_is_created() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested/blobs");
        LocalBackend::new("local", &root, 16).unwrap();
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_upload_is_sharded_and_readable() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new("local", dir.path(), 64).unwrap();
        let key = backend.upload(&mut &b"0123456789"[..]).await.unwrap();
        let expected = dir.path().join(&key[..2]).join(&key);
        assert!(expected.is_file());
        assert_eq!(read_all(backend.download(&key, 0).await.unwrap()).await, b"0123456789");
        assert_eq!(read_all(backend.download(&key, 4).await.unwrap()).await, b"456789");
    }

    #[tokio::test]
    async fn test_too_large_leaves_nothing_behind() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new("local", dir.path(), 4).unwrap();
        let err = backend.upload(&mut &b"12345"[..]).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::TooLarge(4)));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flat_map(|shard| std::fs::read_dir(shard.unwrap().path()).unwrap())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_download_not_found() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new("local", dir.path(), 64).unwrap();
        let err = backend.download("00000000-0000-0000-0000-000000000000", 0).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_traversal_key_rejected() {
        let dir = tempdir().unwrap();
        let backend = LocalBackend::new("local", dir.path(), 64).unwrap();
        let err = backend.download("../../etc/passwd", 0).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::InvalidPath(_)));
    }
}
