//! Namespace operations: linking paths to files.

use crate::FileManager;
use crate::error::{ErrorKind, Result, meta};
use exn::OptionExt;
use filegate_iocache::FileStream;
use filegate_meta::{Entry, FileRecord};
use filegate_util::fileid::{encode_file_id, public_link};

impl FileManager {
    pub async fn file_info(&self, file_id: u64) -> Result<FileRecord> {
        self.files
            .get(file_id)
            .await
            .map_err(meta)?
            .ok_or_raise(|| ErrorKind::NotFound(encode_file_id(file_id)))
    }

    /// Link `path` to an existing file, or create a directory there when
    /// `is_dir` is set (`file_id` and `size` are then ignored). Missing parent
    /// directories are created.
    pub async fn create_file_link(&self, path: &str, file_id: u64, size: u64, is_dir: bool) -> Result<Entry> {
        if is_dir {
            return self.dir.mkdir(path).await.map_err(meta);
        }
        self.file_info(file_id).await?;
        let entry = self.dir.create(path, size, &file_id.to_string()).await.map_err(meta)?;
        tracing::debug!(path, file_id, "Linked file");
        Ok(entry)
    }

    pub async fn stat_file_link(&self, path: &str) -> Result<Entry> {
        self.dir.stat(path).await.map_err(meta)
    }

    pub async fn list_file_link(&self, path: &str) -> Result<Vec<Entry>> {
        self.dir.list(path).await.map_err(meta)
    }

    /// Depth-first walk below `prefix`; see [`Directory::walk`](filegate_meta::Directory::walk).
    pub async fn walk_file_link(&self, prefix: &str, visit: impl FnMut(&str, &Entry) -> bool) -> Result<()> {
        self.dir.walk(prefix, visit).await.map_err(meta)
    }

    /// Unlink a path, recursively for directories. File content is left for
    /// purge.
    pub async fn remove_file_link(&self, path: &str) -> Result<u64> {
        self.dir.remove(path).await.map_err(meta)
    }

    pub async fn rename_file_link(&self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        self.dir.rename(src, dst, overwrite).await.map_err(meta)
    }

    pub async fn copy_file_link(&self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        self.dir.copy(src, dst, overwrite).await.map_err(meta)
    }

    /// Open the file linked at `path`.
    pub async fn open_path(&self, path: &str) -> Result<(Entry, FileStream)> {
        let entry = self.stat_file_link(path).await?;
        let file_id = Self::linked_file(&entry, path)?;
        let stream = self.open(file_id).await?;
        Ok((entry, stream))
    }

    /// Public URL path for the file linked at `path`.
    pub async fn public_link(&self, path: &str) -> Result<String> {
        let entry = self.stat_file_link(path).await?;
        let file_id = Self::linked_file(&entry, path)?;
        Ok(public_link(file_id, Some(&entry.name)))
    }

    fn linked_file(entry: &Entry, path: &str) -> Result<u64> {
        if entry.is_dir() {
            exn::bail!(ErrorKind::IsADirectory(path.to_string()));
        }
        entry.file_id().ok_or_raise(|| ErrorKind::NotFound(path.to_string()))
    }
}
