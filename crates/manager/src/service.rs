use crate::FileManager;
use crate::error::Result;
use async_trait::async_trait;
use filegate_iocache::FileStream;
use filegate_meta::{Entry, FileRecord};
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

/// Callback for [`FileService::walk_file_link`]; return `false` to stop.
pub type WalkFn<'a> = &'a mut (dyn FnMut(&str, &Entry) -> bool + Send);

/// Everything a protocol front end (HTTP, S3, WebDAV, the CLI) needs from
/// the file store.
///
/// Construct one [`FileManager`] at startup and hand it to every front end
/// as `Arc<dyn FileService>`.
#[async_trait]
pub trait FileService: Send + Sync {
    /// Largest part accepted by [`create_part`](Self::create_part).
    fn block_size(&self) -> u64;

    async fn create(
        &self,
        size: u64,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64>;
    async fn create_draft(&self, size: u64) -> Result<u64>;
    async fn create_part(
        &self,
        file_id: u64,
        part_id: u32,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<()>;
    async fn finish_create(&self, file_id: u64, extinfo: Option<Value>) -> Result<()>;

    async fn open(&self, file_id: u64) -> Result<FileStream>;
    async fn open_path(&self, path: &str) -> Result<(Entry, FileStream)>;
    async fn file_info(&self, file_id: u64) -> Result<FileRecord>;

    async fn create_file_link(&self, path: &str, file_id: u64, size: u64, is_dir: bool) -> Result<Entry>;
    async fn stat_file_link(&self, path: &str) -> Result<Entry>;
    async fn list_file_link(&self, path: &str) -> Result<Vec<Entry>>;
    async fn walk_file_link(&self, prefix: &str, visit: WalkFn<'_>) -> Result<()>;
    async fn remove_file_link(&self, path: &str) -> Result<u64>;
    async fn rename_file_link(&self, src: &str, dst: &str, overwrite: bool) -> Result<()>;
    async fn copy_file_link(&self, src: &str, dst: &str, overwrite: bool) -> Result<()>;
    async fn public_link(&self, path: &str) -> Result<String>;

    async fn purge(&self, before_ms: Option<i64>, cancel: &CancellationToken) -> Result<u64>;
}

#[async_trait]
impl FileService for FileManager {
    fn block_size(&self) -> u64 {
        FileManager::block_size(self)
    }

    async fn create(
        &self,
        size: u64,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        FileManager::create(self, size, reader, cancel).await
    }

    async fn create_draft(&self, size: u64) -> Result<u64> {
        FileManager::create_draft(self, size).await
    }

    async fn create_part(
        &self,
        file_id: u64,
        part_id: u32,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<()> {
        FileManager::create_part(self, file_id, part_id, reader, cancel).await
    }

    async fn finish_create(&self, file_id: u64, extinfo: Option<Value>) -> Result<()> {
        FileManager::finish_create(self, file_id, extinfo).await
    }

    async fn open(&self, file_id: u64) -> Result<FileStream> {
        FileManager::open(self, file_id).await
    }

    async fn open_path(&self, path: &str) -> Result<(Entry, FileStream)> {
        FileManager::open_path(self, path).await
    }

    async fn file_info(&self, file_id: u64) -> Result<FileRecord> {
        FileManager::file_info(self, file_id).await
    }

    async fn create_file_link(&self, path: &str, file_id: u64, size: u64, is_dir: bool) -> Result<Entry> {
        FileManager::create_file_link(self, path, file_id, size, is_dir).await
    }

    async fn stat_file_link(&self, path: &str) -> Result<Entry> {
        FileManager::stat_file_link(self, path).await
    }

    async fn list_file_link(&self, path: &str) -> Result<Vec<Entry>> {
        FileManager::list_file_link(self, path).await
    }

    async fn walk_file_link(&self, prefix: &str, visit: WalkFn<'_>) -> Result<()> {
        FileManager::walk_file_link(self, prefix, |path, entry| visit(path, entry)).await
    }

    async fn remove_file_link(&self, path: &str) -> Result<u64> {
        FileManager::remove_file_link(self, path).await
    }

    async fn rename_file_link(&self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        FileManager::rename_file_link(self, src, dst, overwrite).await
    }

    async fn copy_file_link(&self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        FileManager::copy_file_link(self, src, dst, overwrite).await
    }

    async fn public_link(&self, path: &str) -> Result<String> {
        FileManager::public_link(self, path).await
    }

    async fn purge(&self, before_ms: Option<i64>, cancel: &CancellationToken) -> Result<u64> {
        FileManager::purge(self, before_ms, cancel).await
    }
}
