//! File records: drafts, the READY transition, lookups and removal.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{FileRecord, FileRow, FileState, to_db};
use exn::ResultExt;
use filegate_util::cache::{Cache, LruCache};
use filegate_util::{IdGenerator, now_ms};
use serde_json::Value;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Entries kept by the default metadata caches.
pub const DEFAULT_CACHE_CAPACITY: usize = 10_000;
/// Lifetime of a cached metadata entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);
/// Keeps bulk `IN (...)` statements well under SQLite's variable limit.
pub(crate) const BULK_CHUNK: usize = 500;

pub type FileCache = Arc<dyn Cache<u64, FileRecord>>;

#[derive(Clone)]
pub struct FileStore {
    pool: SqlitePool,
    ids: Arc<IdGenerator>,
    cache: FileCache,
}

impl From<&Database> for FileStore {
    fn from(db: &Database) -> Self {
        Self::new(db, Arc::new(LruCache::new(DEFAULT_CACHE_CAPACITY, Some(DEFAULT_CACHE_TTL))))
    }
}

impl FileStore {
    pub fn new(db: &Database, cache: FileCache) -> Self {
        Self { pool: db.pool().clone(), ids: Arc::clone(db.ids()), cache }
    }

    // =========================================================================
    // Insert / Update
    // =========================================================================

    /// Insert a new file in state INIT and return its freshly minted ID.
    #[instrument(skip(self))]
    pub async fn create_draft(&self, file_size: u64, part_count: u32) -> Result<u64> {
        let file_id = self.ids.next_id();
        let now = now_ms();
        sqlx::query(include_str!("../queries/insert_file.sql"))
            .bind(to_db(file_id, "file id")?)
            .bind(to_db(file_size, "file size")?)
            .bind(i64::from(part_count))
            .bind(FileState::Init.code())
            .bind(now)
            .bind(now)
            .bind("{}")
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tracing::debug!(file_id, "Created draft file record");
        Ok(file_id)
    }

    /// Transition a file to READY, storing its extended info.
    #[instrument(skip(self, extinfo))]
    pub async fn mark_ready(&self, file_id: u64, extinfo: &Value) -> Result<()> {
        let extinfo = serde_json::to_string(extinfo).or_raise(|| ErrorKind::InvalidData("extinfo"))?;
        self.cache.del(&file_id);
        let result = sqlx::query(include_str!("../queries/mark_file_ready.sql"))
            .bind(FileState::Ready.code())
            .bind(extinfo)
            .bind(now_ms())
            .bind(to_db(file_id, "file id")?)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        self.cache.del(&file_id);
        if result.rows_affected() == 0 {
            exn::bail!(ErrorKind::FileNotFound(file_id));
        }
        Ok(())
    }

    // =========================================================================
    // Select
    // =========================================================================

    /// Fetch file records by ID. Unknown IDs are simply absent from the map.
    pub async fn get_file_info(&self, file_ids: &[u64]) -> Result<HashMap<u64, FileRecord>> {
        let mut found = HashMap::with_capacity(file_ids.len());
        let mut missing = Vec::new();
        let epoch = self.cache.epoch();
        for &file_id in file_ids {
            match self.cache.get(&file_id) {
                Some(record) => {
                    found.insert(file_id, record);
                },
                None => missing.push(file_id),
            }
        }
        for chunk in missing.chunks(BULK_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new(
                "SELECT id, file_id, file_size, file_part_count, file_state, ctime, mtime, extinfo \
                 FROM file_tab WHERE file_id IN (",
            );
            let mut separated = query.separated(", ");
            for &file_id in chunk {
                separated.push_bind(to_db(file_id, "file id")?);
            }
            separated.push_unseparated(")");
            let rows: Vec<FileRow> =
                query.build_query_as().fetch_all(&self.pool).await.or_raise(|| ErrorKind::Database)?;
            for row in rows {
                let record = FileRecord::try_from(row)?;
                self.cache.fill(record.file_id, record.clone(), epoch);
                found.insert(record.file_id, record);
            }
        }
        Ok(found)
    }

    /// Fetch a single file record.
    pub async fn get(&self, file_id: u64) -> Result<Option<FileRecord>> {
        Ok(self.get_file_info(&[file_id]).await?.remove(&file_id))
    }

    /// Visit every file record in insertion order, `batch` rows per query.
    /// The callback returns `false` to stop early.
    pub async fn scan_file(&self, batch: usize, mut visit: impl FnMut(&FileRecord) -> bool) -> Result<()> {
        let limit = i64::try_from(batch.max(1)).or_raise(|| ErrorKind::InvalidData("batch size"))?;
        let mut after = 0i64;
        loop {
            let rows: Vec<FileRow> = sqlx::query_as(include_str!("../queries/scan_files.sql"))
                .bind(after)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
                .or_raise(|| ErrorKind::Database)?;
            let count = rows.len();
            for row in rows {
                after = row.id;
                if !visit(&FileRecord::try_from(row)?) {
                    return Ok(());
                }
            }
            if (count as i64) < limit {
                return Ok(());
            }
        }
    }

    // =========================================================================
    // Delete
    // =========================================================================

    /// Delete file records, returning how many rows were removed.
    #[instrument(skip(self, file_ids), fields(count = file_ids.len()))]
    pub async fn delete_file(&self, file_ids: &[u64]) -> Result<u64> {
        let mut removed = 0;
        for chunk in file_ids.chunks(BULK_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM file_tab WHERE file_id IN (");
            let mut separated = query.separated(", ");
            for &file_id in chunk {
                separated.push_bind(to_db(file_id, "file id")?);
            }
            separated.push_unseparated(")");
            let result = query.build().execute(&self.pool).await.or_raise(|| ErrorKind::Database)?;
            removed += result.rows_affected();
            for file_id in chunk {
                self.cache.del(file_id);
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> FileStore {
        FileStore::from(&Database::connect_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_draft_then_ready() {
        let files = store().await;
        let file_id = files.create_draft(10_000, 10).await.unwrap();

        let draft = files.get(file_id).await.unwrap().unwrap();
        assert_eq!(draft.state, FileState::Init);
        assert_eq!(draft.file_size, 10_000);
        assert_eq!(draft.part_count, 10);
        assert_eq!(draft.extinfo, json!({}));

        files.mark_ready(file_id, &json!({"md5": "d41d8cd9"})).await.unwrap();
        let ready = files.get(file_id).await.unwrap().unwrap();
        assert!(ready.is_ready());
        assert_eq!(ready.extinfo["md5"], "d41d8cd9");
    }

    #[tokio::test]
    async fn test_mark_ready_unknown_file() {
        let files = store().await;
        let err = files.mark_ready(404, &json!({})).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::FileNotFound(404)));
    }

    #[tokio::test]
    async fn test_get_file_info_bulk() {
        let files = store().await;
        let a = files.create_draft(1, 1).await.unwrap();
        let b = files.create_draft(2, 1).await.unwrap();
        // Warm the cache for one of them.
        files.get(a).await.unwrap();
        let found = files.get_file_info(&[a, b, 12345]).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&a].file_size, 1);
        assert_eq!(found[&b].file_size, 2);
    }

    #[tokio::test]
    async fn test_scan_pages_in_order_and_stops() {
        let files = store().await;
        let mut created = Vec::new();
        for size in 0..7 {
            created.push(files.create_draft(size, 1).await.unwrap());
        }
        let mut seen = Vec::new();
        files
            .scan_file(3, |record| {
                seen.push(record.file_id);
                true
            })
            .await
            .unwrap();
        assert_eq!(seen, created);

        let mut first_two = Vec::new();
        files
            .scan_file(3, |record| {
                first_two.push(record.file_id);
                first_two.len() < 2
            })
            .await
            .unwrap();
        assert_eq!(first_two, created[..2]);
    }

    #[tokio::test]
    async fn test_delete_invalidates_cache() {
        let files = store().await;
        let file_id = files.create_draft(5, 1).await.unwrap();
        assert!(files.get(file_id).await.unwrap().is_some());
        assert_eq!(files.delete_file(&[file_id, 999]).await.unwrap(), 1);
        assert!(files.get(file_id).await.unwrap().is_none());
    }
}
