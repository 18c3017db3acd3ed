use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::file_store::{BULK_CHUNK, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
use crate::models::{PartRecord, PartRow, to_db};
use exn::ResultExt;
use filegate_util::cache::{Cache, LruCache};
use filegate_util::now_ms;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

pub type PartCache = Arc<dyn Cache<(u64, u32), PartRecord>>;

/// Maps `(file_id, part_id)` to the blob key holding that chunk.
#[derive(Clone)]
pub struct PartStore {
    pool: SqlitePool,
    cache: PartCache,
}

impl From<&Database> for PartStore {
    fn from(db: &Database) -> Self {
        Self::new(db, Arc::new(LruCache::new(DEFAULT_CACHE_CAPACITY, Some(DEFAULT_CACHE_TTL))))
    }
}

impl PartStore {
    pub fn new(db: &Database, cache: PartCache) -> Self {
        Self { pool: db.pool().clone(), cache }
    }

    /// Record the blob for a part. Re-uploading a part replaces its blob key.
    #[instrument(skip(self))]
    pub async fn create_part(&self, file_id: u64, part_id: u32, blob_key: &str) -> Result<()> {
        let key = (file_id, part_id);
        let now = now_ms();
        let db_file_id = to_db(file_id, "file id")?;
        self.cache.del(&key);

        let inserted = sqlx::query(include_str!("../queries/insert_part.sql"))
            .bind(db_file_id)
            .bind(i64::from(part_id))
            .bind(blob_key)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await;
        match inserted {
            Ok(_) => {},
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                let result = sqlx::query(include_str!("../queries/update_part.sql"))
                    .bind(blob_key)
                    .bind(now)
                    .bind(db_file_id)
                    .bind(i64::from(part_id))
                    .execute(&self.pool)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
                if result.rows_affected() == 0 {
                    exn::bail!(ErrorKind::WriteFailed);
                }
                tracing::debug!(file_id, part_id, "Replaced existing part");
            },
            Err(e) => return Err(e).or_raise(|| ErrorKind::Database),
        }
        self.cache.del(&key);
        Ok(())
    }

    /// Fetch part records of one file. Unknown part IDs are absent from the map.
    pub async fn get_file_part_info(&self, file_id: u64, part_ids: &[u32]) -> Result<HashMap<u32, PartRecord>> {
        let mut found = HashMap::with_capacity(part_ids.len());
        let mut missing = Vec::new();
        let epoch = self.cache.epoch();
        for &part_id in part_ids {
            match self.cache.get(&(file_id, part_id)) {
                Some(part) => {
                    found.insert(part_id, part);
                },
                None => missing.push(part_id),
            }
        }
        let db_file_id = to_db(file_id, "file id")?;
        for chunk in missing.chunks(BULK_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new(
                "SELECT file_id, file_part_id, blob_key, ctime, mtime FROM file_part_tab WHERE file_id = ",
            );
            query.push_bind(db_file_id).push(" AND file_part_id IN (");
            let mut separated = query.separated(", ");
            for &part_id in chunk {
                separated.push_bind(i64::from(part_id));
            }
            separated.push_unseparated(")");
            let rows: Vec<PartRow> =
                query.build_query_as().fetch_all(&self.pool).await.or_raise(|| ErrorKind::Database)?;
            for row in rows {
                let part = PartRecord::try_from(row)?;
                self.cache.fill((file_id, part.part_id), part.clone(), epoch);
                found.insert(part.part_id, part);
            }
        }
        Ok(found)
    }

    pub async fn get_part(&self, file_id: u64, part_id: u32) -> Result<Option<PartRecord>> {
        Ok(self.get_file_part_info(file_id, &[part_id]).await?.remove(&part_id))
    }

    /// Delete every part of the given files, returning how many rows were removed.
    #[instrument(skip(self, file_ids), fields(count = file_ids.len()))]
    pub async fn delete_file_part(&self, file_ids: &[u64]) -> Result<u64> {
        let mut removed = 0;
        for chunk in file_ids.chunks(BULK_CHUNK) {
            let mut ids = Vec::with_capacity(chunk.len());
            for &file_id in chunk {
                ids.push(to_db(file_id, "file id")?);
            }

            let mut select = QueryBuilder::<Sqlite>::new(
                "SELECT file_id, file_part_id, blob_key, ctime, mtime FROM file_part_tab WHERE file_id IN (",
            );
            let mut separated = select.separated(", ");
            for id in &ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            let doomed: Vec<PartRow> =
                select.build_query_as().fetch_all(&self.pool).await.or_raise(|| ErrorKind::Database)?;

            let mut delete = QueryBuilder::<Sqlite>::new("DELETE FROM file_part_tab WHERE file_id IN (");
            let mut separated = delete.separated(", ");
            for id in &ids {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");
            let result = delete.build().execute(&self.pool).await.or_raise(|| ErrorKind::Database)?;
            removed += result.rows_affected();

            for row in doomed {
                let part = PartRecord::try_from(row)?;
                self.cache.del(&(part.file_id, part.part_id));
            }
        }
        Ok(removed)
    }
}
