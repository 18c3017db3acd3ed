//! The SQLite database shared by the file, part and directory stores.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use filegate_util::IdGenerator;
use sqlx::SqliteConnection;
use sqlx::pool::PoolConnectionMetadata;
use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

static SCHEMA: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
const POOL_SIZE: u32 = 5;
/// Parallel part uploads of one file all write `file_part_tab` through the
/// single WAL writer.
const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);
const PER_CONNECTION_PRAGMAS: &str = r#"
    PRAGMA wal_autocheckpoint = 800;
    PRAGMA cache_size = -8192;
    PRAGMA temp_store = MEMORY;
"#;

/// Pool plus the ID generator every store mints file and entry IDs from.
///
/// Cheap to clone; clones share both.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    ids: Arc<IdGenerator>,
}

impl Database {
    /// Open (creating if needed) the database file and bring its schema up
    /// to date.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let options = Self::options().filename(path.as_ref()).create_if_missing(true);
        Self::open(options, POOL_SIZE).await
    }

    /// A private in-memory database.
    ///
    /// Limited to one connection: every `:memory:` connection would otherwise
    /// see its own empty database. Available outside `cfg(test)` so dependent
    /// crates can test against it.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::open(Self::options().filename(":memory:"), 1).await
    }

    fn options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .auto_vacuum(SqliteAutoVacuum::None)
    }

    async fn open(options: SqliteConnectOptions, pool_size: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            // Runs for every pooled connection, not only the first.
            .after_connect(|conn, meta| Box::pin(async move { Self::tune(conn, meta).await }))
            .max_connections(pool_size)
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool, ids: Arc::new(IdGenerator::new()) };
        db.migrate().await?;
        Ok(db)
    }

    async fn tune(conn: &mut SqliteConnection, _meta: PoolConnectionMetadata) -> sqlx::Result<()> {
        sqlx::query(PER_CONNECTION_PRAGMAS).execute(conn).await?;
        Ok(())
    }

    #[instrument("migrating metadata schema", skip(self))]
    async fn migrate(&self) -> Result<()> {
        SCHEMA.run(&self.pool).await.or_raise(|| ErrorKind::Migration)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn ids(&self) -> &Arc<IdGenerator> {
        &self.ids
    }

    /// Refresh planner statistics and close every pooled connection. The
    /// database must not be used afterwards.
    pub async fn close(&self) {
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn scalar(db: &Database, sql: &str) -> i64 {
        let row: (i64,) = sqlx::query_as(sql).fetch_one(db.pool()).await.unwrap();
        row.0
    }

    #[tokio::test]
    async fn test_in_memory_schema() {
        let db = Database::connect_in_memory().await.unwrap();
        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE '%_tab' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(names, ["entry_tab", "file_part_tab", "file_tab"]);

        // Already applied; running again is a no-op.
        db.migrate().await.unwrap();
        db.close().await;
        assert!(db.pool().is_closed());
    }

    #[tokio::test]
    async fn test_connection_settings() {
        let db = Database::connect_in_memory().await.unwrap();
        assert_eq!(scalar(&db, "PRAGMA foreign_keys").await, 1);
        assert_eq!(scalar(&db, "PRAGMA wal_autocheckpoint").await, 800);
        assert_eq!(scalar(&db, "PRAGMA cache_size").await, -8192);
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("meta.db");
        let db = Database::connect(&path).await.unwrap();
        sqlx::query("INSERT INTO file_tab (file_id, file_size, file_part_count, ctime, mtime) VALUES (1, 2, 1, 0, 0)")
            .execute(db.pool())
            .await
            .unwrap();
        db.close().await;

        let db = Database::connect(&path).await.unwrap();
        assert_eq!(scalar(&db, "SELECT COUNT(*) FROM file_tab").await, 1);
        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode").fetch_one(db.pool()).await.unwrap();
        assert_eq!(mode.0, "wal");
    }
}
