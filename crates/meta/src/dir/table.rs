//! Row-level access to `entry_tab`, usable inside or outside a transaction.

use crate::error::{ErrorKind, Result};
use crate::models::{Entry, EntryKind, EntryRow, to_db};
use exn::ResultExt;
use sqlx::SqliteConnection;

pub(crate) const PAGE_SIZE: i64 = 128;

pub(crate) async fn get_child(conn: &mut SqliteConnection, parent_entry_id: u64, name: &str) -> Result<Option<Entry>> {
    let row: Option<EntryRow> = sqlx::query_as(include_str!("../../queries/select_child.sql"))
        .bind(to_db(parent_entry_id, "parent entry id")?)
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    row.map(Entry::try_from).transpose()
}

/// Insert a row. A name already taken under the same parent is `AlreadyExists`.
pub(crate) async fn insert(conn: &mut SqliteConnection, entry: &Entry) -> Result<()> {
    let row = EntryRow::try_from(entry)?;
    let result = sqlx::query(include_str!("../../queries/insert_entry.sql"))
        .bind(row.entry_id)
        .bind(row.parent_entry_id)
        .bind(&row.ref_data)
        .bind(row.file_kind)
        .bind(row.ctime)
        .bind(row.mtime)
        .bind(row.file_size)
        .bind(row.file_mode)
        .bind(&row.file_name)
        .execute(&mut *conn)
        .await;
    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            exn::bail!(ErrorKind::AlreadyExists(entry.name.clone()))
        },
        Err(e) => Err(e).or_raise(|| ErrorKind::Database),
    }
}

pub(crate) async fn delete(conn: &mut SqliteConnection, entry_id: u64) -> Result<()> {
    sqlx::query(include_str!("../../queries/delete_entry.sql"))
        .bind(to_db(entry_id, "entry id")?)
        .execute(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(())
}

/// One page of children ordered by row id. Returns the entries with the row
/// id to continue after.
pub(crate) async fn children_page(
    conn: &mut SqliteConnection,
    parent_entry_id: u64,
    after: i64,
) -> Result<Vec<(i64, Entry)>> {
    let rows: Vec<EntryRow> = sqlx::query_as(include_str!("../../queries/list_children.sql"))
        .bind(to_db(parent_entry_id, "parent entry id")?)
        .bind(after)
        .bind(PAGE_SIZE)
        .fetch_all(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    rows.into_iter().map(|row| Ok((row.id, Entry::try_from(row)?))).collect()
}

/// Every child of a directory, in insertion order.
pub(crate) async fn all_children(conn: &mut SqliteConnection, parent_entry_id: u64) -> Result<Vec<Entry>> {
    let mut children = Vec::new();
    let mut after = 0;
    loop {
        let page = children_page(conn, parent_entry_id, after).await?;
        let full = page.len() as i64 == PAGE_SIZE;
        for (id, entry) in page {
            after = id;
            children.push(entry);
        }
        if !full {
            return Ok(children);
        }
    }
}

/// One page of `ref_data` payloads of FILE entries.
pub(crate) async fn file_refs_page(conn: &mut SqliteConnection, after: i64, limit: i64) -> Result<Vec<(i64, String)>> {
    sqlx::query_as(include_str!("../../queries/scan_file_refs.sql"))
        .bind(EntryKind::File.code())
        .bind(after)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)
}
