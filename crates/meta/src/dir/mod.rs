//! Hierarchical namespace over `entry_tab`.
//!
//! Every entry is a row keyed by `(parent_entry_id, file_name)`; the root is
//! implicit with ID [`ROOT_ENTRY_ID`]. Moving a directory only rewrites its own
//! row since children point at its unchanged `entry_id`.
//!
//! Multi-row operations (remove, rename, copy, mkdir -p) run inside a single
//! transaction and never consult the lookup cache. Every lookup key they touch
//! is invalidated once the transaction commits.

mod conflict;
mod path;
mod table;

pub use self::conflict::{Conflict, Op, Plan, plan, plan_nested};
pub use self::path::{DirPath, MAX_DEPTH};
use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::file_store::{BULK_CHUNK, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
use crate::models::{DEFAULT_MODE, Entry, EntryKind, ROOT_ENTRY_ID};
use async_stream::stream;
use exn::{OptionExt, ResultExt};
use filegate_util::cache::{Cache, LruCache};
use filegate_util::{IdGenerator, now_ms};
use futures::{Stream, TryStreamExt};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::pin::Pin;
use std::sync::Arc;
use tracing::instrument;

pub type LookupCache = Arc<dyn Cache<(u64, String), Entry>>;
pub type EntryStream<'a> = Pin<Box<dyn Stream<Item = Result<Entry>> + Send + 'a>>;

const REF_SCAN_BATCH: i64 = 1000;

/// Where a moved or copied entry will end up.
struct Target {
    parent_entry_id: u64,
    name: String,
    path: DirPath,
}

#[derive(Clone)]
pub struct Directory {
    pool: SqlitePool,
    ids: Arc<IdGenerator>,
    lookups: LookupCache,
}

impl From<&Database> for Directory {
    fn from(db: &Database) -> Self {
        Self::new(db, Arc::new(LruCache::new(DEFAULT_CACHE_CAPACITY, Some(DEFAULT_CACHE_TTL))))
    }
}

impl Directory {
    pub fn new(db: &Database, lookups: LookupCache) -> Self {
        Self { pool: db.pool().clone(), ids: Arc::clone(db.ids()), lookups }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn stat(&self, path: &str) -> Result<Entry> {
        self.resolve(&DirPath::parse(path)?).await
    }

    /// Children of a directory in insertion order, fetched lazily in pages.
    pub fn list_stream<'a>(&'a self, path: &'a str) -> EntryStream<'a> {
        Box::pin(stream! {
            let dir = match DirPath::parse(path) {
                Ok(parsed) => self.resolve(&parsed).await,
                Err(e) => Err(e),
            };
            let dir = match dir {
                Ok(dir) if dir.is_dir() => dir,
                Ok(_) => {
                    yield Err(exn::Exn::from(ErrorKind::NotADirectory(path.to_string())));
                    return;
                },
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            let mut after = 0;
            loop {
                let page = match self.children_page(dir.entry_id, after).await {
                    Ok(page) => page,
                    Err(e) => {
                        yield Err(e);
                        return;
                    },
                };
                let full = page.len() as i64 == table::PAGE_SIZE;
                for (id, entry) in page {
                    after = id;
                    yield Ok(entry);
                }
                if !full {
                    return;
                }
            }
        })
    }

    pub async fn list(&self, path: &str) -> Result<Vec<Entry>> {
        self.list_stream(path).try_collect().await
    }

    /// Depth-first walk below `prefix` in insertion order, handing each entry
    /// and its full path to `visit`. Returning `false` stops the walk. A file
    /// prefix visits only itself.
    pub async fn walk(&self, prefix: &str, mut visit: impl FnMut(&str, &Entry) -> bool) -> Result<()> {
        let prefix = DirPath::parse(prefix)?;
        let start = self.resolve(&prefix).await?;
        if !start.is_dir() {
            visit(&prefix.to_string(), &start);
            return Ok(());
        }
        let mut stack = self.children_of(&prefix, start.entry_id).await?;
        while let Some((path, entry)) = stack.pop() {
            if !visit(&path.to_string(), &entry) {
                return Ok(());
            }
            if entry.is_dir() {
                stack.extend(self.children_of(&path, entry.entry_id).await?);
            }
        }
        Ok(())
    }

    /// Children paired with their paths, last child first so a stack pops
    /// them in insertion order.
    async fn children_of(&self, dir_path: &DirPath, entry_id: u64) -> Result<Vec<(DirPath, Entry)>> {
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        let children = table::all_children(&mut conn, entry_id).await?;
        Ok(children.into_iter().rev().map(|child| (dir_path.join(&child.name), child)).collect())
    }

    /// Every `file_id` referenced by a FILE entry anywhere in the tree.
    #[instrument(skip(self))]
    pub async fn referenced_file_ids(&self) -> Result<HashSet<u64>> {
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        let mut referenced = HashSet::new();
        let mut after = 0;
        loop {
            let page = table::file_refs_page(&mut conn, after, REF_SCAN_BATCH).await?;
            let full = page.len() as i64 == REF_SCAN_BATCH;
            for (id, ref_data) in page {
                after = id;
                match ref_data.parse() {
                    Ok(file_id) => {
                        referenced.insert(file_id);
                    },
                    Err(_) => tracing::warn!(ref_data, "Skipping file entry with malformed reference"),
                }
            }
            if !full {
                break;
            }
        }
        tracing::debug!(count = referenced.len(), "Collected referenced files");
        Ok(referenced)
    }

    /// The subset of `file_ids` that some FILE entry currently references.
    pub async fn referenced_among(&self, file_ids: &[u64]) -> Result<HashSet<u64>> {
        let mut referenced = HashSet::new();
        for chunk in file_ids.chunks(BULK_CHUNK) {
            let mut query = QueryBuilder::<Sqlite>::new("SELECT DISTINCT ref_data FROM entry_tab WHERE file_kind = ");
            query.push_bind(EntryKind::File.code()).push(" AND ref_data IN (");
            let mut separated = query.separated(", ");
            for file_id in chunk {
                separated.push_bind(file_id.to_string());
            }
            separated.push_unseparated(")");
            let rows: Vec<(String,)> =
                query.build_query_as().fetch_all(&self.pool).await.or_raise(|| ErrorKind::Database)?;
            referenced.extend(rows.into_iter().filter_map(|(ref_data,)| ref_data.parse::<u64>().ok()));
        }
        Ok(referenced)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Create a directory, creating missing ancestors on the way.
    #[instrument(skip(self))]
    pub async fn mkdir(&self, path: &str) -> Result<Entry> {
        let path = DirPath::parse(path)?;
        let name = path.name().ok_or_raise(|| ErrorKind::AlreadyExists(path.to_string()))?;
        self.insert_leaf(&path, name, EntryKind::Dir, 0, String::new()).await
    }

    /// Create a file entry whose payload is `ref_data`, creating missing
    /// ancestor directories on the way.
    #[instrument(skip(self))]
    pub async fn create(&self, path: &str, size: u64, ref_data: &str) -> Result<Entry> {
        let path = DirPath::parse(path)?;
        let name = path.name().ok_or_raise(|| ErrorKind::IsADirectory(path.to_string()))?;
        self.insert_leaf(&path, name, EntryKind::File, size, ref_data.to_string()).await
    }

    /// Remove an entry and, for directories, everything below it. Removing `/`
    /// empties the tree. Returns how many entries were deleted.
    #[instrument(skip(self))]
    pub async fn remove(&self, path: &str) -> Result<u64> {
        let path = DirPath::parse(path)?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut touched = Vec::new();
        let removed = if path.is_root() {
            let mut removed = 0;
            for child in table::all_children(&mut tx, ROOT_ENTRY_ID).await? {
                removed += delete_subtree(&mut tx, child, &mut touched).await?;
            }
            removed
        } else {
            let entry = find_tx(&mut tx, &path).await?.ok_or_raise(|| ErrorKind::NotFound(path.to_string()))?;
            delete_subtree(&mut tx, entry, &mut touched).await?
        };
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        self.invalidate(touched);
        tracing::debug!(%path, removed, "Removed entries");
        Ok(removed)
    }

    /// Move `src` to `dst`, resolving an existing destination through the
    /// conflict table.
    #[instrument(skip(self))]
    pub async fn rename(&self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        let src = DirPath::parse(src)?;
        let dst = DirPath::parse(dst)?;
        if src.is_root() {
            exn::bail!(ErrorKind::PathInvalid(src.to_string()));
        }
        if src.is_ancestor_of(&dst) {
            exn::bail!(ErrorKind::PathLoop(dst.to_string()));
        }

        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let source = find_tx(&mut tx, &src).await?.ok_or_raise(|| ErrorKind::NotFound(src.to_string()))?;
        if src == dst {
            return Ok(());
        }
        let mut touched = vec![(source.parent_entry_id, source.name.clone())];
        let Some(target) = self.target(&mut tx, Op::Move, &source, &dst, overwrite, &mut touched).await? else {
            return Ok(());
        };
        check_depth(&mut tx, &source, &target.path).await?;

        table::delete(&mut tx, source.entry_id).await?;
        let moved = Entry {
            parent_entry_id: target.parent_entry_id,
            name: target.name,
            mtime: now_ms(),
            ..source
        };
        table::insert(&mut tx, &moved).await?;
        touched.push((moved.parent_entry_id, moved.name.clone()));
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        self.invalidate(touched);
        tracing::debug!(%src, dst = %target.path, "Moved entry");
        Ok(())
    }

    /// Copy `src` to `dst` recursively. Copied file entries share the source's
    /// `ref_data`; content is never duplicated.
    #[instrument(skip(self))]
    pub async fn copy(&self, src: &str, dst: &str, overwrite: bool) -> Result<()> {
        let src = DirPath::parse(src)?;
        let dst = DirPath::parse(dst)?;
        if src.is_root() {
            exn::bail!(ErrorKind::PathInvalid(src.to_string()));
        }
        if src.is_ancestor_of(&dst) {
            exn::bail!(ErrorKind::PathLoop(dst.to_string()));
        }

        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let source = find_tx(&mut tx, &src).await?.ok_or_raise(|| ErrorKind::NotFound(src.to_string()))?;
        if src == dst {
            if overwrite {
                return Ok(());
            }
            exn::bail!(ErrorKind::AlreadyExists(dst.to_string()));
        }
        let mut touched = Vec::new();
        let Some(target) = self.target(&mut tx, Op::Copy, &source, &dst, overwrite, &mut touched).await? else {
            return Ok(());
        };
        check_depth(&mut tx, &source, &target.path).await?;

        let now = now_ms();
        let mut new_ids = HashMap::new();
        let subtree = collect_subtree(&mut tx, source).await?;
        let copied = subtree.len();
        for (depth, entry) in subtree {
            let entry_id = self.ids.next_id();
            let (parent_entry_id, name) = if depth == 0 {
                (target.parent_entry_id, target.name.clone())
            } else {
                let parent = new_ids.get(&entry.parent_entry_id).ok_or_raise(|| ErrorKind::InvalidData("copy parent"))?;
                (*parent, entry.name.clone())
            };
            new_ids.insert(entry.entry_id, entry_id);
            let copy = Entry { entry_id, parent_entry_id, name, ctime: now, mtime: now, ..entry };
            table::insert(&mut tx, &copy).await?;
            touched.push((copy.parent_entry_id, copy.name));
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        self.invalidate(touched);
        tracing::debug!(%src, dst = %target.path, copied, "Copied entries");
        Ok(())
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn insert_leaf(
        &self,
        path: &DirPath,
        name: &str,
        kind: EntryKind,
        size: u64,
        ref_data: String,
    ) -> Result<Entry> {
        let parent_path = path.parent().unwrap_or_default();
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut touched = Vec::new();
        let parent = self.ensure_dir(&mut tx, &parent_path, &mut touched).await?;
        if table::get_child(&mut tx, parent.entry_id, name).await?.is_some() {
            exn::bail!(ErrorKind::AlreadyExists(path.to_string()));
        }
        let entry = self.new_entry(parent.entry_id, name, kind, size, ref_data);
        table::insert(&mut tx, &entry).await?;
        touched.push((entry.parent_entry_id, entry.name.clone()));
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        self.invalidate(touched);
        Ok(entry)
    }

    fn new_entry(&self, parent_entry_id: u64, name: &str, kind: EntryKind, size: u64, ref_data: String) -> Entry {
        let now = now_ms();
        Entry {
            entry_id: self.ids.next_id(),
            parent_entry_id,
            name: name.to_string(),
            kind,
            ref_data,
            size,
            mode: DEFAULT_MODE,
            ctime: now,
            mtime: now,
        }
    }

    /// Walk to `path` inside a transaction, creating missing directories.
    async fn ensure_dir(
        &self,
        conn: &mut SqliteConnection,
        path: &DirPath,
        touched: &mut Vec<(u64, String)>,
    ) -> Result<Entry> {
        let mut current = Entry::root();
        let mut walked = DirPath::root();
        for name in path.components() {
            walked = walked.join(name);
            current = match table::get_child(conn, current.entry_id, name).await? {
                Some(entry) if entry.is_dir() => entry,
                Some(_) => exn::bail!(ErrorKind::NotADirectory(walked.to_string())),
                None => {
                    let dir = self.new_entry(current.entry_id, name, EntryKind::Dir, 0, String::new());
                    table::insert(conn, &dir).await?;
                    touched.push((dir.parent_entry_id, dir.name.clone()));
                    dir
                },
            };
        }
        Ok(current)
    }

    /// Decide where `source` lands for a move or copy to `dst`, clearing
    /// whatever the plan replaces. `None` means the source is already there.
    async fn target(
        &self,
        conn: &mut SqliteConnection,
        op: Op,
        source: &Entry,
        dst: &DirPath,
        overwrite: bool,
        touched: &mut Vec<(u64, String)>,
    ) -> Result<Option<Target>> {
        let existing = find_tx(conn, dst).await?;
        match plan(op, source.kind, existing.as_ref().map(|e| e.kind), overwrite) {
            Plan::Fail(conflict) => Err(conflict.raise(dst)),
            Plan::Insert => {
                let parent = self.ensure_dir(conn, &dst.parent().unwrap_or_default(), touched).await?;
                let name = dst.name().ok_or_raise(|| ErrorKind::PathInvalid(dst.to_string()))?;
                Ok(Some(Target { parent_entry_id: parent.entry_id, name: name.to_string(), path: dst.clone() }))
            },
            Plan::Replace => {
                let existing = existing.ok_or_raise(|| ErrorKind::NotFound(dst.to_string()))?;
                let target = Target {
                    parent_entry_id: existing.parent_entry_id,
                    name: existing.name.clone(),
                    path: dst.clone(),
                };
                delete_subtree(conn, existing, touched).await?;
                Ok(Some(target))
            },
            Plan::Nest => {
                let dir = existing.ok_or_raise(|| ErrorKind::NotFound(dst.to_string()))?;
                let nested = dst.join(&source.name);
                let collision = table::get_child(conn, dir.entry_id, &source.name).await?;
                if collision.as_ref().is_some_and(|c| c.entry_id == source.entry_id) {
                    return Ok(None);
                }
                match plan_nested(source.kind, collision.as_ref().map(|c| c.kind), overwrite) {
                    Plan::Fail(conflict) => return Err(conflict.raise(&nested)),
                    Plan::Replace => {
                        if let Some(collision) = collision {
                            delete_subtree(conn, collision, touched).await?;
                        }
                    },
                    _ => {},
                }
                Ok(Some(Target { parent_entry_id: dir.entry_id, name: source.name.clone(), path: nested }))
            },
        }
    }

    /// Cached path resolution from the root.
    async fn resolve(&self, path: &DirPath) -> Result<Entry> {
        let epoch = self.lookups.epoch();
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        let mut current = Entry::root();
        for name in path.components() {
            if !current.is_dir() {
                exn::bail!(ErrorKind::NotADirectory(path.to_string()));
            }
            let key = (current.entry_id, name.clone());
            current = match self.lookups.get(&key) {
                Some(entry) => entry,
                None => {
                    let entry = table::get_child(&mut conn, current.entry_id, name)
                        .await?
                        .ok_or_raise(|| ErrorKind::NotFound(path.to_string()))?;
                    self.lookups.fill(key, entry.clone(), epoch);
                    entry
                },
            };
        }
        Ok(current)
    }

    async fn children_page(&self, parent_entry_id: u64, after: i64) -> Result<Vec<(i64, Entry)>> {
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        table::children_page(&mut conn, parent_entry_id, after).await
    }

    fn invalidate(&self, touched: Vec<(u64, String)>) {
        for key in touched {
            self.lookups.del(&key);
        }
    }
}

/// Uncached resolution. A missing entry anywhere along the path is `None`;
/// a file in the middle of the path is `NotADirectory`.
async fn find_tx(conn: &mut SqliteConnection, path: &DirPath) -> Result<Option<Entry>> {
    let mut current = Entry::root();
    for name in path.components() {
        if !current.is_dir() {
            exn::bail!(ErrorKind::NotADirectory(path.to_string()));
        }
        current = match table::get_child(conn, current.entry_id, name).await? {
            Some(entry) => entry,
            None => return Ok(None),
        };
    }
    Ok(Some(current))
}

/// `entry` and all its descendants, parents before children, each paired
/// with its depth below `entry`.
async fn collect_subtree(conn: &mut SqliteConnection, entry: Entry) -> Result<Vec<(usize, Entry)>> {
    let mut out = vec![(0, entry)];
    let mut next = 0;
    while next < out.len() {
        let (depth, current) = &out[next];
        if current.is_dir() {
            let depth = depth + 1;
            let children = table::all_children(conn, current.entry_id).await?;
            out.extend(children.into_iter().map(|child| (depth, child)));
        }
        next += 1;
    }
    Ok(out)
}

/// Delete a subtree children first. Returns how many rows went away.
async fn delete_subtree(conn: &mut SqliteConnection, entry: Entry, touched: &mut Vec<(u64, String)>) -> Result<u64> {
    let subtree = collect_subtree(conn, entry).await?;
    let count = subtree.len() as u64;
    for (_, doomed) in subtree.into_iter().rev() {
        table::delete(conn, doomed.entry_id).await?;
        touched.push((doomed.parent_entry_id, doomed.name));
    }
    Ok(count)
}

/// Reject a move or copy whose deepest descendant would land below
/// [`MAX_DEPTH`].
async fn check_depth(conn: &mut SqliteConnection, source: &Entry, target: &DirPath) -> Result<()> {
    let height = if source.is_dir() {
        collect_subtree(conn, source.clone()).await?.iter().map(|(depth, _)| *depth).max().unwrap_or(0)
    } else {
        0
    };
    if target.depth() + height > MAX_DEPTH {
        exn::bail!(ErrorKind::PathInvalid(target.to_string()));
    }
    Ok(())
}
