use super::{from_db, to_db};
use crate::error::{Error, ErrorKind};
use exn::{OptionExt, ResultExt};

/// `parent_entry_id` of entries living directly under `/`.
pub const ROOT_ENTRY_ID: u64 = 0;
/// Mode bits given to new entries (0755).
pub const DEFAULT_MODE: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
}

impl EntryKind {
    pub(crate) fn code(self) -> i64 {
        match self {
            Self::Dir => 1,
            Self::File => 2,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::Dir),
            2 => Some(Self::File),
            _ => None,
        }
    }
}

/// A node of the directory tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub entry_id: u64,
    pub parent_entry_id: u64,
    pub name: String,
    pub kind: EntryKind,
    /// For files, the decimal `file_id` of the linked content.
    pub ref_data: String,
    pub size: u64,
    pub mode: u32,
    pub ctime: i64,
    pub mtime: i64,
}

impl Entry {
    /// The implicit root directory; never stored as a row.
    pub fn root() -> Self {
        Self {
            entry_id: ROOT_ENTRY_ID,
            parent_entry_id: ROOT_ENTRY_ID,
            name: String::new(),
            kind: EntryKind::Dir,
            ref_data: String::new(),
            size: 0,
            mode: DEFAULT_MODE,
            ctime: 0,
            mtime: 0,
        }
    }

    pub fn is_root(&self) -> bool {
        self.entry_id == ROOT_ENTRY_ID
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Linked file ID, if this is a file entry with a well-formed payload.
    pub fn file_id(&self) -> Option<u64> {
        match self.kind {
            EntryKind::File => self.ref_data.parse().ok(),
            EntryKind::Dir => None,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub(crate) id: i64,
    pub(crate) entry_id: i64,
    pub(crate) parent_entry_id: i64,
    pub(crate) ref_data: String,
    pub(crate) file_kind: i64,
    pub(crate) ctime: i64,
    pub(crate) mtime: i64,
    pub(crate) file_size: i64,
    pub(crate) file_mode: i64,
    pub(crate) file_name: String,
}

impl TryFrom<&Entry> for EntryRow {
    type Error = Error;
    fn try_from(entry: &Entry) -> Result<Self, Self::Error> {
        Ok(Self {
            id: 0,
            entry_id: to_db(entry.entry_id, "entry id")?,
            parent_entry_id: to_db(entry.parent_entry_id, "parent entry id")?,
            ref_data: entry.ref_data.clone(),
            file_kind: entry.kind.code(),
            ctime: entry.ctime,
            mtime: entry.mtime,
            file_size: to_db(entry.size, "file size")?,
            file_mode: i64::from(entry.mode),
            file_name: entry.name.clone(),
        })
    }
}

impl TryFrom<EntryRow> for Entry {
    type Error = Error;
    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            entry_id: from_db(row.entry_id, "entry id")?,
            parent_entry_id: from_db(row.parent_entry_id, "parent entry id")?,
            name: row.file_name,
            kind: EntryKind::from_code(row.file_kind).ok_or_raise(|| ErrorKind::InvalidData("file kind"))?,
            ref_data: row.ref_data,
            size: from_db(row.file_size, "file size")?,
            mode: u32::try_from(row.file_mode).or_raise(|| ErrorKind::InvalidData("file mode"))?,
            ctime: row.ctime,
            mtime: row.mtime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_is_synthetic_dir() {
        let root = Entry::root();
        assert!(root.is_root());
        assert!(root.is_dir());
        assert_eq!(root.mode, 0o755);
        assert_eq!((root.ctime, root.mtime), (0, 0));
    }

    #[test]
    fn test_file_id_only_for_files() {
        let mut entry = Entry { kind: EntryKind::File, ref_data: "12345".to_string(), ..Entry::root() };
        assert_eq!(entry.file_id(), Some(12345));
        entry.ref_data = "garbage".to_string();
        assert_eq!(entry.file_id(), None);
        entry.kind = EntryKind::Dir;
        entry.ref_data = "12345".to_string();
        assert_eq!(entry.file_id(), None);
    }

    #[test]
    fn test_row_round_trip_preserves_fields() {
        let entry = Entry {
            entry_id: 99,
            parent_entry_id: 3,
            name: "notes.txt".to_string(),
            kind: EntryKind::File,
            ref_data: "42".to_string(),
            size: 1024,
            mode: 0o644,
            ctime: 10,
            mtime: 20,
        };
        let row = EntryRow::try_from(&entry).unwrap();
        assert_eq!(row.file_kind, 2);
        assert_eq!(Entry::try_from(row).unwrap(), entry);
    }
}
