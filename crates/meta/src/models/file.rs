use super::from_db;
use crate::error::{Error, ErrorKind};
use exn::{OptionExt, ResultExt};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    /// Draft: parts may still be arriving.
    Init,
    Ready,
}

impl FileState {
    pub(crate) fn code(self) -> i64 {
        match self {
            Self::Init => 0,
            Self::Ready => 1,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Init),
            1 => Some(Self::Ready),
            _ => None,
        }
    }
}

/// A logical file: its size, how many parts it was split into, and whether
/// uploading has finished.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    pub file_id: u64,
    pub file_size: u64,
    pub part_count: u32,
    pub state: FileState,
    pub ctime: i64,
    pub mtime: i64,
    pub extinfo: Value,
}

impl FileRecord {
    pub fn is_ready(&self) -> bool {
        self.state == FileState::Ready
    }
}

#[derive(sqlx::FromRow)]
pub(crate) struct FileRow {
    pub(crate) id: i64,
    file_id: i64,
    file_size: i64,
    file_part_count: i64,
    file_state: i64,
    ctime: i64,
    mtime: i64,
    extinfo: String,
}

impl TryFrom<FileRow> for FileRecord {
    type Error = Error;
    fn try_from(row: FileRow) -> Result<Self, Self::Error> {
        Ok(Self {
            file_id: from_db(row.file_id, "file id")?,
            file_size: from_db(row.file_size, "file size")?,
            part_count: u32::try_from(row.file_part_count).or_raise(|| ErrorKind::InvalidData("part count"))?,
            state: FileState::from_code(row.file_state).ok_or_raise(|| ErrorKind::InvalidData("file state"))?,
            ctime: row.ctime,
            mtime: row.mtime,
            extinfo: serde_json::from_str(&row.extinfo).or_raise(|| ErrorKind::InvalidData("extinfo"))?,
        })
    }
}
