use super::from_db;
use crate::error::{Error, ErrorKind};
use exn::ResultExt;

/// One uploaded chunk of a file and the blob that holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    pub file_id: u64,
    pub part_id: u32,
    pub blob_key: String,
    pub ctime: i64,
    pub mtime: i64,
}

#[derive(sqlx::FromRow)]
pub(crate) struct PartRow {
    file_id: i64,
    file_part_id: i64,
    blob_key: String,
    ctime: i64,
    mtime: i64,
}

impl TryFrom<PartRow> for PartRecord {
    type Error = Error;
    fn try_from(row: PartRow) -> Result<Self, Self::Error> {
        Ok(Self {
            file_id: from_db(row.file_id, "file id")?,
            part_id: u32::try_from(row.file_part_id).or_raise(|| ErrorKind::InvalidData("part id"))?,
            blob_key: row.blob_key,
            ctime: row.ctime,
            mtime: row.mtime,
        })
    }
}
