mod entry;
mod file;
mod part;

pub use self::entry::{DEFAULT_MODE, Entry, EntryKind, ROOT_ENTRY_ID};
pub(crate) use self::entry::EntryRow;
pub use self::file::{FileRecord, FileState};
pub(crate) use self::file::FileRow;
pub use self::part::PartRecord;
pub(crate) use self::part::PartRow;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;

/// SQLite integers are signed; IDs and sizes are stored as `i64`.
pub(crate) fn to_db(value: u64, what: &'static str) -> Result<i64> {
    i64::try_from(value).or_raise(|| ErrorKind::InvalidData(what))
}

pub(crate) fn from_db(value: i64, what: &'static str) -> Result<u64> {
    u64::try_from(value).or_raise(|| ErrorKind::InvalidData(what))
}
