//! File manager errors.
//!
//! Errors from the metadata, block IO and IO cache layers are raised into
//! the kinds below, keeping the original error as a child frame. Streams
//! returned by the manager report failures as `std::io::Error` whose payload
//! is an [`ErrorKind`]; use [`ErrorKind::from_io`] to get it back.

use derive_more::{Display, Error};
use filegate_blockio::error::{Error as BlockError, ErrorKind as BlockErrorKind};
use filegate_iocache::error::{Error as CacheError, ErrorKind as CacheErrorKind};
use filegate_meta::error::{Error as MetaError, ErrorKind as MetaErrorKind};
use filegate_util::fileid::encode_file_id;
use std::io;

/// A file manager error.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for file manager operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Outcome categories surfaced to file service callers.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Entry or file does not exist
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    #[display("not a directory: {_0}")]
    NotADirectory(#[error(not(source))] String),
    #[display("is a directory: {_0}")]
    IsADirectory(#[error(not(source))] String),
    /// Path contains `..`, is too deep or is otherwise malformed
    #[display("invalid path: {_0}")]
    PathInvalid(#[error(not(source))] String),
    /// Move or copy target lies inside the source
    #[display("destination is inside source: {_0}")]
    PathLoop(#[error(not(source))] String),
    /// A read reached a part that was never uploaded
    #[display("part {part_id} of file {file_id} is missing")]
    PartMissing { file_id: u64, part_id: u32 },
    /// Backend cannot serve a read starting at a non-zero offset
    #[display("backend cannot read from offset {_0}")]
    RangeUnsupported(#[error(not(source))] u64),
    /// Upstream backend error; retrying may help
    #[display("block backend failure")]
    BackendFailure,
    /// A database write matched no rows
    #[display("write affected no rows")]
    WriteFailed,
    #[display("operation cancelled")]
    Cancelled,
    /// Part index out of range, or part data of the wrong length
    #[display("invalid part {part_id} for file {file_id}")]
    InvalidPart { file_id: u64, part_id: u32 },
    /// Stream is larger than the backend block size allows
    #[display("data exceeds the {_0} byte limit")]
    TooLarge(#[error(not(source))] u64),
    #[display("metadata database error")]
    Database,
    #[display("IO cache error")]
    Cache,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendFailure | Self::Database | Self::Cache)
    }

    /// Recover the kind carried by an `io::Error` produced by a manager stream.
    pub fn from_io(err: &io::Error) -> Option<&ErrorKind> {
        err.get_ref()?.downcast_ref::<ErrorKind>()
    }

    /// Wrap a manager error for transport through `AsyncRead`/`AsyncSeek`.
    pub(crate) fn into_io(err: Error) -> io::Error {
        let kind = (*err).clone();
        tracing::debug!(error = ?err, "Manager error crossing an IO boundary");
        let io_kind = match kind {
            Self::NotFound(_) | Self::PartMissing { .. } => io::ErrorKind::NotFound,
            Self::Cancelled => io::ErrorKind::Interrupted,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(io_kind, kind)
    }
}

impl From<&MetaErrorKind> for ErrorKind {
    fn from(kind: &MetaErrorKind) -> Self {
        match kind {
            MetaErrorKind::FileNotFound(file_id) => Self::NotFound(encode_file_id(*file_id)),
            MetaErrorKind::NotFound(path) => Self::NotFound(path.clone()),
            MetaErrorKind::AlreadyExists(path) => Self::AlreadyExists(path.clone()),
            MetaErrorKind::NotADirectory(path) => Self::NotADirectory(path.clone()),
            MetaErrorKind::IsADirectory(path) => Self::IsADirectory(path.clone()),
            MetaErrorKind::PathInvalid(path) => Self::PathInvalid(path.clone()),
            MetaErrorKind::PathLoop(path) => Self::PathLoop(path.clone()),
            MetaErrorKind::WriteFailed => Self::WriteFailed,
            MetaErrorKind::Database | MetaErrorKind::Migration | MetaErrorKind::InvalidData(_) => Self::Database,
        }
    }
}

impl From<&BlockErrorKind> for ErrorKind {
    fn from(kind: &BlockErrorKind) -> Self {
        match kind {
            BlockErrorKind::NotFound(blob_key) => Self::NotFound(format!("blob {blob_key}")),
            BlockErrorKind::RangeUnsupported(offset) => Self::RangeUnsupported(*offset),
            BlockErrorKind::TooLarge(limit) => Self::TooLarge(*limit),
            _ => Self::BackendFailure,
        }
    }
}

impl From<&CacheErrorKind> for ErrorKind {
    fn from(kind: &CacheErrorKind) -> Self {
        match kind {
            CacheErrorKind::Source(err) => Self::from_io(err).cloned().unwrap_or(Self::BackendFailure),
            _ => Self::Cache,
        }
    }
}

/// Raise a metadata error into the manager taxonomy.
pub(crate) fn meta(err: MetaError) -> Error {
    let kind = ErrorKind::from(&*err);
    err.raise(kind)
}

/// Raise a block backend error into the manager taxonomy.
pub(crate) fn blockio(err: BlockError) -> Error {
    let kind = ErrorKind::from(&*err);
    err.raise(kind)
}

/// Raise an IO cache error, recovering manager kinds that travelled through
/// the cached stream.
pub(crate) fn iocache(err: CacheError) -> Error {
    let kind = ErrorKind::from(&*err);
    err.raise(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ErrorKind::PartMissing { file_id: 1, part_id: 2 }, io::ErrorKind::NotFound)]
    #[case(ErrorKind::Cancelled, io::ErrorKind::Interrupted)]
    #[case(ErrorKind::RangeUnsupported(10), io::ErrorKind::Other)]
    fn test_io_round_trip(#[case] kind: ErrorKind, #[case] io_kind: io::ErrorKind) {
        let err = ErrorKind::into_io(Error::from(kind.clone()));
        assert_eq!(err.kind(), io_kind);
        assert_eq!(ErrorKind::from_io(&err), Some(&kind));
    }

    #[test]
    fn test_foreign_io_error_has_no_kind() {
        assert_eq!(ErrorKind::from_io(&io::Error::other("boom")), None);
    }

    #[rstest]
    #[case(MetaErrorKind::FileNotFound(255), ErrorKind::NotFound("00000000000000ff".to_string()))]
    #[case(MetaErrorKind::PathLoop("/a".to_string()), ErrorKind::PathLoop("/a".to_string()))]
    #[case(MetaErrorKind::Migration, ErrorKind::Database)]
    fn test_meta_translation(#[case] from: MetaErrorKind, #[case] expected: ErrorKind) {
        assert_eq!(ErrorKind::from(&from), expected);
    }

    #[test]
    fn test_cache_source_recovers_manager_kind() {
        let io = ErrorKind::into_io(Error::from(ErrorKind::PartMissing { file_id: 3, part_id: 0 }));
        let translated = ErrorKind::from(&CacheErrorKind::Source(io));
        assert_eq!(translated, ErrorKind::PartMissing { file_id: 3, part_id: 0 });
        let other = ErrorKind::from(&CacheErrorKind::SizeMismatch { expected: 1, actual: 0 });
        assert_eq!(other, ErrorKind::Cache);
    }
}
