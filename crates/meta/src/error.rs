//! Metadata store errors.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// Row could not be converted to or from its model.
    #[display("invalid metadata: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
    #[display("file not found: {_0}")]
    FileNotFound(#[error(not(source))] u64),
    #[display("not found: {_0}")]
    NotFound(#[error(not(source))] String),
    #[display("already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    #[display("not a directory: {_0}")]
    NotADirectory(#[error(not(source))] String),
    #[display("is a directory: {_0}")]
    IsADirectory(#[error(not(source))] String),
    #[display("invalid path: {_0}")]
    PathInvalid(#[error(not(source))] String),
    #[display("destination is inside source: {_0}")]
    PathLoop(#[error(not(source))] String),
    /// A write statement matched no rows and raised no error.
    #[display("write affected no rows")]
    WriteFailed,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }
}
