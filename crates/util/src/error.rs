//! Utility Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Encoded file ID is not 16 hexadecimal characters
    #[display("invalid file id: {_0}")]
    InvalidFileId(#[error(not(source))] String),
    /// Public link does not follow the `/<prefix>/<shard>/<id>` layout
    #[display("invalid public link: {_0}")]
    InvalidLink(#[error(not(source))] String),
}
