//! IO cache errors.

use derive_more::{Display, Error};
use std::io::Error as IoError;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Reading or writing a cache file failed
    #[display("cache I/O error: {_0}")]
    Io(IoError),
    /// The stream being cached failed; the error is passed through untouched
    /// so callers can recover whatever they attached to it.
    #[display("source stream error: {_0}")]
    Source(IoError),
    /// The source stream did not produce the advertised number of bytes
    #[display("source produced {actual} bytes, expected {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[display("invalid cache configuration: {_0}")]
    InvalidConfig(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Source(_))
    }
}
