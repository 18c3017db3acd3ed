//! Errors raised by block backends and the backend registry.

use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

/// A block IO error.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for block IO operations.
pub type Result<T> = std::result::Result<T, Error>;

/// What went wrong talking to a backend, grouped by how a caller reacts.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Blob key is unknown to the backend
    #[display("blob not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Backend cannot serve a read starting at a non-zero offset
    #[display("ranged read unsupported at offset {_0}")]
    RangeUnsupported(#[error(not(source))] u64),
    /// Upload stream is larger than the backend's block size
    #[display("upload exceeds the {_0} byte block limit")]
    TooLarge(#[error(not(source))] u64),
    /// Underlying I/O error
    #[display("I/O error: {_0}")]
    Io(IoError),
    /// Network-related error (chat service, S3 connections, etc.)
    #[display("network error: {_0}")]
    Network(#[error(not(source))] String),
    /// Backend-specific error
    #[display("backend error: {_0}")]
    BackendError(#[error(not(source))] String),
    /// Backend parameters could not be understood
    #[display("invalid backend configuration: {_0}")]
    InvalidConfig(#[error(not(source))] String),
    /// No factory registered under this kind
    #[display("unknown backend kind: {_0}")]
    UnknownBackend(#[error(not(source))] String),
    /// Path is not usable as a blob root or blob key is malformed
    #[display("invalid path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
}
impl From<IoError> for ErrorKind {
    fn from(err: IoError) -> Self {
        Self::Io(err)
    }
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::Network(_) | Self::BackendError(_))
    }
}
