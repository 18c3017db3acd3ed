//! CLI errors. Each wraps the failing layer's error as a child frame.

use derive_more::{Display, Error};
use filegate_manager::error::Error as ManagerError;
use std::io::Error as IoError;

/// A CLI error.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open the metadata database")]
    Database,
    #[display("could not construct the block backend")]
    Backend,
    #[display("could not set up the IO cache")]
    Cache,
    /// A file service operation failed; the manager error is the child frame
    #[display("{_0} failed")]
    Operation(#[error(not(source))] &'static str),
    /// Local file I/O
    #[display("I/O error: {_0}")]
    Io(IoError),
    #[display("interrupted")]
    Interrupted,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Raise a manager error under the name of the operation that produced it.
pub fn operation(name: &'static str) -> impl FnOnce(ManagerError) -> Error {
    move |err| err.raise(ErrorKind::Operation(name))
}
