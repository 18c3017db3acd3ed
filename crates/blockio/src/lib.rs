//! Block IO layer.
//!
//! A block backend stores opaque, size-limited blobs: [`upload`] consumes a
//! byte stream and hands back a `blob_key`, [`download`] streams a blob back
//! starting at an offset. Everything above this crate (the file manager)
//! splits logical files into blocks of at most
//! [`max_file_size`](BlockBackend::max_file_size) bytes.
//!
//! Backends are constructed by kind through the [`Registry`], which also
//! layers the [`RotateBackend`] obfuscation wrapper on request.
//!
//! [`upload`]: BlockBackend::upload
//! [`download`]: BlockBackend::download

pub mod backend;
pub mod error;
mod registry;
mod rotate;

pub use crate::backend::BlockBackend;
pub use crate::registry::Registry;
pub use crate::rotate::{RotateBackend, RotateReader};
use std::sync::Arc;
use tokio::io::AsyncRead;

pub type BackendHandle = Arc<dyn BlockBackend + Send + Sync>;
/// Byte stream returned by [`BlockBackend::download`].
pub type BlobReader = Box<dyn AsyncRead + Send + Unpin>;
