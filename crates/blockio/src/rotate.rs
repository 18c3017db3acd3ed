//! At-rest obfuscation backend.
//!
//! Wraps another backend and adds a constant to every byte (mod 256) on the
//! way in, subtracting it on the way out. The substitution is per byte, so a
//! download starting at any offset decodes without seeing the prefix.

use crate::error::Result;
use crate::{BackendHandle, BlobReader, BlockBackend};
use async_trait::async_trait;
use pin_project_lite::pin_project;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, ReadBuf};

pin_project! {
    /// Reader adapter adding `delta` (wrapping) to every byte read.
    pub struct RotateReader<R> {
        #[pin]
        inner: R,
        delta: u8,
    }
}

impl<R> RotateReader<R> {
    pub fn new(inner: R, delta: u8) -> Self {
        Self { inner, delta }
    }
}

impl<R: AsyncRead> AsyncRead for RotateReader<R> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.project();
        let before = buf.filled().len();
        ready!(this.inner.poll_read(cx, buf))?;
        let delta = *this.delta;
        for byte in &mut buf.filled_mut()[before..] {
            *byte = byte.wrapping_add(delta);
        }
        Poll::Ready(Ok(()))
    }
}

/// Rotating block backend.
///
/// Use [`RotateBackend::wrap`] rather than constructing it directly: a
/// rotation of zero (mod 256) returns the inner backend untouched.
#[derive(Clone)]
pub struct RotateBackend {
    inner: BackendHandle,
    rotation: u8,
}

impl RotateBackend {
    pub fn wrap(inner: BackendHandle, rotation: i64) -> BackendHandle {
        let rotation = u8::try_from(rotation.rem_euclid(256)).unwrap_or(0);
        if rotation == 0 {
            return inner;
        }
        Arc::new(Self { inner, rotation })
    }
}

#[async_trait]
impl BlockBackend for RotateBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn max_file_size(&self) -> u64 {
        self.inner.max_file_size()
    }

    async fn upload(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<String> {
        let mut rotated = RotateReader::new(reader, self.rotation);
        self.inner.upload(&mut rotated).await
    }

    async fn download(&self, blob_key: &str, offset: u64) -> Result<BlobReader> {
        let stored = self.inner.download(blob_key, offset).await?;
        Ok(Box::new(RotateReader::new(stored, self.rotation.wrapping_neg())))
    }
}
