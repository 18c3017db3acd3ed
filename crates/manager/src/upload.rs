//! Upload state machine: draft, parts, ready.

use crate::FileManager;
use crate::error::{ErrorKind, Result, blockio, meta};
use crate::layout::Layout;
use exn::OptionExt;
use filegate_meta::FileRecord;
use filegate_util::fileid::encode_file_id;
use serde_json::Value;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Counts the bytes a backend pulled through it.
struct CountingReader<'a> {
    inner: &'a mut (dyn AsyncRead + Send + Unpin),
    count: u64,
}

impl AsyncRead for CountingReader<'_> {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut *this.inner).poll_read(cx, buf))?;
        this.count += (buf.filled().len() - before) as u64;
        Poll::Ready(Ok(()))
    }
}

impl FileManager {
    /// Upload a whole file in one call and return its ID once it is READY.
    ///
    /// `reader` must yield exactly `size` bytes. On failure the draft stays in
    /// INIT for purge to reclaim.
    #[instrument(skip(self, reader, cancel))]
    pub async fn create(
        &self,
        size: u64,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let layout = Layout::new(size, self.block_size())?;
        let file_id = self.files.create_draft(size, layout.part_count()).await.map_err(meta)?;
        for part_id in 0..layout.part_count() {
            let mut chunk = (&mut *reader).take(layout.part_len(part_id));
            self.upload_part(file_id, part_id, layout, &mut chunk, cancel).await?;
        }
        self.finish_create(file_id, None).await?;
        tracing::info!(file_id, size, parts = layout.part_count(), "Created file");
        Ok(file_id)
    }

    /// Start a multipart upload. Parts are then sent with
    /// [`create_part`](Self::create_part) and sealed by
    /// [`finish_create`](Self::finish_create).
    #[instrument(skip(self))]
    pub async fn create_draft(&self, size: u64) -> Result<u64> {
        let layout = Layout::new(size, self.block_size())?;
        self.files.create_draft(size, layout.part_count()).await.map_err(meta)
    }

    /// Upload one part of a draft. Parts may arrive in any order and may be
    /// re-sent; the last upload of a part wins. Once the file is READY its
    /// parts are fixed and further uploads fail with `AlreadyExists`.
    #[instrument(skip(self, reader, cancel))]
    pub async fn create_part(
        &self,
        file_id: u64,
        part_id: u32,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<()> {
        let record = self.draft(file_id).await?;
        if part_id >= record.part_count {
            exn::bail!(ErrorKind::InvalidPart { file_id, part_id });
        }
        let layout = Layout::new(record.file_size, self.block_size())?;
        self.upload_part(file_id, part_id, layout, reader, cancel).await
    }

    async fn draft(&self, file_id: u64) -> Result<FileRecord> {
        let record = self
            .files
            .get(file_id)
            .await
            .map_err(meta)?
            .ok_or_raise(|| ErrorKind::NotFound(encode_file_id(file_id)))?;
        if record.is_ready() {
            exn::bail!(ErrorKind::AlreadyExists(encode_file_id(file_id)));
        }
        Ok(record)
    }

    /// Mark a draft READY. Completeness is not checked; a missing part only
    /// surfaces when a read reaches it.
    #[instrument(skip(self, extinfo))]
    pub async fn finish_create(&self, file_id: u64, extinfo: Option<Value>) -> Result<()> {
        let extinfo = extinfo.unwrap_or_else(|| Value::Object(Default::default()));
        self.files.mark_ready(file_id, &extinfo).await.map_err(meta)
    }

    async fn upload_part(
        &self,
        file_id: u64,
        part_id: u32,
        layout: Layout,
        reader: &mut (dyn AsyncRead + Send + Unpin),
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let expected = layout.part_len(part_id);
        let mut counting = CountingReader { inner: reader, count: 0 };
        let uploaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = self.backend.upload(&mut counting) => Some(result),
        };
        let blob_key = uploaded.ok_or_raise(|| ErrorKind::Cancelled)?.map_err(blockio)?;
        if counting.count != expected {
            tracing::warn!(file_id, part_id, expected, actual = counting.count, %blob_key, "Part has the wrong length");
            exn::bail!(ErrorKind::InvalidPart { file_id, part_id });
        }
        // The upload may have outlasted a concurrent finish_create.
        self.draft(file_id).await?;
        self.parts.create_part(file_id, part_id, &blob_key).await.map_err(meta)?;
        tracing::debug!(file_id, part_id, %blob_key, bytes = expected, "Stored part");
        Ok(())
    }
}
