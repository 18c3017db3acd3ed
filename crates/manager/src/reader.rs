//! Seekable stream over a file's parts.

use crate::error::{ErrorKind, Result, blockio, iocache, meta};
use crate::layout::Layout;
use crate::FileManager;
use exn::OptionExt;
use filegate_blockio::{BackendHandle, BlobReader};
use filegate_iocache::FileStream;
use filegate_meta::PartStore;
use filegate_util::fileid::encode_file_id;
use futures::future::BoxFuture;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

/// Opens backend streams for the parts of one file.
#[derive(Clone)]
pub(crate) struct PartSource {
    file_id: u64,
    backend: BackendHandle,
    parts: PartStore,
}

impl PartSource {
    async fn open(self, part_id: u32, offset: u64) -> Result<BlobReader> {
        let file_id = self.file_id;
        let part = self
            .parts
            .get_part(file_id, part_id)
            .await
            .map_err(meta)?
            .ok_or_raise(|| ErrorKind::PartMissing { file_id, part_id })?;
        tracing::trace!(file_id, part_id, offset, blob_key = %part.blob_key, "Opening part");
        self.backend.download(&part.blob_key, offset).await.map_err(blockio)
    }
}

enum State {
    /// No backend stream; the next read opens the part under the cursor.
    Idle,
    Opening(BoxFuture<'static, Result<BlobReader>>),
    /// `remaining` bytes of the current part are left in `reader`.
    Streaming { remaining: u64, reader: BlobReader },
}

/// `AsyncRead + AsyncSeek` over a READY file.
///
/// At most one backend stream is open at a time. It is dropped as soon as a
/// part boundary is reached, and on any seek that moves the cursor.
pub struct FileReader {
    source: PartSource,
    layout: Layout,
    pos: u64,
    state: State,
}

impl FileReader {
    pub(crate) fn new(source: PartSource, layout: Layout) -> Self {
        Self { source, layout, pos: 0, state: State::Idle }
    }

    pub fn len(&self) -> u64 {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }
}

impl AsyncRead for FileReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.pos >= this.layout.size() || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
            match &mut this.state {
                State::Idle => {
                    let (part_id, offset) = this.layout.locate(this.pos);
                    let source = this.source.clone();
                    this.state = State::Opening(Box::pin(source.open(part_id, offset)));
                },
                State::Opening(opening) => {
                    let opened = ready!(opening.as_mut().poll(cx));
                    let (part_id, offset) = this.layout.locate(this.pos);
                    match opened {
                        Ok(reader) => {
                            let remaining = this.layout.part_len(part_id).saturating_sub(offset);
                            this.state = State::Streaming { remaining, reader };
                        },
                        Err(err) => {
                            this.state = State::Idle;
                            return Poll::Ready(Err(ErrorKind::into_io(err)));
                        },
                    }
                },
                State::Streaming { remaining, reader } => {
                    if *remaining == 0 {
                        this.state = State::Idle;
                        continue;
                    }
                    let want = usize::try_from(*remaining).unwrap_or(usize::MAX).min(buf.remaining());
                    let mut part_buf = ReadBuf::new(buf.initialize_unfilled_to(want));
                    ready!(Pin::new(reader).poll_read(cx, &mut part_buf))?;
                    let n = part_buf.filled().len();
                    if n == 0 {
                        let (part_id, _) = this.layout.locate(this.pos);
                        let file_id = this.source.file_id;
                        tracing::warn!(file_id, part_id, missing = *remaining, "Part ended early");
                        this.state = State::Idle;
                        let err = exn::Exn::from(ErrorKind::InvalidPart { file_id, part_id });
                        return Poll::Ready(Err(ErrorKind::into_io(err)));
                    }
                    buf.advance(n);
                    this.pos += n as u64;
                    *remaining -= n as u64;
                    if *remaining == 0 {
                        this.state = State::Idle;
                    }
                    return Poll::Ready(Ok(()));
                },
            }
        }
    }
}

impl AsyncSeek for FileReader {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        let target = match position {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => this.layout.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => this.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file"))?;
        if target != this.pos {
            this.pos = target;
            this.state = State::Idle;
        }
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.pos))
    }
}

impl FileManager {
    /// Open a READY file for reading through the IO cache.
    ///
    /// Drafts are reported as `NotFound`. The stream yields exactly
    /// `file_size` bytes; reaching a part that was never uploaded fails the
    /// read with `PartMissing` (see [`ErrorKind::from_io`]).
    #[tracing::instrument(skip(self))]
    pub async fn open(&self, file_id: u64) -> Result<FileStream> {
        let record = self
            .files
            .get(file_id)
            .await
            .map_err(meta)?
            .filter(|record| record.is_ready())
            .ok_or_raise(|| ErrorKind::NotFound(encode_file_id(file_id)))?;
        let layout = Layout::new(record.file_size, self.block_size())?;
        if layout.part_count() != record.part_count {
            // Written with a different block size than the backend now reports.
            exn::bail!(ErrorKind::InvalidPart { file_id, part_id: record.part_count });
        }
        let source = PartSource { file_id, backend: self.backend.clone(), parts: self.parts.clone() };
        self.io_cache
            .load(file_id, record.file_size, || async move {
                Ok(Box::new(FileReader::new(source, layout)) as FileStream)
            })
            .await
            .map_err(iocache)
    }
}
