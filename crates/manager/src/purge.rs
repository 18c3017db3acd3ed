//! Reclaiming files that no directory entry references.

use crate::FileManager;
use crate::error::{ErrorKind, Result, meta};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

const PURGE_BATCH: usize = 500;

impl FileManager {
    /// Delete every file record (and its parts) that no FILE entry links to.
    /// With `before_ms`, only files last modified before that instant are
    /// considered. Backend blobs are left in place.
    ///
    /// Candidates are re-checked batch by batch right before deletion, so a
    /// link created while the purge runs keeps its file.
    #[instrument(skip(self, cancel))]
    pub async fn purge(&self, before_ms: Option<i64>, cancel: &CancellationToken) -> Result<u64> {
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        let referenced = self.dir.referenced_file_ids().await.map_err(meta)?;
        let mut candidates = Vec::new();
        self.files
            .scan_file(PURGE_BATCH, |record| {
                let old_enough = before_ms.is_none_or(|before| record.mtime < before);
                if old_enough && !referenced.contains(&record.file_id) {
                    candidates.push(record.file_id);
                }
                !cancel.is_cancelled()
            })
            .await
            .map_err(meta)?;
        if cancel.is_cancelled() {
            exn::bail!(ErrorKind::Cancelled);
        }
        tracing::debug!(candidates = candidates.len(), referenced = referenced.len(), "Scanned files");

        let mut removed = 0;
        for batch in candidates.chunks(PURGE_BATCH) {
            if cancel.is_cancelled() {
                exn::bail!(ErrorKind::Cancelled);
            }
            let relinked = self.dir.referenced_among(batch).await.map_err(meta)?;
            let doomed: Vec<u64> = batch.iter().copied().filter(|id| !relinked.contains(id)).collect();
            if doomed.is_empty() {
                continue;
            }
            self.parts.delete_file_part(&doomed).await.map_err(meta)?;
            removed += self.files.delete_file(&doomed).await.map_err(meta)?;
        }
        tracing::info!(removed, "Purged unreferenced files");
        Ok(removed)
    }
}
