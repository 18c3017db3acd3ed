//! L2: whole files persisted under a cache directory.
//!
//! Layout is `<dir>/<shard>/<file_id>.cache`, where `<shard>` is the two hex
//! character xxhash prefix of the file ID. Files are written as
//! `<file_id>.cache.<uuid>.temp` and renamed into place once complete, so
//! anything still ending in `.temp` at startup is an abandoned write.

use crate::FileStream;
use crate::error::{ErrorKind, Result};
use filegate_util::cache::{Cache, LruCache};
use filegate_util::fileid::shard_prefix;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use uuid::Uuid;

const CACHE_SUFFIX: &str = ".cache";
const TEMP_SUFFIX: &str = ".temp";
const COPY_BUFFER: usize = 64 * 1024;

pub(crate) struct DiskTier {
    dir: PathBuf,
    entries: LruCache<u64, PathBuf>,
    pub(crate) size_limit: u64,
}

impl DiskTier {
    /// Open the cache directory, re-registering finished cache files (oldest
    /// first) and deleting abandoned temp files.
    pub(crate) async fn open(dir: impl Into<PathBuf>, capacity: usize, size_limit: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(ErrorKind::Io)?;
        let entries = LruCache::new(capacity, None).with_evict(|file_id: &u64, path: PathBuf| {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::warn!(file_id, path = %path.display(), error = %e, "Failed to delete evicted cache file");
            }
        });
        let tier = Self { dir, entries, size_limit };
        let recovered = tier.recover().await?;
        tracing::info!(dir = %tier.dir.display(), recovered, kept = tier.entries.len(), "Opened disk cache");
        Ok(tier)
    }

    async fn recover(&self) -> Result<usize> {
        let mut found: Vec<(SystemTime, u64, PathBuf)> = Vec::new();
        let mut shards = fs::read_dir(&self.dir).await.map_err(ErrorKind::Io)?;
        while let Some(shard) = shards.next_entry().await.map_err(ErrorKind::Io)? {
            if !shard.file_type().await.map_err(ErrorKind::Io)?.is_dir() {
                continue;
            }
            let mut files = fs::read_dir(shard.path()).await.map_err(ErrorKind::Io)?;
            while let Some(file) = files.next_entry().await.map_err(ErrorKind::Io)? {
                let path = file.path();
                let Some(name) = file.file_name().to_str().map(str::to_owned) else {
                    continue;
                };
                if name.ends_with(TEMP_SUFFIX) {
                    tracing::debug!(path = %path.display(), "Removing unfinished cache file");
                    _ = fs::remove_file(&path).await;
                    continue;
                }
                let Some(file_id) = parse_cache_name(&name) else {
                    continue;
                };
                let modified = file
                    .metadata()
                    .await
                    .and_then(|meta| meta.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                found.push((modified, file_id, path));
            }
        }
        found.sort();
        let recovered = found.len();
        for (_, file_id, path) in found {
            self.entries.set(file_id, path);
        }
        Ok(recovered)
    }

    pub(crate) fn path_for(&self, file_id: u64) -> PathBuf {
        self.dir.join(shard_prefix(file_id)).join(format!("{file_id}{CACHE_SUFFIX}"))
    }

    /// Open a cached file. A registered entry whose file has vanished is
    /// forgotten and treated as a miss.
    pub(crate) async fn get(&self, file_id: u64) -> Result<Option<FileStream>> {
        let Some(path) = self.entries.get(&file_id) else {
            return Ok(None);
        };
        match File::open(&path).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(e) if e.kind() == IoErrorKind::NotFound => {
                self.entries.del(&file_id);
                Ok(None)
            },
            Err(e) => Err(ErrorKind::Io(e).into()),
        }
    }

    /// Persist `source` as the cache file for `file_id` and open it.
    pub(crate) async fn fill(&self, file_id: u64, size: u64, mut source: FileStream) -> Result<FileStream> {
        let path = self.path_for(file_id);
        if let Some(shard) = path.parent() {
            fs::create_dir_all(shard).await.map_err(ErrorKind::Io)?;
        }
        let temp = path.with_file_name(format!("{file_id}{CACHE_SUFFIX}.{}{TEMP_SUFFIX}", Uuid::new_v4().simple()));
        let written = match write_temp(&temp, &mut source).await {
            Ok(written) => written,
            Err(err) => {
                _ = fs::remove_file(&temp).await;
                return Err(err);
            },
        };
        if written != size {
            _ = fs::remove_file(&temp).await;
            exn::bail!(ErrorKind::SizeMismatch { expected: size, actual: written });
        }
        fs::rename(&temp, &path).await.map_err(ErrorKind::Io)?;
        let file = File::open(&path).await.map_err(ErrorKind::Io)?;
        self.entries.set(file_id, path);
        tracing::debug!(file_id, bytes = written, "Stored file in disk cache");
        Ok(Box::new(file))
    }
}

/// Copy `source` into a new file at `temp`, keeping read failures (the
/// source's) apart from write failures (ours).
async fn write_temp(temp: &Path, source: &mut FileStream) -> Result<u64> {
    let mut file = File::create(temp).await.map_err(ErrorKind::Io)?;
    let mut buffer = vec![0u8; COPY_BUFFER];
    let mut written = 0u64;
    loop {
        let n = source.read(&mut buffer).await.map_err(ErrorKind::Source)?;
        if n == 0 {
            break;
        }
        file.write_all(&buffer[..n]).await.map_err(ErrorKind::Io)?;
        written += n as u64;
    }
    file.sync_all().await.map_err(ErrorKind::Io)?;
    Ok(written)
}

/// `"<digits>.cache"` to its file ID.
fn parse_cache_name(name: &str) -> Option<u64> {
    let digits = name.strip_suffix(CACHE_SUFFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
