//! Operator commands, each a thin sequence of [`FileService`] calls.

use crate::cli::Command;
use crate::error::{Error, ErrorKind, Result, operation};
use exn::OptionExt;
use filegate_manager::{FileService, Layout};
use filegate_meta::{Entry, EntryKind};
use filegate_util::fileid::encode_file_id;
use filegate_util::now_ms;
use futures::stream::{self, StreamExt};
use std::io::{SeekFrom, Write};
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Execute one command. Interrupting `cancel` stops it at the next await.
pub async fn run(
    service: &dyn FileService,
    command: Command,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    cancel
        .run_until_cancelled(dispatch(service, command, cancel, out))
        .await
        .ok_or_raise(|| ErrorKind::Interrupted)?
}

async fn dispatch(
    service: &dyn FileService,
    command: Command,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Command::Put { local, remote, workers } => put(service, &local, &remote, workers, cancel, out).await,
        Command::Get { remote, local } => get(service, &remote, &local, out).await,
        Command::Ls { path } => {
            let entries = service.list_file_link(&path).await.map_err(operation("ls"))?;
            for entry in &entries {
                writeln!(out, "{}", format_entry(entry)).map_err(ErrorKind::Io)?;
            }
            Ok(())
        },
        Command::Stat { path } => stat(service, &path, out).await,
        Command::Mkdir { path } => {
            service.create_file_link(&path, 0, 0, true).await.map_err(operation("mkdir"))?;
            Ok(())
        },
        Command::Rm { path } => {
            let removed = service.remove_file_link(&path).await.map_err(operation("rm"))?;
            writeln!(out, "removed {removed} entries").map_err(ErrorKind::Io)?;
            Ok(())
        },
        Command::Mv { src, dst, overwrite } => {
            service.rename_file_link(&src, &dst, overwrite).await.map_err(operation("mv"))
        },
        Command::Cp { src, dst, overwrite } => {
            service.copy_file_link(&src, &dst, overwrite).await.map_err(operation("cp"))
        },
        Command::Link { path } => {
            let link = service.public_link(&path).await.map_err(operation("link"))?;
            writeln!(out, "{link}").map_err(ErrorKind::Io)?;
            Ok(())
        },
        Command::Purge { older_than_secs } => purge(service, older_than_secs, cancel, out).await,
    }
}

/// Multipart upload of `local`, at most `workers` parts in flight, then link
/// the sealed file at `remote`.
#[tracing::instrument(skip(service, cancel, out))]
async fn put(
    service: &dyn FileService,
    local: &Path,
    remote: &str,
    workers: usize,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    let size = tokio::fs::metadata(local).await.map_err(ErrorKind::Io)?.len();
    let layout = Layout::new(size, service.block_size()).map_err(operation("put"))?;
    let file_id = service.create_draft(size).await.map_err(operation("put"))?;
    tracing::info!(file_id, size, parts = layout.part_count(), "Uploading");

    let upload_part = move |part_id: u32| async move {
        let mut file = File::open(local).await.map_err(ErrorKind::Io)?;
        file.seek(SeekFrom::Start(u64::from(part_id) * layout.block_size())).await.map_err(ErrorKind::Io)?;
        let mut chunk = file.take(layout.part_len(part_id));
        service.create_part(file_id, part_id, &mut chunk, cancel).await.map_err(operation("put"))?;
        tracing::debug!(file_id, part_id, "Uploaded part");
        Ok::<_, Error>(())
    };
    let mut uploads = stream::iter(0..layout.part_count()).map(upload_part).buffer_unordered(workers.max(1));
    while let Some(result) = uploads.next().await {
        result?;
    }

    service.finish_create(file_id, None).await.map_err(operation("put"))?;
    service.create_file_link(remote, file_id, size, false).await.map_err(operation("put"))?;
    writeln!(out, "{}", encode_file_id(file_id)).map_err(ErrorKind::Io)?;
    Ok(())
}

#[tracing::instrument(skip(service, out))]
async fn get(service: &dyn FileService, remote: &str, local: &Path, out: &mut impl Write) -> Result<()> {
    let (entry, mut stream) = service.open_path(remote).await.map_err(operation("get"))?;
    let mut file = File::create(local).await.map_err(ErrorKind::Io)?;
    let copied = tokio::io::copy(&mut stream, &mut file).await.map_err(ErrorKind::Io)?;
    file.flush().await.map_err(ErrorKind::Io)?;
    tracing::info!(copied, size = entry.size, "Downloaded");
    writeln!(out, "{copied} bytes").map_err(ErrorKind::Io)?;
    Ok(())
}

async fn stat(service: &dyn FileService, path: &str, out: &mut impl Write) -> Result<()> {
    let entry = service.stat_file_link(path).await.map_err(operation("stat"))?;
    let mut lines = vec![
        format!("path:  {path}"),
        format!("kind:  {}", kind_name(entry.kind)),
        format!("size:  {}", entry.size),
        format!("mode:  {:o}", entry.mode),
        format!("ctime: {}", format_ms(entry.ctime)),
        format!("mtime: {}", format_ms(entry.mtime)),
    ];
    if let Some(file_id) = entry.file_id() {
        let record = service.file_info(file_id).await.map_err(operation("stat"))?;
        lines.push(format!("file:  {}", encode_file_id(file_id)));
        lines.push(format!("parts: {}", record.part_count));
        lines.push(format!("extra: {}", record.extinfo));
    }
    for line in lines {
        writeln!(out, "{line}").map_err(ErrorKind::Io)?;
    }
    Ok(())
}

#[tracing::instrument(skip(service, cancel, out))]
async fn purge(
    service: &dyn FileService,
    older_than_secs: Option<u64>,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    let before = older_than_secs.map(|secs| {
        let age_ms = i64::try_from(secs.saturating_mul(1000)).unwrap_or(i64::MAX);
        now_ms().saturating_sub(age_ms)
    });
    let removed = service.purge(before, cancel).await.map_err(operation("purge"))?;
    writeln!(out, "purged {removed} files").map_err(ErrorKind::Io)?;
    Ok(())
}

fn kind_name(kind: EntryKind) -> &'static str {
    match kind {
        EntryKind::Dir => "dir",
        EntryKind::File => "file",
    }
}

fn format_ms(ms: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .ok()
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_else(|| ms.to_string())
}

fn format_entry(entry: &Entry) -> String {
    let marker = if entry.is_dir() { 'd' } else { '-' };
    format!("{marker} {:>12} {} {}", entry.size, format_ms(entry.mtime), entry.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use filegate_blockio::backend::MemoryBackend;
    use filegate_iocache::IoCache;
    use filegate_manager::FileManager;
    use filegate_meta::Database;
    use std::sync::Arc;

    async fn service(block_size: u64) -> FileManager {
        let db = Database::connect_in_memory().await.unwrap();
        FileManager::new(&db, Arc::new(MemoryBackend::new(block_size)), IoCache::disabled())
    }

    async fn exec(service: &FileManager, command: Command) -> Result<String> {
        let mut out = Vec::new();
        run(service, command, &CancellationToken::new(), &mut out).await?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let service = service(100).await;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("in.bin");
        let data: Vec<u8> = (0..1234u32).map(|i| (i * 7) as u8).collect();
        std::fs::write(&local, &data).unwrap();

        let put = Command::Put { local: local.clone(), remote: "/up/in.bin".into(), workers: 3 };
        let printed = exec(&service, put).await.unwrap();
        assert_eq!(printed.trim().len(), 16);

        let fetched = dir.path().join("out.bin");
        exec(&service, Command::Get { remote: "/up/in.bin".into(), local: fetched.clone() }).await.unwrap();
        assert_eq!(std::fs::read(&fetched).unwrap(), data);

        let listing = exec(&service, Command::Ls { path: "/up".into() }).await.unwrap();
        assert!(listing.starts_with(&format!("- {:>12} ", 1234)));
        assert!(listing.trim_end().ends_with(" in.bin"));

        let stat = exec(&service, Command::Stat { path: "/up/in.bin".into() }).await.unwrap();
        assert!(stat.contains("parts: 13"));
    }

    #[tokio::test]
    async fn test_put_empty_file() {
        let service = service(100).await;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("empty");
        std::fs::write(&local, b"").unwrap();
        exec(&service, Command::Put { local, remote: "/empty".into(), workers: 1 }).await.unwrap();
        let stat = exec(&service, Command::Stat { path: "/empty".into() }).await.unwrap();
        assert!(stat.contains("parts: 0"));
    }

    #[tokio::test]
    async fn test_namespace_commands() {
        let service = service(100).await;
        exec(&service, Command::Mkdir { path: "/a/b".into() }).await.unwrap();
        exec(&service, Command::Cp { src: "/a".into(), dst: "/c".into(), overwrite: false }).await.unwrap();
        exec(&service, Command::Mv { src: "/c".into(), dst: "/d".into(), overwrite: false }).await.unwrap();
        let listing = exec(&service, Command::Ls { path: "/".into() }).await.unwrap();
        let names: Vec<&str> = listing.lines().filter_map(|line| line.rsplit(' ').next()).collect();
        assert_eq!(names, ["a", "d"]);
        assert_eq!(exec(&service, Command::Rm { path: "/d".into() }).await.unwrap(), "removed 2 entries\n");

        let err = exec(&service, Command::Link { path: "/a".into() }).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Operation("link")));
    }

    #[tokio::test]
    async fn test_purge_command() {
        let service = service(100).await;
        service.create_draft(10).await.unwrap();
        let printed = exec(&service, Command::Purge { older_than_secs: None }).await.unwrap();
        assert_eq!(printed, "purged 1 files\n");
    }

    #[tokio::test]
    async fn test_interrupted() {
        let service = service(100).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut out = Vec::new();
        let err = run(&service, Command::Ls { path: "/".into() }, &cancel, &mut out).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Interrupted));
    }
}
