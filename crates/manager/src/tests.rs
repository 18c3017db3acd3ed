//! End-to-end behaviour over the in-memory backend and database.

use crate::error::ErrorKind;
use crate::{FileManager, FileService};
use filegate_blockio::backend::MemoryBackend;
use filegate_blockio::{BackendHandle, RotateBackend};
use filegate_iocache::{FileStream, IoCache, IoCacheConfig};
use filegate_meta::{Database, EntryKind, FileState};
use filegate_util::fileid::parse_public_link;
use filegate_util::now_ms;
use rstest::rstest;
use serde_json::json;
use std::io::{self, SeekFrom};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}

async fn manager_with(backend: BackendHandle, io_cache: IoCache) -> FileManager {
    let db = Database::connect_in_memory().await.unwrap();
    FileManager::new(&db, backend, io_cache)
}

async fn manager(block_size: u64) -> (FileManager, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new(block_size));
    (manager_with(backend.clone(), IoCache::disabled()).await, backend)
}

async fn read_at(stream: &mut FileStream, offset: u64) -> io::Result<Vec<u8>> {
    stream.seek(SeekFrom::Start(offset)).await?;
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await?;
    Ok(out)
}

async fn upload(manager: &FileManager, data: &[u8]) -> u64 {
    manager.create(data.len() as u64, &mut &data[..], &CancellationToken::new()).await.unwrap()
}

#[tokio::test]
async fn test_chunked_file_reads_from_any_offset() {
    let (manager, backend) = manager(1024).await;
    let data = noise(10_000, 1);
    let file_id = upload(&manager, &data).await;

    let record = manager.file_info(file_id).await.unwrap();
    assert_eq!(record.part_count, 10);
    assert_eq!(record.state, FileState::Ready);

    let parts = manager.parts.get_file_part_info(file_id, &(0..10).collect::<Vec<_>>()).await.unwrap();
    let mut total = 0;
    for part_id in 0..10 {
        let blob = backend.blob(&parts[&part_id].blob_key).await.unwrap();
        assert_eq!(blob.len(), if part_id == 9 { 784 } else { 1024 });
        total += blob.len();
    }
    assert_eq!(total, 10_000);

    let mut stream = manager.open(file_id).await.unwrap();
    for offset in [0usize, 1, 999, 1024, 1025, 9999] {
        assert_eq!(read_at(&mut stream, offset as u64).await.unwrap(), &data[offset..], "offset {offset}");
    }
}

#[tokio::test]
async fn test_seek_variants() {
    let (manager, _) = manager(100).await;
    let data = noise(1000, 2);
    let file_id = upload(&manager, &data).await;
    let mut stream = manager.open(file_id).await.unwrap();

    assert_eq!(stream.seek(SeekFrom::End(-10)).await.unwrap(), 990);
    let mut tail = Vec::new();
    stream.read_to_end(&mut tail).await.unwrap();
    assert_eq!(tail, &data[990..]);

    stream.seek(SeekFrom::Start(150)).await.unwrap();
    let mut chunk = [0u8; 100];
    stream.read_exact(&mut chunk).await.unwrap();
    assert_eq!(&chunk[..], &data[150..250]);
    assert_eq!(stream.seek(SeekFrom::Current(-50)).await.unwrap(), 200);

    assert!(stream.seek(SeekFrom::Current(-500)).await.is_err());
    assert_eq!(read_at(&mut stream, 5000).await.unwrap(), Vec::<u8>::new());
}

#[tokio::test]
async fn test_rotated_backend_is_transparent() {
    let inner = Arc::new(MemoryBackend::new(4096));
    let manager = manager_with(RotateBackend::wrap(inner.clone(), 77), IoCache::disabled()).await;
    let data = noise(10_000, 3);
    let file_id = upload(&manager, &data).await;

    let part = manager.parts.get_part(file_id, 0).await.unwrap().unwrap();
    let stored = inner.blob(&part.blob_key).await.unwrap();
    assert_ne!(&stored[..], &data[..4096]);

    let mut stream = manager.open(file_id).await.unwrap();
    for offset in [0usize, 17, 4095, 4096, 8191, 9999] {
        assert_eq!(read_at(&mut stream, offset as u64).await.unwrap(), &data[offset..]);
    }
}

#[tokio::test]
async fn test_multipart_out_of_order_with_retry() {
    let (manager, _) = manager(1024).await;
    let cancel = CancellationToken::new();
    let data = noise(2500, 4);
    let file_id = manager.create_draft(2500).await.unwrap();

    manager.create_part(file_id, 2, &mut &data[2048..], &cancel).await.unwrap();
    manager.create_part(file_id, 0, &mut &data[..1024], &cancel).await.unwrap();
    let wrong = noise(1024, 99);
    manager.create_part(file_id, 1, &mut &wrong[..], &cancel).await.unwrap();
    manager.create_part(file_id, 1, &mut &data[1024..2048], &cancel).await.unwrap();
    manager.finish_create(file_id, Some(json!({"md5": "abc"}))).await.unwrap();

    assert_eq!(manager.file_info(file_id).await.unwrap().extinfo["md5"], "abc");
    let mut stream = manager.open(file_id).await.unwrap();
    assert_eq!(read_at(&mut stream, 0).await.unwrap(), data);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parts_uploaded_concurrently() {
    let (manager, _) = manager(512).await;
    let data = Arc::new(noise(512 * 16 + 100, 6));
    let file_id = manager.create_draft(data.len() as u64).await.unwrap();

    let uploads: Vec<_> = (0..17u32)
        .rev()
        .map(|part_id| {
            let manager = manager.clone();
            let data = Arc::clone(&data);
            tokio::spawn(async move {
                let start = part_id as usize * 512;
                let end = (start + 512).min(data.len());
                manager.create_part(file_id, part_id, &mut &data[start..end], &CancellationToken::new()).await
            })
        })
        .collect();
    for result in futures::future::join_all(uploads).await {
        result.unwrap().unwrap();
    }
    manager.finish_create(file_id, None).await.unwrap();

    let parts = manager.parts.get_file_part_info(file_id, &(0..17).collect::<Vec<_>>()).await.unwrap();
    assert_eq!(parts.len(), 17);
    let mut stream = manager.open(file_id).await.unwrap();
    assert_eq!(read_at(&mut stream, 0).await.unwrap(), *data);
}

#[tokio::test]
async fn test_ready_file_parts_are_immutable() {
    let (manager, _) = manager(4).await;
    let cancel = CancellationToken::new();
    let file_id = upload(&manager, b"abcdefgh").await;

    let err = manager.create_part(file_id, 0, &mut &b"ZZZZ"[..], &cancel).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::AlreadyExists(_)));
    let mut stream = manager.open(file_id).await.unwrap();
    assert_eq!(read_at(&mut stream, 0).await.unwrap(), b"abcdefgh");
}

#[tokio::test]
async fn test_missing_part_fails_at_the_gap() {
    let (manager, _) = manager(1024).await;
    let cancel = CancellationToken::new();
    let data = noise(3000, 5);
    let file_id = manager.create_draft(3000).await.unwrap();
    manager.create_part(file_id, 0, &mut &data[..1024], &cancel).await.unwrap();
    manager.create_part(file_id, 2, &mut &data[2048..], &cancel).await.unwrap();
    manager.finish_create(file_id, None).await.unwrap();

    let mut stream = manager.open(file_id).await.unwrap();
    let mut head = vec![0u8; 1024];
    stream.read_exact(&mut head).await.unwrap();
    assert_eq!(head, &data[..1024]);

    let err = read_at(&mut stream, 0).await.unwrap_err();
    assert_eq!(ErrorKind::from_io(&err), Some(&ErrorKind::PartMissing { file_id, part_id: 1 }));
    assert_eq!(read_at(&mut stream, 2048).await.unwrap(), &data[2048..]);
}

#[tokio::test]
async fn test_drafts_are_not_readable() {
    let (manager, _) = manager(1024).await;
    let file_id = manager.create_draft(10).await.unwrap();
    let err = manager.open(file_id).await.err().unwrap();
    assert!(matches!(&*err, ErrorKind::NotFound(_)));

    let err = manager.finish_create(12345, None).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotFound(_)));
    let err = manager.create_part(12345, 0, &mut &b"x"[..], &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotFound(_)));
}

#[rstest]
#[case::index_out_of_range(3, 1024)]
#[case::short_middle_part(1, 1000)]
#[case::long_last_part(2, 500)]
#[tokio::test]
async fn test_invalid_parts_are_rejected(#[case] part_id: u32, #[case] len: usize) {
    let (manager, _) = manager(1024).await;
    let file_id = manager.create_draft(2500).await.unwrap();
    let data = noise(len, 6);
    let err = manager.create_part(file_id, part_id, &mut &data[..], &CancellationToken::new()).await.unwrap_err();
    assert_eq!(*err, ErrorKind::InvalidPart { file_id, part_id });
}

#[tokio::test]
async fn test_short_stream_leaves_draft() {
    let (manager, _) = manager(1024).await;
    let data = noise(1500, 7);
    let err = manager.create(3000, &mut &data[..], &CancellationToken::new()).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::InvalidPart { part_id: 1, .. }));

    let mut states = Vec::new();
    manager
        .files
        .scan_file(10, |record| {
            states.push(record.state);
            true
        })
        .await
        .unwrap();
    assert_eq!(states, [FileState::Init]);
}

#[tokio::test]
async fn test_cancelled_upload() {
    let (manager, backend) = manager(1024).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let data = noise(100, 8);
    let err = manager.create(100, &mut &data[..], &cancel).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Cancelled);
    assert!(backend.is_empty().await);

    let err = manager.purge(None, &cancel).await.unwrap_err();
    assert_eq!(*err, ErrorKind::Cancelled);
    assert_eq!(manager.purge(None, &CancellationToken::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_purge_keeps_linked_files() {
    let (manager, _) = manager(1024).await;
    let cancel = CancellationToken::new();
    let linked = upload(&manager, &noise(2000, 9)).await;
    manager.create_file_link("/keep/me.bin", linked, 2000, false).await.unwrap();
    assert_eq!(manager.purge(Some(now_ms() + 1), &cancel).await.unwrap(), 0);

    let orphan = upload(&manager, &noise(2000, 10)).await;
    assert_eq!(manager.purge(Some(now_ms() + 1), &cancel).await.unwrap(), 1);
    assert!(manager.file_info(linked).await.is_ok());
    let err = manager.file_info(orphan).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotFound(_)));
    assert!(manager.parts.get_part(orphan, 0).await.unwrap().is_none());
}

#[tokio::test]
async fn test_purge_respects_cutoff() {
    let (manager, _) = manager(1024).await;
    upload(&manager, &noise(10, 11)).await;
    assert_eq!(manager.purge(Some(0), &CancellationToken::new()).await.unwrap(), 0);
    assert_eq!(manager.purge(None, &CancellationToken::new()).await.unwrap(), 1);
}

#[tokio::test]
async fn test_link_operations() {
    let (manager, _) = manager(1024).await;
    let data = noise(300, 12);
    let file_id = upload(&manager, &data).await;

    let err = manager.create_file_link("/nope", 777, 1, false).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotFound(_)));

    manager.create_file_link("/docs", 0, 0, true).await.unwrap();
    let entry = manager.create_file_link("/docs/report.pdf", file_id, 300, false).await.unwrap();
    assert_eq!(entry.kind, EntryKind::File);
    assert_eq!(entry.file_id(), Some(file_id));

    let link = manager.public_link("/docs/report.pdf").await.unwrap();
    assert!(link.ends_with("-report.pdf"));
    assert_eq!(parse_public_link(&link).unwrap(), file_id);

    let (_, mut stream) = manager.open_path("/docs/report.pdf").await.unwrap();
    assert_eq!(read_at(&mut stream, 0).await.unwrap(), data);
    let err = manager.open_path("/docs").await.err().unwrap();
    assert!(matches!(&*err, ErrorKind::IsADirectory(_)));

    manager.copy_file_link("/docs", "/backup/docs", false).await.unwrap();
    manager.rename_file_link("/docs/report.pdf", "/docs/final.pdf", false).await.unwrap();
    let err = manager.rename_file_link("/backup", "/backup/docs/inner", false).await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::PathLoop(_)));

    let listed: Vec<String> = manager.list_file_link("/docs").await.unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(listed, ["final.pdf"]);
    assert_eq!(manager.stat_file_link("/backup/docs/report.pdf").await.unwrap().file_id(), Some(file_id));

    assert_eq!(manager.remove_file_link("/backup").await.unwrap(), 3);
    let err = manager.stat_file_link("/backup/docs").await.unwrap_err();
    assert!(matches!(&*err, ErrorKind::NotFound(_)));
}

#[tokio::test]
async fn test_service_trait_object() {
    let (manager, _) = manager(64).await;
    let service: Arc<dyn FileService> = Arc::new(manager);
    let data = noise(200, 13);
    let cancel = CancellationToken::new();

    let file_id = service.create_draft(200).await.unwrap();
    for (part_id, chunk) in data.chunks(service.block_size() as usize).enumerate() {
        service.create_part(file_id, part_id as u32, &mut &chunk[..], &cancel).await.unwrap();
    }
    service.finish_create(file_id, None).await.unwrap();
    service.create_file_link("/a/b/data", file_id, 200, false).await.unwrap();
    service.create_file_link("/a/c", 0, 0, true).await.unwrap();

    let mut seen = Vec::new();
    service
        .walk_file_link("/", &mut |path, entry| {
            seen.push((path.to_string(), entry.kind));
            true
        })
        .await
        .unwrap();
    assert_eq!(
        seen,
        [
            ("/a".to_string(), EntryKind::Dir),
            ("/a/b".to_string(), EntryKind::Dir),
            ("/a/b/data".to_string(), EntryKind::File),
            ("/a/c".to_string(), EntryKind::Dir),
        ]
    );

    let mut stream = service.open(file_id).await.unwrap();
    assert_eq!(read_at(&mut stream, 100).await.unwrap(), &data[100..]);
}

#[tokio::test]
async fn test_reads_through_memory_cache() {
    let backend = Arc::new(MemoryBackend::new(256));
    let config = IoCacheConfig { enable_mem: true, mem_key_size_limit: 4096, ..IoCacheConfig::default() };
    let manager = manager_with(backend, IoCache::new(&config).await.unwrap()).await;
    let data = noise(1000, 14);
    let file_id = upload(&manager, &data).await;

    let mut first = manager.open(file_id).await.unwrap();
    assert_eq!(read_at(&mut first, 0).await.unwrap(), data);

    // With the part records gone only the cache can still serve the file.
    manager.parts.delete_file_part(&[file_id]).await.unwrap();
    let mut second = manager.open(file_id).await.unwrap();
    assert_eq!(read_at(&mut second, 500).await.unwrap(), &data[500..]);
}

#[tokio::test]
async fn test_cache_fill_reports_missing_part() {
    let backend = Arc::new(MemoryBackend::new(256));
    let config = IoCacheConfig { enable_mem: true, mem_key_size_limit: 4096, ..IoCacheConfig::default() };
    let manager = manager_with(backend, IoCache::new(&config).await.unwrap()).await;
    let file_id = manager.create_draft(1000).await.unwrap();
    manager.finish_create(file_id, None).await.unwrap();

    let err = manager.open(file_id).await.err().unwrap();
    assert_eq!(*err, ErrorKind::PartMissing { file_id, part_id: 0 });
}
