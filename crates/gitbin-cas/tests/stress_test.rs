use std::fs;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use gitbin_cas::{ChunkId, ChunkStore, DirRemote, NoOpProgress, Remote, TransferEngine};
use tempfile::TempDir;

fn chunk_payload(i: usize) -> Vec<u8> {
    format!("chunk payload number {} ", i).repeat(1 + i % 7).into_bytes()
}

#[test]
fn stress_parallel_writes_keep_names_equal_to_digests() {
    const CHUNK_COUNT: usize = 300;

    let temp = TempDir::new().unwrap();
    let store = ChunkStore::new(temp.path().join("cache")).unwrap();
    let payloads: Vec<Vec<u8>> = (0..CHUNK_COUNT).map(chunk_payload).collect();

    let start = Instant::now();
    TransferEngine::new(Arc::new(NoOpProgress))
        .run(&payloads, |payloads, i| -> io::Result<()> {
            let id = ChunkId::compute(&payloads[i]);
            store.write(&id, &payloads[i]).map_err(io::Error::other)?;
            Ok(())
        })
        .unwrap();
    println!("Parallel write took: {:?}", start.elapsed());

    let listed = store.list().unwrap();
    assert_eq!(listed.len(), CHUNK_COUNT);
    for entry in listed {
        let data = store.read(&entry.id).unwrap();
        assert!(ChunkId::compute(&data).matches(&entry.id));
        assert_eq!(entry.size, data.len() as u64);
    }

    // No temp files left behind
    let leftovers = fs::read_dir(store.root())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn stress_same_id_written_by_many_workers() {
    let temp = TempDir::new().unwrap();
    let store = ChunkStore::new(temp.path()).unwrap();

    let data = vec![0x5Au8; 64 * 1024];
    let id = ChunkId::compute(&data);
    let ids = vec![id.clone(); 40];

    TransferEngine::default()
        .run(&ids, |ids, i| -> io::Result<()> {
            let mut reader: &[u8] = &data;
            store
                .write_from_stream(&ids[i], &mut reader)
                .map_err(io::Error::other)?;
            Ok(())
        })
        .unwrap();

    assert_eq!(store.read(&id).unwrap(), data);
    assert_eq!(store.list().unwrap().len(), 1);
}

#[test]
fn stress_round_trip_through_directory_remote() {
    let temp = TempDir::new().unwrap();
    let local = ChunkStore::new(temp.path().join("local")).unwrap();
    let fresh = ChunkStore::new(temp.path().join("fresh")).unwrap();
    let remote = DirRemote::new(temp.path().join("remote")).unwrap();

    let ids: Vec<ChunkId> = (0..50)
        .map(|i| {
            let data = chunk_payload(i);
            let id = ChunkId::compute(&data);
            local.write(&id, &data).unwrap();
            id
        })
        .collect();

    let engine = TransferEngine::default();
    engine
        .run(&ids, |ids, i| {
            remote.upload_file(&local.path_for(&ids[i]), ids[i].as_str())
        })
        .unwrap();
    assert_eq!(remote.list_files().unwrap().len(), 50);

    let missing = fresh.missing(&ids);
    assert_eq!(missing.len(), 50);
    engine
        .run(&missing, |ids, i| {
            remote.download_file(&fresh.path_for(&ids[i]), ids[i].as_str())
        })
        .unwrap();

    assert!(fresh.missing(&ids).is_empty());
    for id in &ids {
        assert_eq!(fresh.read(id).unwrap(), local.read(id).unwrap());
    }
}
