//! End-to-end filter tests against a directory remote.
//!
//! Each test runs clean, push, cache wipe and smudge the way git would across
//! two clones sharing one remote.

use gitbin_cas::{ChunkStore, DirRemote, TransferEngine};
use gitbin_config::testing::TestEnvironment;
use gitbin_filter::{CleanFilter, CleanOutcome, PushOrchestrator, PushOutcome, SmudgeFilter};

/// Deterministic pseudo-random bytes (xorshift)
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

fn clean_to_document(store: &ChunkStore, data: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut document = Vec::new();
    let outcome = CleanFilter::new(store, chunk_size)
        .run("payload.bin", data, &mut document)
        .unwrap();
    assert!(matches!(outcome, CleanOutcome::Manifest(_)));
    document
}

#[test]
fn test_round_trip_through_remote() {
    let sizes = [0usize, 1, 3, 4, 5, 63, 64, 65, 1000, 4096, 10_000];
    let chunk_sizes = [1usize, 4, 7, 64, 4096];

    for (n, &size) in sizes.iter().enumerate() {
        for &chunk_size in &chunk_sizes {
            // One-byte chunks over large inputs only repeat the small cases
            if chunk_size == 1 && size > 1000 {
                continue;
            }

            let env = TestEnvironment::new().unwrap();
            let store = ChunkStore::new(&env.cache_root).unwrap();
            let remote = DirRemote::new(&env.remote_root).unwrap();
            let data = noise(size, n as u64 + 7);

            let document = clean_to_document(&store, &data, chunk_size);
            PushOrchestrator::new(&store, &remote, TransferEngine::default())
                .run()
                .unwrap();
            store.clear().unwrap();

            let mut restored = Vec::new();
            SmudgeFilter::new(&store, &remote, TransferEngine::default())
                .run(&document[..], &mut restored)
                .unwrap();

            assert_eq!(
                restored, data,
                "size {} chunk size {} did not round-trip",
                size, chunk_size
            );
        }
    }
}

#[test]
fn test_chunking_is_deterministic() {
    let data = noise(50_000, 99);
    let first = TestEnvironment::new().unwrap();
    let second = TestEnvironment::new().unwrap();

    let a = clean_to_document(&ChunkStore::new(&first.cache_root).unwrap(), &data, 4096);
    let b = clean_to_document(&ChunkStore::new(&second.cache_root).unwrap(), &data, 4096);

    assert_eq!(a, b);
    assert_eq!(first.cached_names().unwrap(), second.cached_names().unwrap());
}

#[test]
fn test_second_clone_checks_out_what_first_pushed() {
    let alice = TestEnvironment::new().unwrap();
    let bob = TestEnvironment::new().unwrap();
    let shared = DirRemote::new(&alice.remote_root).unwrap();
    let data = noise(20_000, 3);

    let alice_store = ChunkStore::new(&alice.cache_root).unwrap();
    let document = clean_to_document(&alice_store, &data, 1024);
    let pushed = PushOrchestrator::new(&alice_store, &shared, TransferEngine::default())
        .run()
        .unwrap();
    assert_eq!(pushed, PushOutcome::Uploaded(20));

    let bob_store = ChunkStore::new(&bob.cache_root).unwrap();
    let mut restored = Vec::new();
    SmudgeFilter::new(&bob_store, &shared, TransferEngine::default())
        .run(&document[..], &mut restored)
        .unwrap();
    assert_eq!(restored, data);

    // Bob's index already knows every chunk, so his push is a no-op
    let bob_push = PushOrchestrator::new(&bob_store, &shared, TransferEngine::default())
        .run()
        .unwrap();
    assert_eq!(bob_push, PushOutcome::NothingToPush);
}

#[test]
fn test_corruption_never_reaches_output() {
    let env = TestEnvironment::new().unwrap();
    let store = ChunkStore::new(&env.cache_root).unwrap();
    let remote = DirRemote::new(&env.remote_root).unwrap();
    let data = noise(4096 * 3, 11);

    let document = clean_to_document(&store, &data, 4096);
    PushOrchestrator::new(&store, &remote, TransferEngine::default())
        .run()
        .unwrap();

    // Flip a byte in every cached blob, keeping lengths intact
    for entry in store.list().unwrap() {
        let path = store.path_for(&entry.id);
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();
    }

    let mut restored = Vec::new();
    SmudgeFilter::new(&store, &remote, TransferEngine::default().with_concurrency(2))
        .run(&document[..], &mut restored)
        .unwrap();
    assert_eq!(restored, data);
}
