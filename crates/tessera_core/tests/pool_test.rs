//! Integration tests for the size-classed chunk pools.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use tessera_core::{
    Chunk, CoreError, PoolConfig, PoolSet, PoolSetConfig, SizeClass, CHUNK_ALIGN,
};

fn ranges_overlap(a: &Chunk, b: &Chunk) -> bool {
    let (a0, b0) = (a.as_ptr() as usize, b.as_ptr() as usize);
    a0 < b0 + b.capacity() && b0 < a0 + a.capacity()
}

#[test]
fn test_acquire_release_reacquire() {
    let pools = PoolSet::new(PoolSetConfig::default()).unwrap();

    let mut chunks: Vec<Chunk> = (0..5)
        .map(|_| pools.acquire(SizeClass::Small).unwrap())
        .collect();
    for (i, a) in chunks.iter().enumerate() {
        assert_eq!(a.as_ptr() as usize % CHUNK_ALIGN, 0);
        for b in &chunks[i + 1..] {
            assert!(!ranges_overlap(a, b));
        }
    }

    let released: HashSet<usize> = chunks
        .drain(..3)
        .map(|chunk| {
            let addr = chunk.as_ptr() as usize;
            pools.release(chunk).unwrap();
            addr
        })
        .collect();
    assert_eq!(pools.pool(SizeClass::Small).live_chunks(), 2);

    chunks.extend((0..2).map(|_| pools.acquire(SizeClass::Small).unwrap()));

    // Released chunks are recycled before untouched ones.
    for chunk in &chunks[2..] {
        assert!(released.contains(&(chunk.as_ptr() as usize)));
    }
    let addresses: HashSet<usize> = chunks.iter().map(|c| c.as_ptr() as usize).collect();
    assert_eq!(addresses.len(), 4);

    for chunk in chunks {
        pools.release(chunk).unwrap();
    }
    assert_eq!(pools.live_chunks(), 0);
}

#[test]
fn test_concurrent_acquire_never_duplicates() {
    let config = PoolSetConfig {
        small: PoolConfig::new(256, 8),
        ..PoolSetConfig::default()
    };
    let pools = Arc::new(PoolSet::new(config).unwrap());
    let threads = 8;
    let per_thread = 100;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let pools = Arc::clone(&pools);
            thread::spawn(move || {
                (0..per_thread)
                    .map(|_| pools.acquire(SizeClass::Small).unwrap())
                    .collect::<Vec<Chunk>>()
            })
        })
        .collect();

    let chunks: Vec<Chunk> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    let ids: HashSet<_> = chunks.iter().map(Chunk::id).collect();
    let addresses: HashSet<_> = chunks.iter().map(|c| c.as_ptr() as usize).collect();
    assert_eq!(ids.len(), threads * per_thread);
    assert_eq!(addresses.len(), threads * per_thread);

    let stats = pools.pool(SizeClass::Small).stats();
    assert_eq!(stats.live_chunks, threads * per_thread);
    assert_eq!(stats.peak_live, threads * per_thread);

    for chunk in chunks {
        pools.release(chunk).unwrap();
    }
    assert!(pools.pool(SizeClass::Small).is_idle());
}

#[test]
fn test_concurrent_churn_keeps_counts_consistent() {
    let pools = Arc::new(PoolSet::new(PoolSetConfig::default()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let pools = Arc::clone(&pools);
            thread::spawn(move || {
                let class = SizeClass::ALL[t % 3];
                for _ in 0..500 {
                    let mut chunk = pools.acquire(class).unwrap();
                    // Exclusive: writing the whole chunk must not race anyone.
                    chunk.zero();
                    pools.release(chunk).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(pools.live_chunks(), 0);
    for stats in pools.stats() {
        assert_eq!(stats.free_chunks, stats.total_chunks);
    }
}

#[test]
fn test_capped_pool_runs_out_of_memory() {
    let config = PoolSetConfig {
        normal: PoolConfig::new(64 * 1024, 2).with_max_blocks(1),
        ..PoolSetConfig::default()
    };
    let pools = PoolSet::new(config).unwrap();

    let a = pools.acquire(SizeClass::Normal).unwrap();
    let b = pools.acquire(SizeClass::Normal).unwrap();
    assert_eq!(
        pools.acquire(SizeClass::Normal).unwrap_err(),
        CoreError::OutOfMemory {
            size_class: SizeClass::Normal,
            blocks: 1,
        }
    );

    // Releasing makes room again without growing.
    pools.release(a).unwrap();
    let c = pools.acquire(SizeClass::Normal).unwrap();
    assert_eq!(pools.pool(SizeClass::Normal).stats().blocks, 1);

    pools.release(b).unwrap();
    pools.release(c).unwrap();
}

#[test]
fn test_release_into_other_set_is_rejected() {
    let first = PoolSet::new(PoolSetConfig::default()).unwrap();
    let second = PoolSet::new(PoolSetConfig::default()).unwrap();

    let chunk = first.acquire(SizeClass::Large).unwrap();
    let slot = chunk.id().slot;
    assert_eq!(
        second.release(chunk).unwrap_err(),
        CoreError::InvalidChunkRelease {
            size_class: SizeClass::Large,
            slot,
        }
    );
    // `first` still counts the chunk as live; the rejected lease was consumed.
    assert_eq!(first.live_chunks(), 1);
}

#[test]
fn test_acquire_for_routes_by_size() {
    let pools = PoolSet::new(PoolSetConfig::default()).unwrap();
    let config = *pools.config();

    let small = pools.acquire_for(100).unwrap();
    let normal = pools.acquire_for(config.small.chunk_size + 1).unwrap();
    let large = pools.acquire_for(config.large.chunk_size).unwrap();
    assert_eq!(small.size_class(), SizeClass::Small);
    assert_eq!(normal.size_class(), SizeClass::Normal);
    assert_eq!(large.size_class(), SizeClass::Large);
    assert!(matches!(
        pools.acquire_for(config.large.chunk_size + 1),
        Err(CoreError::ChunkTooLarge { .. })
    ));

    for chunk in [small, normal, large] {
        pools.release(chunk).unwrap();
    }
}
