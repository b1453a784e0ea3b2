//! # Chunk Pools
//!
//! Fixed-size chunk allocators, one per size class.
//!
//! Each pool keeps a free-list of slot indices. When it runs dry the pool
//! allocates one backing block and slices it into `chunks_per_block` chunks,
//! amortizing system-allocation cost over many leases.

// SAFETY: Pools own raw backing blocks obtained from the global allocator.
// All unsafe blocks are documented.
#![allow(unsafe_code)]

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use super::bitset::LiveSet;
use super::chunk::{Chunk, ChunkId};
use super::{SizeClass, CHUNK_ALIGN};
use crate::config::{PoolConfig, PoolSetConfig};
use crate::error::{CoreError, CoreResult};

/// Source of per-pool owner tags. Tags only need to be unique per process.
static NEXT_POOL_TAG: AtomicU32 = AtomicU32::new(1);

/// One backing allocation.
struct Block {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: a block is plain memory owned by exactly one pool.
unsafe impl Send for Block {}

/// Mutable pool state, guarded by the pool mutex.
struct PoolState {
    blocks: Vec<Block>,
    /// Free slot indices; the next lease pops from the back.
    free: Vec<u32>,
    live: LiveSet,
    peak_live: usize,
}

/// Snapshot of a pool's occupancy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Size class served by the pool.
    pub size_class: SizeClass,
    /// Bytes per chunk.
    pub chunk_size: usize,
    /// Backing blocks allocated so far.
    pub blocks: usize,
    /// Chunks carved out of all blocks.
    pub total_chunks: usize,
    /// Chunks currently leased.
    pub live_chunks: usize,
    /// Chunks on the free-list.
    pub free_chunks: usize,
    /// Highest simultaneous lease count observed.
    pub peak_live: usize,
}

/// A free-list of same-sized chunks.
///
/// # Thread Safety
///
/// `acquire` and `release` may be called concurrently from any thread. The
/// critical section is a pop/push on the free-list plus a bit flip; block
/// growth is the only slow path.
///
/// # Example
///
/// ```rust,ignore
/// let pool = Pool::new(SizeClass::Small, PoolConfig::new(4096, 64))?;
///
/// let chunk = pool.acquire()?;   // O(1) unless the pool has to grow
/// pool.release(chunk)?;          // O(1)
/// ```
pub struct Pool {
    size_class: SizeClass,
    config: PoolConfig,
    tag: u32,
    state: Mutex<PoolState>,
}

impl Pool {
    /// Creates an empty pool. No memory is allocated until the first lease.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if `config` is malformed.
    pub fn new(size_class: SizeClass, config: PoolConfig) -> CoreResult<Self> {
        config.validate(size_class)?;
        Ok(Self {
            size_class,
            config,
            tag: NEXT_POOL_TAG.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(PoolState {
                blocks: Vec::new(),
                free: Vec::new(),
                live: LiveSet::default(),
                peak_live: 0,
            }),
        })
    }

    /// Size class served by this pool.
    #[inline]
    #[must_use]
    pub const fn size_class(&self) -> SizeClass {
        self.size_class
    }

    /// Bytes per chunk.
    #[inline]
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.config.chunk_size
    }

    /// Owner tag stamped on every chunk from this pool.
    #[inline]
    #[must_use]
    pub const fn tag(&self) -> u32 {
        self.tag
    }

    /// Leases a chunk.
    ///
    /// The returned chunk is never handed out again until it is released.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the free-list is empty and a new backing
    /// block cannot be allocated.
    pub fn acquire(&self) -> CoreResult<Chunk> {
        let mut state = self.state.lock();

        if state.free.is_empty() {
            self.grow(&mut state)?;
        }
        let Some(slot) = state.free.pop() else {
            return Err(self.out_of_memory(&state));
        };

        let inserted = state.live.insert(slot as usize);
        debug_assert!(inserted, "free-list handed out live slot {slot}");
        state.peak_live = state.peak_live.max(state.live.len());

        let ptr = self.slot_ptr(&state, slot);
        drop(state);

        let id = ChunkId {
            pool_tag: self.tag,
            slot,
        };
        // SAFETY: `slot` just moved from the free-list to the live set, so no
        // other chunk aliases its bytes until it is released.
        Ok(unsafe { Chunk::from_raw(ptr, self.config.chunk_size, self.size_class, id) })
    }

    /// Returns a chunk to the free-list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChunkRelease` if the chunk was not leased from this
    /// pool or its slot is not live.
    pub fn release(&self, chunk: Chunk) -> CoreResult<()> {
        let id = chunk.id();
        let invalid = CoreError::InvalidChunkRelease {
            size_class: self.size_class,
            slot: id.slot,
        };
        if id.pool_tag != self.tag || chunk.size_class() != self.size_class {
            return Err(invalid);
        }

        let mut state = self.state.lock();
        if !state.live.remove(id.slot as usize) {
            return Err(invalid);
        }
        debug_assert_eq!(
            self.slot_ptr(&state, id.slot).as_ptr().cast_const(),
            chunk.as_ptr(),
            "chunk pointer does not match its slot"
        );
        state.free.push(id.slot);
        Ok(())
    }

    /// Number of chunks currently leased.
    #[must_use]
    pub fn live_chunks(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Ids of the chunks currently leased, ascending by slot.
    #[must_use]
    pub fn live_chunk_ids(&self) -> Vec<ChunkId> {
        let state = self.state.lock();
        state
            .live
            .iter()
            .map(|slot| ChunkId {
                pool_tag: self.tag,
                slot: slot as u32,
            })
            .collect()
    }

    /// Returns `true` if `id` names a chunk currently leased from this pool.
    #[must_use]
    pub fn is_live(&self, id: ChunkId) -> bool {
        id.pool_tag == self.tag && self.state.lock().live.contains(id.slot as usize)
    }

    /// Returns `true` if no chunk is leased.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.live_chunks() == 0
    }

    /// Occupancy snapshot.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            size_class: self.size_class,
            chunk_size: self.config.chunk_size,
            blocks: state.blocks.len(),
            total_chunks: state.blocks.len() * self.config.chunks_per_block,
            live_chunks: state.live.len(),
            free_chunks: state.free.len(),
            peak_live: state.peak_live,
        }
    }

    /// Allocates one backing block and pushes its slots onto the free-list.
    fn grow(&self, state: &mut PoolState) -> CoreResult<()> {
        let per_block = self.config.chunks_per_block;

        if self
            .config
            .max_blocks
            .is_some_and(|max| state.blocks.len() >= max)
        {
            return Err(self.out_of_memory(state));
        }
        let first_slot = state.blocks.len() * per_block;
        let end_slot = first_slot + per_block;
        if end_slot > u32::MAX as usize {
            return Err(self.out_of_memory(state));
        }

        let layout = Layout::from_size_align(self.config.block_size(), CHUNK_ALIGN)
            .map_err(|_| self.out_of_memory(state))?;
        // SAFETY: `layout` has non-zero size (validated config).
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            return Err(self.out_of_memory(state));
        };

        state.blocks.push(Block { ptr, layout });
        state.live.grow_to(end_slot);
        // Reverse so the lowest slot is leased first.
        state
            .free
            .extend((first_slot..end_slot).rev().map(|slot| slot as u32));

        tracing::debug!(
            "{:?} pool grew to {} blocks ({} chunks of {} bytes)",
            self.size_class,
            state.blocks.len(),
            end_slot,
            self.config.chunk_size
        );
        Ok(())
    }

    fn slot_ptr(&self, state: &PoolState, slot: u32) -> NonNull<u8> {
        let slot = slot as usize;
        let block = &state.blocks[slot / self.config.chunks_per_block];
        let offset = (slot % self.config.chunks_per_block) * self.config.chunk_size;
        // SAFETY: `offset` is inside the block, which is non-null.
        unsafe { NonNull::new_unchecked(block.ptr.as_ptr().add(offset)) }
    }

    fn out_of_memory(&self, state: &PoolState) -> CoreError {
        CoreError::OutOfMemory {
            size_class: self.size_class,
            blocks: state.blocks.len(),
        }
    }
}

impl Drop for Pool {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let blocks = std::mem::take(&mut state.blocks);

        if state.live.len() > 0 {
            // Leased chunks still point into these blocks; leaking is the
            // only option that keeps them valid.
            tracing::error!(
                "{:?} pool dropped with {} live chunks; leaking {} backing blocks",
                self.size_class,
                state.live.len(),
                blocks.len()
            );
            std::mem::forget(blocks);
            return;
        }

        for block in blocks {
            // SAFETY: allocated in `grow` with exactly this layout, and no
            // chunk references it anymore.
            unsafe { dealloc(block.ptr.as_ptr(), block.layout) };
        }
    }
}

/// The three size-class pools.
pub struct PoolSet {
    pools: [Pool; 3],
    config: PoolSetConfig,
}

impl PoolSet {
    /// Creates the small, normal and large pools.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is invalid.
    pub fn new(config: PoolSetConfig) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            pools: [
                Pool::new(SizeClass::Small, config.small)?,
                Pool::new(SizeClass::Normal, config.normal)?,
                Pool::new(SizeClass::Large, config.large)?,
            ],
            config,
        })
    }

    /// The configuration the pools were built from.
    #[must_use]
    pub const fn config(&self) -> &PoolSetConfig {
        &self.config
    }

    /// The pool serving `size_class`.
    #[inline]
    #[must_use]
    pub const fn pool(&self, size_class: SizeClass) -> &Pool {
        &self.pools[size_class.index()]
    }

    /// Leases a chunk of the given size class.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the pool cannot grow.
    pub fn acquire(&self, size_class: SizeClass) -> CoreResult<Chunk> {
        self.pool(size_class).acquire()
    }

    /// Leases a chunk from the smallest class that holds `bytes`.
    ///
    /// # Errors
    ///
    /// Returns `ChunkTooLarge` if no class is big enough, or `OutOfMemory`.
    pub fn acquire_for(&self, bytes: usize) -> CoreResult<Chunk> {
        let size_class = SizeClass::select(bytes, &self.config).ok_or(CoreError::ChunkTooLarge {
            requested: bytes,
            max: self.config.large.chunk_size,
        })?;
        self.acquire(size_class)
    }

    /// Returns a chunk to the pool of its size class.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChunkRelease` if the chunk does not belong to this set.
    pub fn release(&self, chunk: Chunk) -> CoreResult<()> {
        self.pool(chunk.size_class()).release(chunk)
    }

    /// Chunks leased across all pools.
    #[must_use]
    pub fn live_chunks(&self) -> usize {
        self.pools.iter().map(Pool::live_chunks).sum()
    }

    /// Per-pool statistics, small first.
    #[must_use]
    pub fn stats(&self) -> [PoolStats; 3] {
        [
            self.pools[0].stats(),
            self.pools[1].stats(),
            self.pools[2].stats(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn small_pool(chunks_per_block: usize) -> Pool {
        Pool::new(SizeClass::Small, PoolConfig::new(256, chunks_per_block)).unwrap()
    }

    #[test]
    fn test_pool_acquire_release() {
        let pool = small_pool(4);

        let chunk = pool.acquire().unwrap();
        assert_eq!(chunk.capacity(), 256);
        assert_eq!(chunk.size_class(), SizeClass::Small);
        assert_eq!(pool.live_chunks(), 1);

        pool.release(chunk).unwrap();
        assert_eq!(pool.live_chunks(), 0);
        assert!(pool.is_idle());
    }

    #[test]
    fn test_pool_grows_one_block_at_a_time() {
        let pool = small_pool(4);

        let chunks: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
        let stats = pool.stats();
        assert_eq!(stats.blocks, 2);
        assert_eq!(stats.total_chunks, 8);
        assert_eq!(stats.live_chunks, 5);
        assert_eq!(stats.free_chunks, 3);

        for chunk in chunks {
            pool.release(chunk).unwrap();
        }
        assert_eq!(pool.stats().peak_live, 5);
    }

    #[test]
    fn test_pool_reuse() {
        let pool = small_pool(4);

        let c1 = pool.acquire().unwrap();
        let addr = c1.as_ptr();
        let slot = c1.id().slot;
        pool.release(c1).unwrap();

        let c2 = pool.acquire().unwrap();
        assert_eq!(c2.id().slot, slot); // Same slot reused
        assert_eq!(c2.as_ptr(), addr);
        pool.release(c2).unwrap();
    }

    #[test]
    fn test_live_chunks_never_alias() {
        let pool = small_pool(8);
        let chunks: Vec<_> = (0..20).map(|_| pool.acquire().unwrap()).collect();

        let addrs: HashSet<_> = chunks.iter().map(|c| c.as_ptr() as usize).collect();
        assert_eq!(addrs.len(), 20);
        for chunk in &chunks {
            assert_eq!(chunk.as_ptr() as usize % CHUNK_ALIGN, 0);
        }

        for chunk in chunks {
            pool.release(chunk).unwrap();
        }
    }

    #[test]
    fn test_max_blocks_is_out_of_memory() {
        let pool = Pool::new(SizeClass::Small, PoolConfig::new(256, 2).with_max_blocks(1)).unwrap();

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        let err = pool.acquire().unwrap_err();
        assert_eq!(
            err,
            CoreError::OutOfMemory {
                size_class: SizeClass::Small,
                blocks: 1
            }
        );

        pool.release(a).unwrap();
        let c = pool.acquire().unwrap();
        pool.release(b).unwrap();
        pool.release(c).unwrap();
    }

    #[test]
    fn test_foreign_chunk_release_rejected() {
        let a = small_pool(2);
        let b = small_pool(2);

        let chunk = a.acquire().unwrap();
        let id = chunk.id();
        let err = b.release(chunk).unwrap_err();
        assert!(matches!(err, CoreError::InvalidChunkRelease { .. }));

        // The lease is still recorded by its real owner.
        assert_eq!(a.live_chunk_ids(), vec![id]);
        assert!(a.is_live(id));
        assert!(!b.is_live(id));
    }

    #[test]
    fn test_chunk_memory_is_writable() {
        let pool = small_pool(2);
        let mut chunk = pool.acquire().unwrap();

        // SAFETY: the lease covers `capacity` bytes.
        unsafe {
            let ptr = chunk.as_mut_ptr();
            ptr.write(0xAB);
            ptr.add(chunk.capacity() - 1).write(0xCD);
            assert_eq!(ptr.read(), 0xAB);
        }
        chunk.zero();
        // SAFETY: as above.
        assert_eq!(unsafe { chunk.as_ptr().read() }, 0);

        pool.release(chunk).unwrap();
    }

    #[test]
    fn test_pool_set_routes_by_size() {
        let set = PoolSet::new(PoolSetConfig::default()).unwrap();

        let small = set.acquire_for(100).unwrap();
        let normal = set.acquire_for(set.config().small.chunk_size + 1).unwrap();
        assert_eq!(small.size_class(), SizeClass::Small);
        assert_eq!(normal.size_class(), SizeClass::Normal);
        assert_eq!(set.live_chunks(), 2);

        let err = set.acquire_for(usize::MAX).unwrap_err();
        assert!(matches!(err, CoreError::ChunkTooLarge { .. }));

        set.release(small).unwrap();
        set.release(normal).unwrap();
        assert_eq!(set.live_chunks(), 0);
    }
}
