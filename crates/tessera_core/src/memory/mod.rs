//! # Memory Management
//!
//! Size-classed chunk pools backing archetype storage.
//!
//! ## Design Philosophy
//!
//! Archetypes have wildly different per-entity footprints. Instead of going
//! through a general-purpose allocator for every batch of entities, storage
//! leases fixed-size chunks from one of three pools:
//!
//! ```text
//! Small  ─┐
//! Normal ─┼──> [free-list] ──> Chunk (address-stable until release)
//! Large  ─┘         ▲
//!                   └── grows one backing block at a time
//! ```
//!
//! - Recycling a chunk is O(1)
//! - Backing memory is never returned to the system while a chunk is live
//! - Internal fragmentation is bounded by the size class

mod bitset;
mod chunk;
mod pool;

pub use chunk::{Chunk, ChunkId};
pub use pool::{Pool, PoolSet, PoolStats};

use serde::{Deserialize, Serialize};

use crate::config::PoolSetConfig;

/// Alignment of every chunk (one cache line).
pub const CHUNK_ALIGN: usize = 64;

/// Which pool services a chunk request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SizeClass {
    /// Smallest chunks.
    Small,
    /// Default chunks.
    Normal,
    /// Largest chunks.
    Large,
}

impl SizeClass {
    /// All size classes, smallest first.
    pub const ALL: [Self; 3] = [Self::Small, Self::Normal, Self::Large];

    /// Selects the smallest class whose chunk holds `bytes`.
    ///
    /// Returns `None` if even a large chunk is too small.
    #[must_use]
    pub fn select(bytes: usize, config: &PoolSetConfig) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|&class| config.get(class).chunk_size >= bytes)
    }

    /// Dense index (0..3) of this class.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Small => 0,
            Self::Normal => 1,
            Self::Large => 2,
        }
    }
}
