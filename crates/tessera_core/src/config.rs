//! # Runtime Configuration
//!
//! Loaded once at startup, either from code (`Default`) or from a TOML file.
//!
//! ```toml
//! [pools.small]
//! chunk_size = 4096
//! chunks_per_block = 64
//!
//! [pools.large]
//! chunk_size = 1048576
//! chunks_per_block = 2
//! max_blocks = 8
//!
//! [scheduler]
//! worker_count = 4
//! ```
//!
//! Size-class thresholds are the chunk sizes themselves: a request is served
//! by the smallest class whose chunk holds it.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::memory::{SizeClass, CHUNK_ALIGN};

/// Configuration of a single size-class pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Fixed byte size of every chunk in this pool.
    pub chunk_size: usize,
    /// Chunks carved out of each backing block.
    pub chunks_per_block: usize,
    /// Maximum number of backing blocks. `None` grows until the system
    /// allocator fails.
    #[serde(default)]
    pub max_blocks: Option<usize>,
}

impl PoolConfig {
    /// Creates an unbounded pool configuration.
    #[must_use]
    pub const fn new(chunk_size: usize, chunks_per_block: usize) -> Self {
        Self {
            chunk_size,
            chunks_per_block,
            max_blocks: None,
        }
    }

    /// Caps the number of backing blocks.
    #[must_use]
    pub const fn with_max_blocks(mut self, max_blocks: usize) -> Self {
        self.max_blocks = Some(max_blocks);
        self
    }

    /// Bytes in one backing block.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.chunk_size * self.chunks_per_block
    }

    pub(crate) fn validate(&self, size_class: SizeClass) -> CoreResult<()> {
        if self.chunk_size == 0 || self.chunk_size % CHUNK_ALIGN != 0 {
            return Err(CoreError::InvalidConfig(format!(
                "{size_class:?} chunk_size {} must be a non-zero multiple of {CHUNK_ALIGN}",
                self.chunk_size
            )));
        }
        if self.chunks_per_block == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "{size_class:?} chunks_per_block must be greater than zero"
            )));
        }
        if self.chunk_size.checked_mul(self.chunks_per_block).is_none()
            || self.chunks_per_block > u32::MAX as usize
        {
            return Err(CoreError::InvalidConfig(format!(
                "{size_class:?} block size overflows"
            )));
        }
        if self.max_blocks == Some(0) {
            return Err(CoreError::InvalidConfig(format!(
                "{size_class:?} max_blocks must be greater than zero"
            )));
        }
        Ok(())
    }
}

/// Configuration of the three size-class pools.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSetConfig {
    /// Small chunks: tiny archetypes, singletons.
    pub small: PoolConfig,
    /// Normal chunks: the common case.
    pub normal: PoolConfig,
    /// Large chunks: wide archetypes.
    pub large: PoolConfig,
    /// An archetype takes the smallest class whose chunk fits at least this
    /// many entities, falling back to the largest class that fits one.
    pub min_entities_per_chunk: usize,
}

impl Default for PoolSetConfig {
    fn default() -> Self {
        Self {
            small: PoolConfig::new(4 * 1024, 64),
            normal: PoolConfig::new(64 * 1024, 16),
            large: PoolConfig::new(1024 * 1024, 2),
            min_entities_per_chunk: 32,
        }
    }
}

impl PoolSetConfig {
    /// Returns the configuration of one size class.
    #[must_use]
    pub const fn get(&self, size_class: SizeClass) -> &PoolConfig {
        match size_class {
            SizeClass::Small => &self.small,
            SizeClass::Normal => &self.normal,
            SizeClass::Large => &self.large,
        }
    }

    /// Validates every pool and the ordering of the thresholds.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if a pool is malformed, the chunk sizes are
    /// not strictly increasing from small to large, or
    /// `min_entities_per_chunk` is zero.
    pub fn validate(&self) -> CoreResult<()> {
        for size_class in SizeClass::ALL {
            self.get(size_class).validate(size_class)?;
        }
        if self.min_entities_per_chunk == 0 {
            return Err(CoreError::InvalidConfig(
                "min_entities_per_chunk must be greater than zero".to_string(),
            ));
        }
        if !(self.small.chunk_size < self.normal.chunk_size
            && self.normal.chunk_size < self.large.chunk_size)
        {
            return Err(CoreError::InvalidConfig(format!(
                "chunk sizes must increase: small {} / normal {} / large {}",
                self.small.chunk_size, self.normal.chunk_size, self.large.chunk_size
            )));
        }
        Ok(())
    }
}

/// Scheduler configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of worker threads. `0` means one per available core.
    pub worker_count: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 0,
            thread_name_prefix: "tessera-worker".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// Creates a configuration with a fixed worker count.
    #[must_use]
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count,
            ..Self::default()
        }
    }

    /// Worker count after resolving `0` to the available parallelism.
    #[must_use]
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            return self.worker_count;
        }
        std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
    }
}

/// Top-level runtime configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Chunk pools.
    pub pools: PoolSetConfig,
    /// Task scheduler.
    pub scheduler: SchedulerConfig,
}

impl ContextConfig {
    /// Parses and validates a TOML document. Missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` on a parse error or an invalid value.
    pub fn from_toml_str(source: &str) -> CoreResult<Self> {
        let config: Self =
            toml::from_str(source).map_err(|e| CoreError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first invalid value.
    pub fn validate(&self) -> CoreResult<()> {
        self.pools.validate()?;
        if self.scheduler.thread_name_prefix.is_empty() {
            return Err(CoreError::InvalidConfig(
                "thread_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
