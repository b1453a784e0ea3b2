//! # Runtime Context
//!
//! The one value that owns every core subsystem:
//!
//! ```text
//! Context
//! ├── TypeRegistry   component ids and type-erased ops
//! ├── PoolSet        small / normal / large chunk pools
//! ├── Scheduler      worker pool + dependency graph
//! └── ErrorSlot      last failure, for diagnosis
//! ```
//!
//! There is no global instance. Create a context at startup, pass it by
//! reference to whatever needs it, and call [`Context::teardown`] once all
//! work has finished and every chunk has been released.

use std::sync::Arc;

use crate::config::ContextConfig;
use crate::ecs::{
    ArchetypeChunk, ArchetypeLayout, ArchetypeSignature, Component, TypeDescriptor, TypeId,
    TypeRegistry,
};
use crate::error::{CoreError, CoreResult, ErrorKind, ErrorSlot};
use crate::memory::{Chunk, PoolSet, SizeClass};
use crate::schedule::{AccessSet, Scheduler, TaskHandle, TaskResult};

/// Owner of the registry, the pools and the scheduler.
///
/// Failures returned by the methods below are also recorded in the error
/// slot; task failures are recorded by the scheduler as tasks finish.
///
/// # Example
///
/// ```rust,ignore
/// let context = Context::new(ContextConfig::default())?;
/// let position = context.register_component::<Position>()?;
///
/// let task = context.submit(AccessSet::new().write(position), || Ok(()))?;
/// context.wait_all()?;
/// assert_eq!(task.state(), TaskState::Done);
///
/// context.teardown()?;
/// ```
pub struct Context {
    // Dropped first: workers may still touch pool memory.
    scheduler: Scheduler,
    registry: TypeRegistry,
    pools: PoolSet,
    errors: ErrorSlot,
    config: ContextConfig,
    torn_down: bool,
}

impl Context {
    /// Validates `config` and starts every subsystem.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` or `WorkerSpawn`.
    pub fn new(config: ContextConfig) -> CoreResult<Self> {
        config.validate()?;
        let errors = ErrorSlot::new();
        let pools = PoolSet::new(config.pools)?;
        let scheduler = Scheduler::with_error_slot(&config.scheduler, errors.clone())?;

        tracing::info!(
            "context ready: {} workers, chunk sizes {}/{}/{}",
            scheduler.worker_count(),
            config.pools.small.chunk_size,
            config.pools.normal.chunk_size,
            config.pools.large.chunk_size
        );

        Ok(Self {
            scheduler,
            registry: TypeRegistry::new(),
            pools,
            errors,
            config,
            torn_down: false,
        })
    }

    /// Configuration the context was built from.
    #[must_use]
    pub const fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// The type registry.
    #[must_use]
    pub const fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// The chunk pools.
    #[must_use]
    pub const fn pools(&self) -> &PoolSet {
        &self.pools
    }

    /// The task scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    // -- Registry -----------------------------------------------------------

    /// Registers a type descriptor.
    ///
    /// # Errors
    ///
    /// See [`TypeRegistry::register`].
    pub fn register(&self, descriptor: TypeDescriptor) -> CoreResult<TypeId> {
        self.errors.track(self.registry.register(descriptor))
    }

    /// Registers the component type `T`.
    ///
    /// # Errors
    ///
    /// See [`TypeRegistry::register`].
    pub fn register_component<T: Component>(&self) -> CoreResult<TypeId> {
        self.errors.track(self.registry.register_component::<T>())
    }

    /// Descriptor of a registered type.
    ///
    /// # Errors
    ///
    /// Returns `UnknownType` if `id` was never registered.
    pub fn lookup(&self, id: TypeId) -> CoreResult<TypeDescriptor> {
        self.errors.track(self.registry.lookup(id))
    }

    // -- Pools --------------------------------------------------------------

    /// Leases a chunk of the given size class.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the pool cannot grow.
    pub fn acquire_chunk(&self, size_class: SizeClass) -> CoreResult<Chunk> {
        self.errors.track(self.pools.acquire(size_class))
    }

    /// Leases a chunk from the smallest class holding `bytes`.
    ///
    /// # Errors
    ///
    /// Returns `ChunkTooLarge` or `OutOfMemory`.
    pub fn acquire_chunk_for(&self, bytes: usize) -> CoreResult<Chunk> {
        self.errors.track(self.pools.acquire_for(bytes))
    }

    /// Returns a chunk to its pool.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChunkRelease` if the chunk is not a live chunk of this
    /// context.
    pub fn release_chunk(&self, chunk: Chunk) -> CoreResult<()> {
        self.errors.track(self.pools.release(chunk))
    }

    // -- Archetypes ---------------------------------------------------------

    /// Builds the chunk layout of the archetype made of `types`.
    ///
    /// # Errors
    ///
    /// See [`ArchetypeLayout::new`].
    pub fn archetype_layout(&self, types: &[TypeId]) -> CoreResult<Arc<ArchetypeLayout>> {
        let signature = ArchetypeSignature::new(types.iter().copied());
        self.errors
            .track(ArchetypeLayout::new(&self.registry, signature, &self.config.pools))
            .map(Arc::new)
    }

    /// Leases an empty chunk for `layout`.
    ///
    /// # Errors
    ///
    /// Returns `OutOfMemory` if the pool cannot grow.
    pub fn acquire_archetype_chunk(
        &self,
        layout: &Arc<ArchetypeLayout>,
    ) -> CoreResult<ArchetypeChunk> {
        let chunk = self.acquire_chunk(layout.size_class())?;
        match ArchetypeChunk::new(chunk, Arc::clone(layout)) {
            Ok(rows) => Ok(rows),
            Err(error) => {
                self.errors.record(error.clone());
                Err(error)
            }
        }
    }

    /// Destroys the rows of an archetype chunk and releases the chunk.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChunkRelease` if the chunk is not a live chunk of this
    /// context.
    pub fn release_archetype_chunk(&self, rows: ArchetypeChunk) -> CoreResult<()> {
        self.release_chunk(rows.into_chunk())
    }

    // -- Scheduling ---------------------------------------------------------

    /// Submits a task.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::submit`].
    pub fn submit<F>(&self, access: AccessSet, work: F) -> CoreResult<TaskHandle>
    where
        F: FnOnce() -> TaskResult + Send + 'static,
    {
        self.errors.track(self.scheduler.submit(access, work))
    }

    /// Blocks until every submitted task is terminal.
    ///
    /// # Errors
    ///
    /// See [`Scheduler::wait_all`].
    pub fn wait_all(&self) -> CoreResult<()> {
        self.errors.track(self.scheduler.wait_all())
    }

    /// Stops the scheduler. See [`Scheduler::shutdown`].
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }

    // -- Errors -------------------------------------------------------------

    /// Kind of the most recent failure, left in place.
    #[must_use]
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.errors.peek()
    }

    /// Removes and returns the most recent failure.
    #[must_use]
    pub fn take_last_error(&self) -> Option<CoreError> {
        self.errors.take()
    }

    // -- Teardown -----------------------------------------------------------

    /// Shuts everything down.
    ///
    /// # Errors
    ///
    /// Returns `TeardownViolation` if tasks are unfinished or chunks are
    /// still leased. The scheduler is stopped either way.
    pub fn teardown(mut self) -> CoreResult<()> {
        self.torn_down = true;
        let violation = self.violation();
        self.scheduler.shutdown();
        match violation {
            Some(error) => {
                tracing::error!("context teardown: {}", error);
                self.errors.record(error.clone());
                Err(error)
            }
            None => {
                tracing::info!("context torn down");
                Ok(())
            }
        }
    }

    fn violation(&self) -> Option<CoreError> {
        let unfinished_tasks = self.scheduler.unfinished_tasks();
        let live_chunks = self.pools.live_chunks();
        (unfinished_tasks > 0 || live_chunks > 0).then_some(CoreError::TeardownViolation {
            unfinished_tasks,
            live_chunks,
        })
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        if let Some(error) = self.violation() {
            tracing::error!("context dropped without teardown: {}", error);
        }
        self.scheduler.shutdown();
    }
}
