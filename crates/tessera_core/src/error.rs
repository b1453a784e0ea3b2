//! # Core Error Types
//!
//! All errors that can occur in the registry, the pools and the scheduler.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::ecs::TypeId;
use crate::memory::SizeClass;
use crate::schedule::TaskId;

/// Errors that can occur in the core runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// The type id was never registered in this process.
    #[error("unknown component type: {0}")]
    UnknownType(TypeId),

    /// A concrete Rust type was used before being registered.
    #[error("component type `{0}` is not registered")]
    UnregisteredComponent(&'static str),

    /// A different descriptor was registered under an existing name.
    #[error("type `{name}` already registered as {existing} with a different layout")]
    DuplicateTypeConflict {
        /// The conflicting type name.
        name: &'static str,
        /// Id of the earlier registration.
        existing: TypeId,
    },

    /// Backing-block growth failed.
    #[error("out of memory: {size_class:?} pool could not grow past {blocks} blocks")]
    OutOfMemory {
        /// The size class that failed to grow.
        size_class: SizeClass,
        /// Number of blocks held when growth failed.
        blocks: usize,
    },

    /// A chunk was released to a pool that does not own it, or is not live.
    #[error("invalid chunk release: slot {slot} is not a live chunk of the {size_class:?} pool")]
    InvalidChunkRelease {
        /// Size class of the pool the chunk was released to.
        size_class: SizeClass,
        /// Slot index carried by the chunk.
        slot: u32,
    },

    /// Requested bytes exceed the largest configured chunk.
    #[error("chunk request of {requested} bytes exceeds the largest chunk ({max} bytes)")]
    ChunkTooLarge {
        /// Requested byte count.
        requested: usize,
        /// Largest configured chunk size.
        max: usize,
    },

    /// An archetype layout could not be built.
    #[error("invalid archetype layout: {0}")]
    InvalidLayout(String),

    /// A work item reported failure.
    #[error("task {task} failed: {reason}")]
    TaskFailed {
        /// The failed task.
        task: TaskId,
        /// Reason reported by the work item.
        reason: String,
    },

    /// The dependency graph contains a cycle.
    #[error("cyclic dependency detected at task {0}")]
    CyclicDependencyDetected(TaskId),

    /// The scheduler no longer accepts work.
    #[error("scheduler is shut down")]
    SchedulerShutdown,

    /// `wait_all` was called from inside a work item.
    #[error("wait_all called from a scheduler worker thread")]
    ReentrantWait,

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),

    /// The context was torn down while still busy.
    #[error("teardown with {unfinished_tasks} unfinished tasks and {live_chunks} live chunks")]
    TeardownViolation {
        /// Tasks not yet in a terminal state.
        unfinished_tasks: usize,
        /// Chunks not yet released.
        live_chunks: usize,
    },

    /// Invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Field-less discriminant of [`CoreError`], kept in the context error slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`CoreError::UnknownType`].
    UnknownType,
    /// See [`CoreError::DuplicateTypeConflict`].
    DuplicateTypeConflict,
    /// See [`CoreError::OutOfMemory`].
    OutOfMemory,
    /// See [`CoreError::InvalidChunkRelease`].
    InvalidChunkRelease,
    /// See [`CoreError::ChunkTooLarge`].
    ChunkTooLarge,
    /// See [`CoreError::InvalidLayout`].
    InvalidLayout,
    /// See [`CoreError::TaskFailed`].
    TaskFailed,
    /// See [`CoreError::CyclicDependencyDetected`].
    CyclicDependencyDetected,
    /// See [`CoreError::SchedulerShutdown`].
    SchedulerShutdown,
    /// See [`CoreError::ReentrantWait`].
    ReentrantWait,
    /// See [`CoreError::WorkerSpawn`].
    WorkerSpawn,
    /// See [`CoreError::TeardownViolation`].
    TeardownViolation,
    /// See [`CoreError::InvalidConfig`].
    InvalidConfig,
}

impl CoreError {
    /// Returns the discriminant of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownType(_) | Self::UnregisteredComponent(_) => ErrorKind::UnknownType,
            Self::DuplicateTypeConflict { .. } => ErrorKind::DuplicateTypeConflict,
            Self::OutOfMemory { .. } => ErrorKind::OutOfMemory,
            Self::InvalidChunkRelease { .. } => ErrorKind::InvalidChunkRelease,
            Self::ChunkTooLarge { .. } => ErrorKind::ChunkTooLarge,
            Self::InvalidLayout(_) => ErrorKind::InvalidLayout,
            Self::TaskFailed { .. } => ErrorKind::TaskFailed,
            Self::CyclicDependencyDetected(_) => ErrorKind::CyclicDependencyDetected,
            Self::SchedulerShutdown => ErrorKind::SchedulerShutdown,
            Self::ReentrantWait => ErrorKind::ReentrantWait,
            Self::WorkerSpawn(_) => ErrorKind::WorkerSpawn,
            Self::TeardownViolation { .. } => ErrorKind::TeardownViolation,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
        }
    }
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Shared "last failure" slot.
///
/// Each recorded error overwrites the previous one. Cloning shares the slot.
#[derive(Clone, Debug, Default)]
pub struct ErrorSlot {
    last: Arc<Mutex<Option<CoreError>>>,
}

impl ErrorSlot {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `error`, replacing any earlier one.
    pub fn record(&self, error: CoreError) {
        *self.last.lock() = Some(error);
    }

    /// Kind of the last error, leaving it in place.
    #[must_use]
    pub fn peek(&self) -> Option<ErrorKind> {
        self.last.lock().as_ref().map(CoreError::kind)
    }

    /// Removes and returns the last error.
    #[must_use]
    pub fn take(&self) -> Option<CoreError> {
        self.last.lock().take()
    }

    /// Records the error of a failed result, passing the result through.
    pub(crate) fn track<T>(&self, result: CoreResult<T>) -> CoreResult<T> {
        if let Err(error) = &result {
            self.record(error.clone());
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_variant() {
        let err = CoreError::UnknownType(TypeId::from_index(7));
        assert_eq!(err.kind(), ErrorKind::UnknownType);

        let err = CoreError::TaskFailed {
            task: TaskId::from_raw(3),
            reason: "boom".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::TaskFailed);
        assert_eq!(err.to_string(), "task #3 failed: boom");
    }

    #[test]
    fn test_error_slot_overwrites_and_clears() {
        let slot = ErrorSlot::new();
        assert_eq!(slot.peek(), None);

        slot.record(CoreError::SchedulerShutdown);
        let shared = slot.clone();
        shared.record(CoreError::ReentrantWait);

        assert_eq!(slot.peek(), Some(ErrorKind::ReentrantWait));
        assert_eq!(slot.take(), Some(CoreError::ReentrantWait));
        assert_eq!(shared.peek(), None);
    }

    #[test]
    fn test_track_records_only_errors() {
        let slot = ErrorSlot::new();
        assert_eq!(slot.track(Ok(5)), Ok(5));
        assert_eq!(slot.peek(), None);

        let failed: CoreResult<()> = Err(CoreError::InvalidConfig("x".to_string()));
        assert!(slot.track(failed).is_err());
        assert_eq!(slot.peek(), Some(ErrorKind::InvalidConfig));
    }
}
