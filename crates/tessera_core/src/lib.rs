//! # TESSERA Core Runtime
//!
//! The substrate an ECS game engine runs on:
//! - Stable, type-erased component identity
//! - Size-classed chunk pools backing archetype storage
//! - A parallel task scheduler ordered by declared component access
//!
//! ## Architecture Rules
//!
//! 1. **No ambient globals** - everything hangs off an explicit [`Context`]
//! 2. **Address-stable storage** - chunks never move while leased
//! 3. **Ordering is the only contract** - a failed task does not fail its
//!    dependents
//!
//! ## Example
//!
//! ```rust,ignore
//! use tessera_core::{AccessSet, Context, ContextConfig, Position, Velocity};
//!
//! let context = Context::new(ContextConfig::default())?;
//! let position = context.register_component::<Position>()?;
//! let velocity = context.register_component::<Velocity>()?;
//!
//! let integrate = context.submit(
//!     AccessSet::new().write(position).read(velocity),
//!     || Ok(()),
//! )?;
//! context.wait_all()?;
//! context.teardown()?;
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod context;
pub mod ecs;
pub mod error;
pub mod hash;
pub mod memory;
pub mod schedule;

pub use config::{ContextConfig, PoolConfig, PoolSetConfig, SchedulerConfig};
pub use context::Context;
pub use ecs::{
    ArchetypeChunk, ArchetypeLayout, ArchetypeSignature, Column, Component, Position,
    TypeDescriptor, TypeId, TypeInfo, TypeOps, TypeRegistry, Velocity,
};
pub use error::{CoreError, CoreResult, ErrorKind, ErrorSlot};
pub use memory::{Chunk, ChunkId, Pool, PoolSet, PoolStats, SizeClass, CHUNK_ALIGN};
pub use schedule::{
    AccessSet, Scheduler, SchedulerStats, TaskFailure, TaskHandle, TaskId, TaskResult, TaskState,
};
