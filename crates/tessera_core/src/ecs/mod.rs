//! # Entity Component System Types
//!
//! Component identity and storage:
//!
//! - [`TypeRegistry`]: dense ids and type-erased lifecycle operations
//! - [`ArchetypeLayout`]: column placement of an archetype in a chunk
//! - [`ArchetypeChunk`]: rows of one archetype inside a leased chunk

mod archetype;
mod component;
mod registry;

pub use archetype::{ArchetypeChunk, ArchetypeLayout, ArchetypeSignature, Column};
pub use component::{Component, Position, Velocity};
pub use registry::{TypeDescriptor, TypeId, TypeInfo, TypeOps, TypeRegistry};
